use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// The subsystems that make up the shared environment.
///
/// Variants are declared in construction order: a subsystem may only depend
/// on subsystems declared before it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum SubsystemName {
    Logger,
    Api,
    Users,
    Devices,
    Matcher,
    Variables,
    Actions,
    Predicates,
    Rules,
    Plugins,
    Database,
    Groups,
    Pages,
}
