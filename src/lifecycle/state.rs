//! Supervisor state machine

use strum_macros::{Display, IntoStaticStr};
use tokio::sync::watch;

/// Where the supervised process is in its lifetime.
///
/// ```text
/// Uninitialized ──► Initializing ──► Ready ──► ShuttingDown ──► Exited
///       │                │                                        ▲
///       └────────────────┴────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Exited,
}

impl LifecycleState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Uninitialized, Exited)
                | (Initializing, Ready)
                | (Initializing, Exited)
                | (Ready, ShuttingDown)
                | (ShuttingDown, Exited)
        )
    }

    /// Whether the framework has finished initializing.
    pub fn is_ready(self) -> bool {
        self == LifecycleState::Ready
    }

    /// No transition leaves this state.
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Exited
    }
}

/// Shared, observable lifecycle state with atomic transitions.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<LifecycleState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Cell starting at [`LifecycleState::Uninitialized`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Uninitialized);
        Self { tx }
    }

    /// Current state.
    pub fn get(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move from `from` to `to`; fails if the current state is not `from`
    /// or the transition is not allowed.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let moved = self.tx.send_if_modified(|state| {
            if *state == from && from.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(%from, %to, "lifecycle transition");
        }
        moved
    }

    /// Move to `Exited` from whatever state allows it.
    ///
    /// Returns the previous state for the one caller that wins.
    pub fn exit(&self) -> Option<LifecycleState> {
        let mut previous = None;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(LifecycleState::Exited) {
                previous = Some(*state);
                *state = LifecycleState::Exited;
                true
            } else {
                false
            }
        });
        previous
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&LifecycleState) -> bool) -> LifecycleState {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        match rx.wait_for(predicate).await {
            Ok(state) => *state,
            Err(_) => self.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn test_happy_path() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), Uninitialized);
        assert!(cell.transition(Uninitialized, Initializing));
        assert!(cell.transition(Initializing, Ready));
        assert!(cell.get().is_ready());
        assert!(cell.transition(Ready, ShuttingDown));
        assert_eq!(cell.exit(), Some(ShuttingDown));
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_transition_requires_current_state() {
        let cell = StateCell::new();
        assert!(!cell.transition(Initializing, Ready));
        assert!(!cell.transition(Uninitialized, Ready));
        assert_eq!(cell.get(), Uninitialized);
    }

    #[test]
    fn test_ready_cannot_exit_without_shutting_down() {
        let cell = StateCell::new();
        cell.transition(Uninitialized, Initializing);
        cell.transition(Initializing, Ready);
        assert_eq!(cell.exit(), None);
        assert_eq!(cell.get(), Ready);
    }

    #[test]
    fn test_exit_is_won_once() {
        let cell = StateCell::new();
        cell.transition(Uninitialized, Initializing);
        assert_eq!(cell.exit(), Some(Initializing));
        assert_eq!(cell.exit(), None);
        assert!(!cell.transition(Initializing, Ready));
    }

    #[test]
    fn test_nothing_leaves_exited() {
        for next in [Uninitialized, Initializing, Ready, ShuttingDown, Exited] {
            assert!(!Exited.can_transition_to(next));
        }
    }

    #[tokio::test]
    async fn test_wait_for_state() {
        let cell = std::sync::Arc::new(StateCell::new());
        let waiter = {
            let cell = std::sync::Arc::clone(&cell);
            tokio::spawn(async move { cell.wait_for(|s| s.is_ready()).await })
        };
        cell.transition(Uninitialized, Initializing);
        cell.transition(Initializing, Ready);
        assert_eq!(waiter.await.unwrap(), Ready);
    }
}
