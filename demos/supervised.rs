//! A toy hub run under the supervisor.
//!
//! ```text
//! DOMOTIC_CONFIG=/tmp/cfg.json GATEWAY_ADDR=127.0.0.1:1502 cargo run --example supervised
//! ```
//!
//! With nothing listening on the gateway address the poller fails, and the
//! failure is reported with the stack of the `connect` call that opened it.
//! Set `DOMOTIC_DAEMONIZED=1` to keep the hub running after that, then stop it
//! with ctrl-c.

use domotic::interceptor::TracedConnection;
use domotic::prelude::*;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

struct Devices {
    gateway: String,
}

struct Hub {
    config: PathBuf,
    devices: Arc<Devices>,
    reporter: FailureReporter,
    connector: TracedConnector<TcpConnector>,
    poller: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Hub {
    fn new(source: &ConfigSource, env: &Arc<Environment>) -> anyhow::Result<Self> {
        Ok(Self {
            config: source.path().to_path_buf(),
            devices: env.get::<Devices>(SubsystemName::Devices)?,
            reporter: env.reporter().clone(),
            connector: instrument(TcpConnector),
            poller: Mutex::new(None),
        })
    }
}

async fn poll(mut gateway: TracedConnection<TcpStream>) -> std::io::Result<()> {
    loop {
        gateway.write_all(b"\x00\x01\x00\x00\x00\x06\x01\x03\x00\x00\x00\x01").await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

#[async_trait]
impl Framework for Hub {
    async fn init(&self) -> Result<(), Failure> {
        tracing::info!(config = %self.config.display(), "loading plugins");

        let connector = self.connector.clone();
        let devices = Arc::clone(&self.devices);
        let handle = self.reporter.spawn(async move {
            let gateway = connector.connect(&devices.gateway).await?;
            poll(gateway).await
        });
        if let Ok(mut poller) = self.poller.lock() {
            *poller = Some(handle);
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), Failure> {
        tracing::info!("disconnecting devices");
        if let Some(poller) = self.poller.lock().ok().and_then(|mut p| p.take()) {
            poller.abort();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Settings and logging
    let config = SupervisorConfig::from_env()?;
    let logs = init_logging(&config.logging)?;

    // 2. Environment
    let gateway = std::env::var("GATEWAY_ADDR").unwrap_or_else(|_| "127.0.0.1:1502".to_string());
    let env = Arc::new(
        Environment::builder(logs)
            .provide(SubsystemName::Devices, move |_| Ok(Devices { gateway }))
            .build()?,
    );

    // 3. Start the hub
    let supervisor = Supervisor::builder(env, config).build();
    let hub = match supervisor.start(Hub::new).await {
        Ok(hub) => hub,
        Err(terminated) => {
            tracing::error!("{}", terminated);
            return Ok(());
        }
    };
    tracing::info!(gateway = %hub.devices.gateway, "hub running");

    // 4. Run until a signal or a fatal failure ends the process
    supervisor.wait_for_exit().await;
    Ok(())
}
