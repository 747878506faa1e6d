use custody_core::{Clock, CustodyConfig, CustodyError, SystemClock};
use custody_handoff::{
    Channel, Directory, HandoffService, HandoffStore, InMemoryHandoffStore, Notifier,
    PublicGateway, StaticDirectory, TracingNotifier,
};
use std::sync::Arc;
use tracing::info;

pub struct AppState {
    pub config: CustodyConfig,
    pub service: Arc<HandoffService>,
    pub gateway: PublicGateway,
}

impl AppState {
    /// Wire the service from configuration with the system clock.
    pub fn new(config: CustodyConfig) -> anyhow::Result<Self> {
        let store = open_store(&config)?;
        let directory = Arc::new(StaticDirectory::from_config(&config.directory));
        let notifier = Arc::new(TracingNotifier::new(
            config.notification.public_base_url.clone(),
        ));
        Self::with_parts(config, store, directory, notifier, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: CustodyConfig,
        store: Arc<dyn HandoffStore>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let channel: Channel = config
            .notification
            .default_channel
            .parse()
            .map_err(CustodyError::Config)?;
        let service = Arc::new(
            HandoffService::new(store, directory, notifier, clock, config.expiry.ttl())
                .with_default_channel(channel),
        );
        Ok(AppState {
            gateway: PublicGateway::new(Arc::clone(&service)),
            service,
            config,
        })
    }
}

#[cfg(feature = "sqlite")]
fn open_store(config: &CustodyConfig) -> anyhow::Result<Arc<dyn HandoffStore>> {
    use anyhow::Context;

    match &config.service.database_path {
        Some(path) => {
            info!(path = %path, "Using SQLite handoff store");
            let store = custody_handoff::SqliteHandoffStore::open(path)
                .with_context(|| format!("opening database {}", path))?;
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory handoff store");
            Ok(Arc::new(InMemoryHandoffStore::new()))
        }
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_store(config: &CustodyConfig) -> anyhow::Result<Arc<dyn HandoffStore>> {
    if config.service.database_path.is_some() {
        anyhow::bail!("database_path set but custody-node was built without the sqlite feature");
    }
    info!("Using in-memory handoff store");
    Ok(Arc::new(InMemoryHandoffStore::new()))
}
