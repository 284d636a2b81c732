use crate::core::store::OrderStore;
use crate::daemon::entities;
use crate::daemon::{DBUS_NAME, DBUS_PATH};
use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use zbus::interface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbusCommand {
    Refresh,
}

pub struct EatsBarService {
    store: OrderStore,
    commands: mpsc::UnboundedSender<DbusCommand>,
}

impl EatsBarService {
    pub fn new(store: OrderStore, commands: mpsc::UnboundedSender<DbusCommand>) -> Self {
        Self { store, commands }
    }
}

#[interface(name = "com.github.eatsbar.EatsBar")]
impl EatsBarService {
    async fn refresh(&self) -> zbus::fdo::Result<()> {
        tracing::info!("D-Bus Refresh called");
        self.commands
            .send(DbusCommand::Refresh)
            .map_err(|_| zbus::fdo::Error::Failed("daemon is shutting down".to_string()))
    }

    /// JSON array of entity states for every running account.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let entities = entities::collect(&self.store).await;
        serde_json::to_string(&entities).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    #[zbus(signal)]
    async fn order_updated(ctx: &zbus::SignalContext<'_>, account: &str) -> zbus::Result<()>;
}

pub async fn start_dbus_server(
    store: OrderStore,
    commands: mpsc::UnboundedSender<DbusCommand>,
) -> Result<zbus::Connection> {
    let service = EatsBarService::new(store, commands);

    let connection = zbus::connection::Builder::session()
        .context("Failed to connect to session D-Bus")?
        .name(DBUS_NAME)
        .context("Failed to request D-Bus name")?
        .serve_at(DBUS_PATH, service)
        .context("Failed to register D-Bus object")?
        .build()
        .await
        .context("Failed to start D-Bus server")?;

    tracing::info!(name = DBUS_NAME, path = DBUS_PATH, "D-Bus service registered");
    Ok(connection)
}

/// Emits `OrderUpdated` for every store change until the store is dropped.
pub async fn forward_order_updates(connection: zbus::Connection, mut updates: broadcast::Receiver<String>) {
    let iface = match connection
        .object_server()
        .interface::<_, EatsBarService>(DBUS_PATH)
        .await
    {
        Ok(iface) => iface,
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus interface not found, order signals disabled");
            return;
        }
    };

    loop {
        match updates.recv().await {
            Ok(account) => {
                if let Err(e) = EatsBarService::order_updated(iface.signal_context(), &account).await {
                    tracing::debug!(account = %account, error = %e, "Failed to emit OrderUpdated");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "OrderUpdated forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
