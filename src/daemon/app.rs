use crate::core::retry::SetupRetry;
use crate::core::settings::{Settings, SettingsWatcher};
use crate::core::store::OrderStore;
use crate::daemon::dbus::{forward_order_updates, start_dbus_server, DbusCommand};
use crate::daemon::registry::{AccountRegistry, RegistryCommand};
use crate::fetcher::{HttpTransport, OrderTransport};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub async fn run() -> Result<()> {
    let mut settings_watcher = SettingsWatcher::new()?;
    let settings = settings_watcher.get().await;
    settings_watcher.start_watching()?;
    let mut settings_rx = settings_watcher.subscribe();

    if settings.accounts.is_empty() {
        tracing::warn!(
            path = ?Settings::config_path(),
            "No accounts configured; add [[accounts]] to the config file"
        );
    }

    // One client for every account; cookies travel per request.
    let transport: Arc<dyn OrderTransport> = Arc::new(HttpTransport::new(
        &settings.base_url,
        settings.request_timeout(),
    )?);
    let store = OrderStore::new();

    let (registry_tx, mut registry_rx) = mpsc::unbounded_channel::<RegistryCommand>();
    let mut registry = AccountRegistry::new(transport, store.clone(), settings.clone(), registry_tx);

    let (dbus_tx, mut dbus_rx) = mpsc::unbounded_channel::<DbusCommand>();
    let _dbus_connection = match start_dbus_server(store.clone(), dbus_tx).await {
        Ok(connection) => {
            tokio::spawn(forward_order_updates(connection.clone(), store.subscribe()));
            Some(connection)
        }
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable, continuing without it");
            None
        }
    };

    let mut pending = PendingSetups::default();
    pending.replace(registry.pending_accounts(), Instant::now());

    let mut check_interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                pending.setup_due(&mut registry, Instant::now()).await;
            }
            Ok(new_settings) = settings_rx.recv() => {
                handle_settings_change(&mut registry, &mut pending, new_settings, Instant::now()).await;
            }
            Some(command) = registry_rx.recv() => {
                handle_registry_command(&mut registry, &mut pending, command, Instant::now()).await;
            }
            Some(command) = dbus_rx.recv() => {
                handle_dbus_command(&registry, &mut pending, command, Instant::now());
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    registry.unload_all().await;
    tracing::info!("Daemon stopped");
    Ok(())
}

/// Accounts whose setup has not succeeded yet, with their backoff.
#[derive(Default)]
struct PendingSetups {
    retries: HashMap<String, SetupRetry>,
}

impl PendingSetups {
    /// Drops the old backoff; every listed account is due at `now`.
    fn replace(&mut self, names: Vec<String>, now: Instant) {
        self.retries = names
            .into_iter()
            .map(|name| (name, SetupRetry::new(now)))
            .collect();
    }

    fn make_all_due(&mut self, now: Instant) {
        for retry in self.retries.values_mut() {
            *retry = SetupRetry::new(now);
        }
    }

    /// Queues an account whose setup just failed outside of `setup_due`.
    fn schedule_retry(&mut self, name: String, now: Instant) -> Duration {
        let mut retry = SetupRetry::new(now);
        let delay = retry.record_failure(now);
        self.retries.insert(name, retry);
        delay
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.retries.is_empty()
    }

    #[cfg(test)]
    fn is_due(&self, name: &str, now: Instant) -> bool {
        self.retries.get(name).is_some_and(|r| r.is_due(now))
    }

    async fn setup_due(&mut self, registry: &mut AccountRegistry, now: Instant) {
        let due: Vec<String> = self
            .retries
            .iter()
            .filter(|(_, retry)| retry.is_due(now))
            .map(|(name, _)| name.clone())
            .collect();

        for name in due {
            match registry.setup(&name).await {
                Ok(()) => {
                    self.retries.remove(&name);
                }
                Err(e) => {
                    if let Some(retry) = self.retries.get_mut(&name) {
                        let delay = retry.record_failure(now);
                        tracing::warn!(
                            error = %e,
                            attempts = retry.failed_attempts(),
                            retry_in_secs = delay.as_secs(),
                            "Account not ready, will retry setup"
                        );
                    }
                }
            }
        }
    }
}

async fn handle_settings_change(
    registry: &mut AccountRegistry,
    pending: &mut PendingSetups,
    settings: Settings,
    now: Instant,
) {
    if settings.base_url != registry.settings().base_url
        || settings.request_timeout_secs != registry.settings().request_timeout_secs
    {
        tracing::warn!("HTTP client settings changed; restart the daemon to apply them");
    }

    let names = registry.apply_settings(settings).await;
    pending.replace(names, now);
}

async fn handle_registry_command(
    registry: &mut AccountRegistry,
    pending: &mut PendingSetups,
    command: RegistryCommand,
    now: Instant,
) {
    let name = match &command {
        RegistryCommand::Reload(name) | RegistryCommand::Unload(name) => name.clone(),
    };

    if let Err(e) = registry.handle_command(command).await {
        let delay = pending.schedule_retry(name, now);
        tracing::warn!(error = %e, retry_in_secs = delay.as_secs(), "Reload failed");
    }
}

fn handle_dbus_command(
    registry: &AccountRegistry,
    pending: &mut PendingSetups,
    command: DbusCommand,
    now: Instant,
) {
    match command {
        DbusCommand::Refresh => {
            registry.request_refresh_all();
            pending.make_all_due(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FetchError;
    use crate::core::settings::{AccountSettings, NotificationSettings};
    use crate::fetcher::{fixtures, FakeTransport};

    const SECOND: Duration = Duration::from_secs(1);

    fn settings(cookie: &str) -> Settings {
        Settings {
            accounts: vec![AccountSettings {
                name: "alice".to_string(),
                cookie: cookie.to_string(),
                cookie2: String::new(),
                locale: "en-US".to_string(),
            }],
            notifications: NotificationSettings { enabled: false },
            ..Settings::default()
        }
    }

    fn registry(
        transport: &Arc<FakeTransport>,
    ) -> (AccountRegistry, mpsc::UnboundedReceiver<RegistryCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::clone(transport) as Arc<dyn OrderTransport>;
        (AccountRegistry::new(transport, OrderStore::new(), settings("c1"), tx), rx)
    }

    fn down() -> FetchError {
        FetchError::Transport("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_failed_setup_backs_off_then_succeeds() {
        let transport = Arc::new(FakeTransport::ok(""));
        transport.set_error(down());
        let (mut registry, _rx) = registry(&transport);
        let mut pending = PendingSetups::default();
        let now = Instant::now();
        pending.replace(registry.pending_accounts(), now);

        pending.setup_due(&mut registry, now).await;
        assert_eq!(transport.call_count(), 1);

        pending.setup_due(&mut registry, now + 10 * SECOND).await;
        assert_eq!(transport.call_count(), 1);

        pending.setup_due(&mut registry, now + 30 * SECOND).await;
        assert_eq!(transport.call_count(), 2);
        assert!(!pending.is_due("alice", now + 89 * SECOND));

        transport.set_ok(&fixtures::no_orders());
        pending.setup_due(&mut registry, now + 90 * SECOND).await;
        assert_eq!(transport.call_count(), 3);
        assert!(pending.is_empty());
        assert!(registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_expired_account_is_not_set_up_again() {
        let transport = Arc::new(FakeTransport::ok(""));
        transport.set_status(401, "");
        let (mut registry, _rx) = registry(&transport);
        let mut pending = PendingSetups::default();
        let now = Instant::now();
        pending.replace(registry.pending_accounts(), now);

        pending.setup_due(&mut registry, now).await;
        assert!(pending.is_empty());
        assert!(registry.contains("alice"));

        pending.setup_due(&mut registry, now + 600 * SECOND).await;
        assert_eq!(transport.calls(), vec![Some("c1".to_string())]);
    }

    #[tokio::test]
    async fn test_settings_change_makes_pending_due() {
        let transport = Arc::new(FakeTransport::ok(""));
        transport.set_error(down());
        let (mut registry, _rx) = registry(&transport);
        let mut pending = PendingSetups::default();
        let now = Instant::now();
        pending.replace(registry.pending_accounts(), now);
        pending.setup_due(&mut registry, now).await;
        assert!(!pending.is_due("alice", now + SECOND));

        handle_settings_change(&mut registry, &mut pending, settings("c2"), now + SECOND).await;
        assert!(pending.is_due("alice", now + SECOND));

        transport.set_ok(&fixtures::no_orders());
        pending.setup_due(&mut registry, now + SECOND).await;
        assert!(registry.contains("alice"));
        assert_eq!(transport.calls().last().cloned().flatten().as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_dbus_refresh_makes_pending_due() {
        let transport = Arc::new(FakeTransport::ok(""));
        transport.set_error(down());
        let (mut registry, _rx) = registry(&transport);
        let mut pending = PendingSetups::default();
        let now = Instant::now();
        pending.replace(registry.pending_accounts(), now);
        pending.setup_due(&mut registry, now).await;
        assert!(!pending.is_due("alice", now + SECOND));

        handle_dbus_command(&registry, &mut pending, DbusCommand::Refresh, now + SECOND);
        assert!(pending.is_due("alice", now + SECOND));

        pending.setup_due(&mut registry, now + SECOND).await;
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_is_queued_for_retry() {
        let transport = Arc::new(FakeTransport::ok(&fixtures::no_orders()));
        let (mut registry, mut rx) = registry(&transport);
        let mut pending = PendingSetups::default();
        let now = Instant::now();
        pending.replace(registry.pending_accounts(), now);
        pending.setup_due(&mut registry, now).await;
        assert!(pending.is_empty());

        transport.set_error(down());
        handle_settings_change(&mut registry, &mut pending, settings("c2"), now).await;
        assert!(pending.is_empty());

        let command = rx.recv().await.unwrap();
        assert_eq!(command, RegistryCommand::Reload("alice".to_string()));
        handle_registry_command(&mut registry, &mut pending, command, now).await;

        assert!(!registry.contains("alice"));
        assert!(!pending.is_due("alice", now + 29 * SECOND));
        assert!(pending.is_due("alice", now + 30 * SECOND));

        transport.set_ok(&fixtures::no_orders());
        pending.setup_due(&mut registry, now + 30 * SECOND).await;
        assert!(registry.contains("alice"));
        assert!(pending.is_empty());
    }
}
