use crate::core::error::SetupError;
use crate::core::settings::{AccountSettings, Settings};
use crate::core::store::OrderStore;
use crate::daemon::coordinator::{self, CoordinatorConfig, CoordinatorHandle};
use crate::fetcher::{OrderFetcher, OrderTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCommand {
    Reload(String),
    Unload(String),
}

/// Everything about an account that forces a reload when it changes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryOptions {
    account: AccountSettings,
    coordinator: CoordinatorConfig,
}

impl EntryOptions {
    fn from_settings(settings: &Settings, name: &str) -> Option<Self> {
        settings.account(name).map(|account| Self {
            account: account.clone(),
            coordinator: CoordinatorConfig {
                interval: settings.poll_interval(),
                notify: settings.notifications.enabled,
            },
        })
    }
}

/// Subscription to settings changes for one entry. Dropping or disposing
/// it stops the subscription.
pub struct UpdateListener {
    task: JoinHandle<()>,
}

impl UpdateListener {
    fn start(
        name: String,
        options: EntryOptions,
        mut settings_rx: broadcast::Receiver<Settings>,
        commands: mpsc::UnboundedSender<RegistryCommand>,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                let settings = match settings_rx.recv().await {
                    Ok(settings) => settings,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(account = %name, skipped, "Settings listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let command = match EntryOptions::from_settings(&settings, &name) {
                    None => RegistryCommand::Unload(name.clone()),
                    Some(new_options) if new_options != options => {
                        RegistryCommand::Reload(name.clone())
                    }
                    Some(_) => continue,
                };

                tracing::info!(account = %name, command = ?command, "Account options changed");
                let _ = commands.send(command);
                break;
            }
        });

        Self { task }
    }

    pub fn dispose(self) {
        self.task.abort();
    }
}

impl Drop for UpdateListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct RegisteredAccount {
    coordinator: CoordinatorHandle,
    listener: UpdateListener,
}

/// Per-account fetcher/coordinator bundles, owned by the daemon.
pub struct AccountRegistry {
    transport: Arc<dyn OrderTransport>,
    store: OrderStore,
    settings: Settings,
    settings_tx: broadcast::Sender<Settings>,
    commands: mpsc::UnboundedSender<RegistryCommand>,
    entries: HashMap<String, RegisteredAccount>,
}

impl AccountRegistry {
    pub fn new(
        transport: Arc<dyn OrderTransport>,
        store: OrderStore,
        settings: Settings,
        commands: mpsc::UnboundedSender<RegistryCommand>,
    ) -> Self {
        let (settings_tx, _) = broadcast::channel(16);
        Self {
            transport,
            store,
            settings,
            settings_tx,
            commands,
            entries: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    #[cfg(test)]
    pub fn refresh_trigger(&self, name: &str) -> Option<coordinator::RefreshTrigger> {
        self.entries.get(name).map(|e| e.coordinator.trigger())
    }

    /// Configured accounts that are not running yet.
    pub fn pending_accounts(&self) -> Vec<String> {
        self.settings
            .accounts
            .iter()
            .filter(|a| !self.entries.contains_key(&a.name))
            .map(|a| a.name.clone())
            .collect()
    }

    /// Stores the new settings and notifies every entry's listener.
    /// Returns the configured accounts that still need a setup.
    pub async fn apply_settings(&mut self, settings: Settings) -> Vec<String> {
        self.settings = settings;
        let _ = self.settings_tx.send(self.settings.clone());

        // Running entries are unloaded by their listener; this covers
        // accounts that never got past setup.
        for (name, _) in self.store.all_entries().await {
            if !self.entries.contains_key(&name) && self.settings.account(&name).is_none() {
                self.store.remove(&name).await;
            }
        }

        self.pending_accounts()
    }

    /// Builds the fetcher, performs the initial refresh and starts polling.
    ///
    /// The account is not ready when it cannot be resolved or the initial
    /// fetch failed transiently; its store entry then shows it unavailable.
    /// Rejected cookies still register the account so the expiry is visible,
    /// and it waits for new options instead of being set up again.
    pub async fn setup(&mut self, name: &str) -> Result<(), SetupError> {
        self.stop(name).await;

        let options = EntryOptions::from_settings(&self.settings, name)
            .ok_or_else(|| SetupError::not_ready(name, "account is not configured"))?;

        if options.account.name.trim().is_empty() {
            return Err(SetupError::not_ready(name, "account name is empty"));
        }

        let mut fetcher = OrderFetcher::new(options.account.credentials(), Arc::clone(&self.transport));

        match coordinator::refresh_once(&mut fetcher, &self.store, options.coordinator.notify).await {
            Ok(()) => {}
            Err(e) if e.is_auth() => {
                tracing::warn!(account = %name, "Account registered with an expired session");
            }
            Err(e) => return Err(SetupError::not_ready(name, e)),
        }

        let listener = UpdateListener::start(
            name.to_string(),
            options.clone(),
            self.settings_tx.subscribe(),
            self.commands.clone(),
        );
        let coordinator = coordinator::spawn(fetcher, options.coordinator, self.store.clone());

        self.entries.insert(
            name.to_string(),
            RegisteredAccount {
                coordinator,
                listener,
            },
        );

        tracing::info!(account = %name, "Account ready");
        Ok(())
    }

    /// Disposes the listener and stops the coordinator. The store entry stays.
    async fn stop(&mut self, name: &str) -> bool {
        let Some(entry) = self.entries.remove(name) else {
            return false;
        };

        entry.listener.dispose();
        drop(entry.coordinator.shutdown().await);
        true
    }

    /// Disposes the listener, stops the coordinator and drops per-account state.
    pub async fn unload(&mut self, name: &str) -> bool {
        let stopped = self.stop(name).await;
        self.store.remove(name).await;

        if self.entries.is_empty() {
            self.store.clear().await;
        }

        if stopped {
            tracing::info!(account = %name, "Account unloaded");
        }
        stopped
    }

    /// Replaces the entry with one built from the current options. The last
    /// snapshot is kept so an order already in progress is not reported again.
    pub async fn reload(&mut self, name: &str) -> Result<(), SetupError> {
        tracing::info!(account = %name, "Reloading account");
        self.setup(name).await
    }

    pub async fn handle_command(&mut self, command: RegistryCommand) -> Result<(), SetupError> {
        match command {
            RegistryCommand::Reload(name) => self.reload(&name).await,
            RegistryCommand::Unload(name) => {
                self.unload(&name).await;
                Ok(())
            }
        }
    }

    pub fn request_refresh_all(&self) {
        for (name, entry) in &self.entries {
            if !entry.coordinator.request_refresh() {
                tracing::warn!(account = %name, "Coordinator is not running");
            }
        }
    }

    pub async fn unload_all(&mut self) {
        for name in self.account_names() {
            self.unload(&name).await;
        }
    }
}
