use crate::core::models::{Credentials, DEFAULT_LOCALE};
use anyhow::{Context, Result};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

pub const DEFAULT_BASE_URL: &str = "https://www.ubereats.com";
const MIN_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub base_url: String,
    pub notifications: NotificationSettings,
    pub accounts: Vec<AccountSettings>,
    /// Lowers the default log level to `debug`. `RUST_LOG` still wins.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            request_timeout_secs: 30,
            base_url: DEFAULT_BASE_URL.to_string(),
            notifications: NotificationSettings::default(),
            accounts: Vec::new(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub name: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub cookie2: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

impl AccountSettings {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.name.clone(),
            vec![self.cookie.clone(), self.cookie2.clone()],
            self.locale.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("eats-bar").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config directory")?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        settings.validate()?;

        tracing::info!(?path, accounts = settings.accounts.len(), "Loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            anyhow::bail!(
                "poll_interval_secs must be at least {}, got {}",
                MIN_POLL_INTERVAL_SECS,
                self.poll_interval_secs
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                anyhow::bail!("account name must not be empty");
            }
            if !seen.insert(account.name.as_str()) {
                anyhow::bail!("duplicate account name: {}", account.name);
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    pub fn account(&self, name: &str) -> Option<&AccountSettings> {
        self.accounts.iter().find(|a| a.name == name)
    }
}

/// Watches the config file and broadcasts every successfully reloaded [`Settings`].
pub struct SettingsWatcher {
    path: PathBuf,
    current: Arc<RwLock<Settings>>,
    tx: broadcast::Sender<Settings>,
    _watcher: Option<RecommendedWatcher>,
}

impl SettingsWatcher {
    pub fn new() -> Result<Self> {
        let path = Settings::config_path().context("Could not determine config directory")?;
        Self::with_path(path)
    }

    pub fn with_path(path: PathBuf) -> Result<Self> {
        let settings = Settings::load_from(&path)?;
        let (tx, _) = broadcast::channel(16);

        Ok(Self {
            path,
            current: Arc::new(RwLock::new(settings)),
            tx,
            _watcher: None,
        })
    }

    pub async fn get(&self) -> Settings {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub fn start_watching(&mut self) -> Result<()> {
        let Some(parent) = self.path.parent().map(Path::to_path_buf) else {
            anyhow::bail!("Config path has no parent: {}", self.path.display());
        };
        let Some(file_name) = self.path.file_name().map(|f| f.to_os_string()) else {
            anyhow::bail!("Config path has no file name: {}", self.path.display());
        };

        if !parent.exists() {
            tracing::warn!(?parent, "Config directory does not exist, skipping watch");
            return Ok(());
        }

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    if (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        let _ = notify_tx.send(());
                    }
                }
            },
            Config::default(),
        )?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory: {}", parent.display()))?;
        tracing::info!(?parent, "Watching config directory");

        let path = self.path.clone();
        let current = Arc::clone(&self.current);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            while notify_rx.recv().await.is_some() {
                // Editors write in bursts; settle before reading.
                tokio::time::sleep(Duration::from_millis(200)).await;
                while notify_rx.try_recv().is_ok() {}

                match Settings::load_from(&path) {
                    Ok(settings) => {
                        let changed = {
                            let mut guard = current.write().await;
                            if *guard == settings {
                                false
                            } else {
                                *guard = settings.clone();
                                true
                            }
                        };
                        if changed {
                            tracing::info!("Config changed on disk, broadcasting");
                            let _ = tx.send(settings);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to reload config, keeping old settings");
                    }
                }
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.poll_interval_secs, 60);
        assert_eq!(settings.request_timeout_secs, 30);
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert!(settings.notifications.enabled);
        assert!(settings.accounts.is_empty());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            poll_interval_secs = 30

            [notifications]
            enabled = false

            [[accounts]]
            name = "alice"
            cookie = "c1"

            [[accounts]]
            name = "bob"
            cookie = "sid=1"
            cookie2 = "jwt=2"
            locale = "zh-TW"
        "#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.poll_interval_secs, 30);
        assert!(!settings.notifications.enabled);
        assert_eq!(settings.default_log_filter(), "info");
        assert_eq!(settings.accounts.len(), 2);

        let alice = settings.account("alice").unwrap();
        assert_eq!(alice.cookie2, "");
        assert_eq!(alice.locale, DEFAULT_LOCALE);

        let creds = settings.account("bob").unwrap().credentials();
        assert_eq!(creds.locale, "zh-TW");
        assert_eq!(creds.cookie_header(), Some("sid=1; jwt=2".to_string()));
    }

    #[test]
    fn test_debug_lowers_log_filter() {
        let settings: Settings = toml::from_str("debug = true").unwrap();
        assert!(settings.debug);
        assert_eq!(settings.default_log_filter(), "debug");
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.poll_interval_secs = 5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.request_timeout_secs = 0;
        assert!(settings.validate().is_err());

        let account = AccountSettings {
            name: "alice".to_string(),
            cookie: "c1".to_string(),
            cookie2: String::new(),
            locale: default_locale(),
        };
        let mut settings = Settings::default();
        settings.accounts = vec![account.clone(), account];
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.accounts = vec![AccountSettings {
            name: "  ".to_string(),
            cookie: String::new(),
            cookie2: String::new(),
            locale: default_locale(),
        }];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[accounts]]
name = "alice"
cookie = "c1"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.accounts.len(), 1);
        assert_eq!(settings.accounts[0].name, "alice");
    }

    #[test]
    fn test_load_from_rejects_invalid() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "poll_interval_secs = 1").unwrap();
        assert!(Settings::load_from(file.path()).is_err());
    }

    #[tokio::test]
    async fn test_watcher_reports_current_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[accounts]]\nname = \"alice\"\ncookie = \"c1\"\n").unwrap();

        let watcher = SettingsWatcher::with_path(path).unwrap();
        let settings = watcher.get().await;
        assert_eq!(settings.accounts.len(), 1);
    }
}
