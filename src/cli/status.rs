use crate::core::settings::Settings;
use crate::core::store::OrderStore;
use crate::daemon::coordinator;
use crate::daemon::entities::{self, EntityState};
use crate::daemon::{DBUS_NAME, DBUS_PATH};
use crate::fetcher::{HttpTransport, OrderFetcher, OrderTransport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct StatusOutput {
    entities: Vec<EntityState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<AccountError>,
    #[serde(with = "chrono::serde::ts_seconds")]
    fetched_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AccountError {
    account: String,
    error: String,
}

pub async fn run(json: bool, account_filter: Option<String>, from_daemon: bool) -> Result<()> {
    let output = if from_daemon {
        query_daemon(account_filter.as_deref()).await?
    } else {
        fetch_directly(account_filter.as_deref()).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&output);
    }

    Ok(())
}

async fn fetch_directly(account_filter: Option<&str>) -> Result<StatusOutput> {
    let settings = Settings::load()?;

    let accounts: Vec<_> = settings
        .accounts
        .iter()
        .filter(|a| account_filter.map_or(true, |f| a.name == f))
        .collect();

    if accounts.is_empty() {
        if let Some(filter) = account_filter {
            anyhow::bail!("Unknown account: {}", filter);
        } else {
            anyhow::bail!("No accounts configured. Check your configuration.");
        }
    }

    let transport: Arc<dyn OrderTransport> = Arc::new(HttpTransport::new(
        &settings.base_url,
        settings.request_timeout(),
    )?);
    let store = OrderStore::new();
    let mut errors = Vec::new();

    for account in accounts {
        let mut fetcher = OrderFetcher::new(account.credentials(), Arc::clone(&transport));
        if let Err(e) = coordinator::refresh_once(&mut fetcher, &store, false).await {
            errors.push(AccountError {
                account: account.name.clone(),
                error: e.to_string(),
            });
        }
    }

    Ok(StatusOutput {
        entities: entities::collect(&store).await,
        errors,
        fetched_at: Utc::now(),
    })
}

async fn query_daemon(account_filter: Option<&str>) -> Result<StatusOutput> {
    let connection = zbus::Connection::session()
        .await
        .context("Failed to connect to session D-Bus")?;

    let reply: String = connection
        .call_method(Some(DBUS_NAME), DBUS_PATH, Some(DBUS_NAME), "Status", &())
        .await
        .context("Failed to call Status method - is the daemon running?")?
        .body()
        .deserialize()
        .context("Failed to deserialize response")?;

    let entities: Vec<EntityState> =
        serde_json::from_str(&reply).context("Daemon returned invalid status JSON")?;

    let entities = entities
        .into_iter()
        .filter(|e| account_filter.map_or(true, |f| e.account == f))
        .collect();

    Ok(StatusOutput {
        entities,
        errors: Vec::new(),
        fetched_at: Utc::now(),
    })
}

fn print_text_output(output: &StatusOutput) {
    let mut current_account: Option<&str> = None;

    for entity in &output.entities {
        if current_account != Some(entity.account.as_str()) {
            if current_account.is_some() {
                println!();
            }
            println!("{}", entity.account);
            current_account = Some(entity.account.as_str());
        }

        let value = if entity.available {
            entity.state.as_deref().unwrap_or("-").to_string()
        } else {
            format!(
                "unavailable ({})",
                entity.unavailable_reason.as_deref().unwrap_or("unknown")
            )
        };

        println!("  {:<16} {}", format!("{}:", entity.kind.label()), value);
    }

    for error in &output.errors {
        println!("{}: Error: {}", error.account, error.error);
    }
}
