use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account: String,
    pub cookies: Vec<String>,
    pub locale: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, cookies: Vec<String>, locale: impl Into<String>) -> Self {
        let locale = locale.into();
        Self {
            account: account.into(),
            cookies,
            locale: if locale.trim().is_empty() {
                DEFAULT_LOCALE.to_string()
            } else {
                locale
            },
        }
    }

    /// Joins the non-empty cookie strings into a single `Cookie` header value.
    pub fn cookie_header(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .cookies
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: Option<String>,
    pub status: Option<String>,
    pub eta: Option<String>,
    pub restaurant: Option<String>,
    pub progress: Option<u32>,
    pub active: bool,
    pub fetched_at: DateTime<Utc>,
}

impl OrderSnapshot {
    pub fn no_order() -> Self {
        Self {
            order_id: None,
            status: None,
            eta: None,
            restaurant: None,
            progress: None,
            active: false,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherState {
    pub expired: bool,
    pub ordered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    Transient(String),
    AuthExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    Unavailable(UnavailableReason),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}
