use crate::core::error::FetchError;
use crate::core::models::Credentials;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

const ACTIVE_ORDERS_PATH: &str = "/api/getActiveOrdersV1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// One round trip to the active-orders endpoint. Implementations must not
/// keep cookies between calls: every account passes its own.
#[async_trait]
pub trait OrderTransport: Send + Sync {
    async fn fetch_active_orders(&self, credentials: &Credentials) -> Result<HttpResponse, FetchError>;
}

/// Process-wide HTTP transport shared by every account.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eats-bar/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, ACTIVE_ORDERS_PATH)
    }

    fn request(&self, credentials: &Credentials) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(self.endpoint())
            .query(&[("localeCode", credentials.locale.as_str())])
            .header("x-csrf-token", "x")
            .json(&serde_json::json!({}));

        match credentials.cookie_header() {
            Some(cookie) => request.header(reqwest::header::COOKIE, cookie),
            None => request,
        }
    }
}

#[async_trait]
impl OrderTransport for HttpTransport {
    async fn fetch_active_orders(&self, credentials: &Credentials) -> Result<HttpResponse, FetchError> {
        let response = self.request(credentials).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}
