mod client;
mod parser;

use crate::core::error::FetchError;
use crate::core::models::{Credentials, FetcherState, OrderSnapshot};
use std::sync::Arc;

pub use client::{HttpResponse, HttpTransport, OrderTransport};
pub use parser::{parse_active_orders, ParsedResponse};

#[cfg(test)]
pub(crate) use client::fake::FakeTransport;
#[cfg(test)]
pub(crate) use parser::fixtures;

/// Owns one account's credentials and performs one round trip per refresh.
///
/// `refresh` takes `&mut self`: a fetcher is owned by exactly one
/// coordinator task, so flags need no locking.
pub struct OrderFetcher {
    credentials: Credentials,
    transport: Arc<dyn OrderTransport>,
    state: FetcherState,
}

impl OrderFetcher {
    pub fn new(credentials: Credentials, transport: Arc<dyn OrderTransport>) -> Self {
        Self {
            credentials,
            transport,
            state: FetcherState::default(),
        }
    }

    pub fn account(&self) -> &str {
        &self.credentials.account
    }

    pub fn state(&self) -> FetcherState {
        self.state
    }

    pub fn expired(&self) -> bool {
        self.state.expired
    }

    #[cfg(test)]
    pub fn ordered(&self) -> bool {
        self.state.ordered
    }

    pub async fn refresh(&mut self) -> Result<OrderSnapshot, FetchError> {
        let response = self
            .transport
            .fetch_active_orders(&self.credentials)
            .await
            .inspect_err(|e| {
                tracing::debug!(account = %self.credentials.account, error = %e, "Order request failed");
            })?;

        match response.status {
            401 | 403 => return Err(self.mark_expired()),
            429 => return Err(FetchError::RateLimited),
            status if !(200..300).contains(&status) => {
                return Err(FetchError::Upstream { status });
            }
            _ => {}
        }

        match parse_active_orders(&response.body)? {
            ParsedResponse::AuthRejected => Err(self.mark_expired()),
            ParsedResponse::Snapshot(snapshot) => {
                self.state = FetcherState {
                    expired: false,
                    ordered: snapshot.active,
                };
                tracing::debug!(
                    account = %self.credentials.account,
                    ordered = snapshot.active,
                    order_id = ?snapshot.order_id,
                    "Fetched order status"
                );
                Ok(snapshot)
            }
        }
    }

    fn mark_expired(&mut self) -> FetchError {
        self.state.expired = true;
        FetchError::AuthExpired
    }
}
