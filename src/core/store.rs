use crate::core::models::{Availability, FetcherState, OrderSnapshot, UnavailableReason};
use crate::core::notifications::{classify_change, OrderEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone)]
pub struct AccountEntry {
    pub snapshot: Option<OrderSnapshot>,
    pub availability: Availability,
    pub state: FetcherState,
    pub last_success: Option<DateTime<Utc>>,
    /// Order transition caused by the most recent successful refresh.
    pub last_event: Option<OrderEvent>,
}

impl Default for AccountEntry {
    fn default() -> Self {
        Self {
            snapshot: None,
            availability: Availability::Unavailable(UnavailableReason::Transient(
                "not fetched yet".to_string(),
            )),
            state: FetcherState::default(),
            last_success: None,
            last_event: None,
        }
    }
}

/// Last-known-good order data for every configured account.
#[derive(Clone)]
pub struct OrderStore {
    inner: Arc<RwLock<HashMap<String, AccountEntry>>>,
    updates: broadcast::Sender<String>,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            updates,
        }
    }

    /// Receives the account name every time that account's entry changes.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }

    pub async fn get(&self, account: &str) -> Option<AccountEntry> {
        self.inner.read().await.get(account).cloned()
    }

    #[cfg(test)]
    pub async fn get_snapshot(&self, account: &str) -> Option<OrderSnapshot> {
        self.inner
            .read()
            .await
            .get(account)
            .and_then(|e| e.snapshot.clone())
    }

    #[cfg(test)]
    pub async fn get_availability(&self, account: &str) -> Option<Availability> {
        self.inner
            .read()
            .await
            .get(account)
            .map(|e| e.availability.clone())
    }

    /// Replaces the snapshot and marks the account available. Returns the
    /// order transition from the previous snapshot, if any.
    pub async fn update_snapshot(
        &self,
        account: &str,
        snapshot: OrderSnapshot,
        state: FetcherState,
    ) -> Option<OrderEvent> {
        let event = {
            let mut inner = self.inner.write().await;
            let entry = inner.entry(account.to_string()).or_default();
            let event = classify_change(entry.snapshot.as_ref(), &snapshot);
            entry.last_success = Some(snapshot.fetched_at);
            entry.availability = Availability::Available;
            entry.state = state;
            entry.snapshot = Some(snapshot);
            entry.last_event = event.clone();
            event
        };
        let _ = self.updates.send(account.to_string());
        event
    }

    /// Marks the account unavailable. The last snapshot is left in place.
    pub async fn set_unavailable(
        &self,
        account: &str,
        reason: UnavailableReason,
        state: FetcherState,
    ) {
        {
            let mut inner = self.inner.write().await;
            let entry = inner.entry(account.to_string()).or_default();
            entry.availability = Availability::Unavailable(reason);
            entry.state = state;
        }
        let _ = self.updates.send(account.to_string());
    }

    pub async fn remove(&self, account: &str) -> bool {
        self.inner.write().await.remove(account).is_some()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn all_entries(&self) -> Vec<(String, AccountEntry)> {
        let mut entries: Vec<(String, AccountEntry)> = self
            .inner
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_snapshot(id: &str, status: &str) -> OrderSnapshot {
        OrderSnapshot {
            order_id: Some(id.to_string()),
            status: Some(status.to_string()),
            eta: None,
            restaurant: None,
            progress: None,
            active: true,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_store_update_and_get() {
        let store = OrderStore::new();
        let state = FetcherState {
            expired: false,
            ordered: true,
        };

        let event = store
            .update_snapshot("alice", active_snapshot("XYZ123", "preparing"), state)
            .await;
        assert_eq!(event, Some(OrderEvent::Placed));

        let snapshot = store.get_snapshot("alice").await.unwrap();
        assert_eq!(snapshot.order_id.as_deref(), Some("XYZ123"));
        assert_eq!(store.get_availability("alice").await, Some(Availability::Available));

        let event = store
            .update_snapshot("alice", active_snapshot("XYZ123", "preparing"), state)
            .await;
        assert!(event.is_none());
        assert!(store.get("alice").await.unwrap().last_event.is_none());

        let event = store
            .update_snapshot("alice", active_snapshot("XYZ123", "on the way"), state)
            .await;
        assert_eq!(event, Some(OrderEvent::StatusChanged));
        assert_eq!(
            store.get("alice").await.unwrap().last_event,
            Some(OrderEvent::StatusChanged)
        );
    }

    #[tokio::test]
    async fn test_unavailable_keeps_last_snapshot() {
        let store = OrderStore::new();
        store
            .update_snapshot(
                "alice",
                active_snapshot("XYZ123", "preparing"),
                FetcherState::default(),
            )
            .await;

        store
            .set_unavailable(
                "alice",
                UnavailableReason::AuthExpired,
                FetcherState {
                    expired: true,
                    ordered: true,
                },
            )
            .await;

        let entry = store.get("alice").await.unwrap();
        assert_eq!(
            entry.availability,
            Availability::Unavailable(UnavailableReason::AuthExpired)
        );
        assert!(entry.state.expired);
        assert_eq!(
            entry.snapshot.unwrap().status.as_deref(),
            Some("preparing")
        );
    }

    #[tokio::test]
    async fn test_update_broadcasts_account() {
        let store = OrderStore::new();
        let mut rx = store.subscribe();

        store
            .update_snapshot("bob", OrderSnapshot::no_order(), FetcherState::default())
            .await;

        assert_eq!(rx.recv().await.unwrap(), "bob");
    }

    #[tokio::test]
    async fn test_remove_and_empty() {
        let store = OrderStore::new();
        store
            .update_snapshot("alice", OrderSnapshot::no_order(), FetcherState::default())
            .await;
        assert!(!store.is_empty().await);

        assert!(store.remove("alice").await);
        assert!(!store.remove("alice").await);
        assert!(store.is_empty().await);
    }
}
