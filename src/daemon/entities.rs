use crate::core::models::{Availability, UnavailableReason};
use crate::core::store::{AccountEntry, OrderStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    OrderStatus,
    EstimatedTime,
    Restaurant,
    OrderActive,
    SessionExpired,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::OrderStatus,
        EntityKind::EstimatedTime,
        EntityKind::Restaurant,
        EntityKind::OrderActive,
        EntityKind::SessionExpired,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            EntityKind::OrderStatus => "order_status",
            EntityKind::EstimatedTime => "estimated_time",
            EntityKind::Restaurant => "restaurant",
            EntityKind::OrderActive => "order_active",
            EntityKind::SessionExpired => "session_expired",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::OrderStatus => "Order status",
            EntityKind::EstimatedTime => "Estimated time",
            EntityKind::Restaurant => "Restaurant",
            EntityKind::OrderActive => "Order active",
            EntityKind::SessionExpired => "Session expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub account: String,
    pub kind: EntityKind,
    pub state: Option<String>,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
}

pub fn entities_for(account: &str, entry: &AccountEntry) -> Vec<EntityState> {
    let available = entry.availability.is_available();
    let reason = match &entry.availability {
        Availability::Available => None,
        Availability::Unavailable(UnavailableReason::AuthExpired) => Some("auth_expired".to_string()),
        Availability::Unavailable(UnavailableReason::Transient(msg)) => Some(msg.clone()),
    };
    let snapshot = entry.snapshot.as_ref().filter(|s| s.active);

    EntityKind::ALL
        .iter()
        .map(|kind| {
            let (state, available) = match kind {
                EntityKind::OrderStatus => (snapshot.and_then(|s| s.status.clone()), available),
                EntityKind::EstimatedTime => (snapshot.and_then(|s| s.eta.clone()), available),
                EntityKind::Restaurant => (snapshot.and_then(|s| s.restaurant.clone()), available),
                EntityKind::OrderActive => (Some(on_off(entry.state.ordered)), available),
                // Stays readable while unavailable: it is the reason.
                EntityKind::SessionExpired => (Some(on_off(entry.state.expired)), true),
            };
            EntityState {
                entity_id: format!("{}.{}", slug(account), kind.key()),
                account: account.to_string(),
                kind: *kind,
                state,
                available,
                unavailable_reason: if available { None } else { reason.clone() },
            }
        })
        .collect()
}

pub async fn collect(store: &OrderStore) -> Vec<EntityState> {
    store
        .all_entries()
        .await
        .iter()
        .flat_map(|(account, entry)| entities_for(account, entry))
        .collect()
}

fn on_off(value: bool) -> String {
    let state = if value { "on" } else { "off" };
    state.to_string()
}

fn slug(account: &str) -> String {
    account
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{FetcherState, OrderSnapshot};
    use chrono::Utc;

    fn entity<'a>(entities: &'a [EntityState], kind: EntityKind) -> &'a EntityState {
        entities.iter().find(|e| e.kind == kind).unwrap()
    }

    #[test]
    fn test_idle_account() {
        let entry = AccountEntry {
            snapshot: Some(OrderSnapshot::no_order()),
            availability: Availability::Available,
            state: FetcherState::default(),
            last_success: Some(Utc::now()),
            last_event: None,
        };

        let entities = entities_for("Alice Smith", &entry);
        assert_eq!(entities.len(), 5);
        assert_eq!(entities[0].entity_id, "alice_smith.order_status");
        assert!(entity(&entities, EntityKind::OrderStatus).state.is_none());
        assert_eq!(
            entity(&entities, EntityKind::OrderActive).state.as_deref(),
            Some("off")
        );
        assert!(entities.iter().all(|e| e.available));
    }

    #[test]
    fn test_expired_account_keeps_expiry_entity_available() {
        let mut snapshot = OrderSnapshot::no_order();
        snapshot.active = true;
        snapshot.order_id = Some("XYZ123".to_string());
        snapshot.status = Some("preparing".to_string());

        let entry = AccountEntry {
            snapshot: Some(snapshot),
            availability: Availability::Unavailable(UnavailableReason::AuthExpired),
            state: FetcherState {
                expired: true,
                ordered: true,
            },
            last_success: None,
            last_event: None,
        };

        let entities = entities_for("alice", &entry);
        let status = entity(&entities, EntityKind::OrderStatus);
        assert!(!status.available);
        assert_eq!(status.state.as_deref(), Some("preparing"));
        assert_eq!(status.unavailable_reason.as_deref(), Some("auth_expired"));

        let expired = entity(&entities, EntityKind::SessionExpired);
        assert!(expired.available);
        assert_eq!(expired.state.as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn test_collect_from_store() {
        let store = OrderStore::new();
        store
            .update_snapshot("bob", OrderSnapshot::no_order(), FetcherState::default())
            .await;
        store
            .update_snapshot("alice", OrderSnapshot::no_order(), FetcherState::default())
            .await;

        let entities = collect(&store).await;
        assert_eq!(entities.len(), 10);
        assert_eq!(entities[0].account, "alice");
    }
}
