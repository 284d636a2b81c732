use crate::core::models::OrderSnapshot;
use anyhow::Result;
use notify_rust::Notification;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    Placed,
    StatusChanged,
    Completed,
    SessionExpired,
}

/// Decides whether moving from `previous` to `current` is worth telling the user about.
pub fn classify_change(previous: Option<&OrderSnapshot>, current: &OrderSnapshot) -> Option<OrderEvent> {
    match previous {
        None => current.active.then_some(OrderEvent::Placed),
        Some(prev) if !prev.active && current.active => Some(OrderEvent::Placed),
        Some(prev) if prev.active && !current.active => Some(OrderEvent::Completed),
        Some(prev) if prev.order_id != current.order_id && current.active => {
            Some(OrderEvent::Placed)
        }
        Some(prev) if current.active && prev.status != current.status => {
            Some(OrderEvent::StatusChanged)
        }
        Some(_) => None,
    }
}

pub fn send_order_notification(
    account: &str,
    event: &OrderEvent,
    snapshot: Option<&OrderSnapshot>,
) -> Result<()> {
    let status = snapshot
        .and_then(|s| s.status.as_deref())
        .unwrap_or("unknown");
    let restaurant = snapshot
        .and_then(|s| s.restaurant.as_deref())
        .unwrap_or("your order");

    let (summary, body) = match event {
        OrderEvent::Placed => (
            "Order placed".to_string(),
            format!("{}: {}", restaurant, status),
        ),
        OrderEvent::StatusChanged => {
            let eta = snapshot
                .and_then(|s| s.eta.as_deref())
                .map(|e| format!(" ({})", e))
                .unwrap_or_default();
            (restaurant.to_string(), format!("{}{}", status, eta))
        }
        OrderEvent::Completed => (
            "Order finished".to_string(),
            format!("No active order for {}", account),
        ),
        OrderEvent::SessionExpired => (
            "Session expired".to_string(),
            format!("Cookies for {} were rejected. Update the config.", account),
        ),
    };

    Notification::new()
        .summary(&summary)
        .body(&body)
        .appname("eats-bar")
        .timeout(notify_rust::Timeout::Milliseconds(5000))
        .show()?;

    tracing::info!(account = %account, event = ?event, "Sent order notification");

    Ok(())
}
