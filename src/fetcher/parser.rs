//! Defensive parsing of the active-orders response.
//!
//! The endpoint is unofficial and unversioned. Missing or renamed fields
//! degrade to "no active order"; only a body that is not a JSON object at
//! all is treated as an error.

use crate::core::error::FetchError;
use crate::core::models::OrderSnapshot;
use chrono::Utc;
use serde_json::Value;

const AUTH_FAILURE_CODES: &[&str] = &["401", "403", "unauthorized", "unauthenticated", "forbidden"];
const AUTH_FAILURE_HINTS: &[&str] = &["unauthorized", "not logged in", "login required", "session expired"];

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Snapshot(OrderSnapshot),
    AuthRejected,
}

pub fn parse_active_orders(body: &str) -> Result<ParsedResponse, FetchError> {
    let root: Value = serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    if !root.is_object() {
        return Err(FetchError::Parse("response is not a JSON object".to_string()));
    }

    if root.get("status").and_then(Value::as_str) == Some("failure") {
        if is_auth_failure(&root) {
            return Ok(ParsedResponse::AuthRejected);
        }
        let code = failure_code(&root).unwrap_or_else(|| "unknown".to_string());
        return Err(FetchError::Parse(format!("upstream reported failure: {}", code)));
    }

    let order = root
        .pointer("/data/orders")
        .and_then(Value::as_array)
        .and_then(|orders| orders.iter().find(|o| order_id(o).is_some()));

    let Some(order) = order else {
        return Ok(ParsedResponse::Snapshot(OrderSnapshot::no_order()));
    };

    let status_card = order.pointer("/feedCards/0/status");

    let status = status_card
        .and_then(|s| text_at(s, "/titleSummary/summary/text"))
        .or_else(|| text_at(order, "/activeOrderOverview/title"));
    let eta = status_card
        .and_then(|s| text_at(s, "/timeSummary/summary/text"))
        .or_else(|| text_at(order, "/activeOrderOverview/subtitle"));
    let progress = status_card
        .and_then(|s| s.get("currentProgress"))
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok());

    Ok(ParsedResponse::Snapshot(OrderSnapshot {
        order_id: order_id(order),
        status,
        eta,
        restaurant: text_at(order, "/orderInfo/storeInfo/name"),
        progress,
        active: true,
        fetched_at: Utc::now(),
    }))
}

fn order_id(order: &Value) -> Option<String> {
    text_at(order, "/uuid")
}

fn text_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn failure_code(root: &Value) -> Option<String> {
    match root.pointer("/data/code")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_auth_failure(root: &Value) -> bool {
    if let Some(code) = failure_code(root) {
        let code = code.to_lowercase();
        if AUTH_FAILURE_CODES.contains(&code.as_str()) {
            return true;
        }
    }

    root.pointer("/data/message")
        .and_then(Value::as_str)
        .map(|m| {
            let m = m.to_lowercase();
            AUTH_FAILURE_HINTS.iter().any(|hint| m.contains(hint))
        })
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    pub(crate) fn no_orders() -> String {
        json!({"status": "success", "data": {"orders": []}}).to_string()
    }

    pub(crate) fn active_order(id: &str, status: &str) -> String {
        json!({
            "status": "success",
            "data": {
                "orders": [{
                    "uuid": id,
                    "orderInfo": {"storeInfo": {"name": "Noodle Bar"}},
                    "feedCards": [{
                        "status": {
                            "currentProgress": 2,
                            "titleSummary": {"summary": {"text": status}},
                            "timeSummary": {"summary": {"text": "12:30 - 12:40"}}
                        }
                    }]
                }]
            }
        })
        .to_string()
    }

    pub(crate) fn auth_failure() -> String {
        json!({"status": "failure", "data": {"code": "401", "message": "Unauthorized"}}).to_string()
    }
}
