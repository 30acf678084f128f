use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use utoipa::ToSchema;

/// Response headers that may carry the remote's rate-limit budget, in priority order.
pub const RATE_LIMIT_HEADERS: &[&str] = &[
    "rate-limit-daily",
    "x-ratelimit-limit",
    "x-singular-ratelimit-daily-calls",
    "x-ratelimit-daily",
    "x-rate-limit-limit",
    "ratelimit-limit",
    "ratelimit",
];

/// Parsed value of a rate-limit header.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum RateLimitValue {
    /// JSON object with the remote's budget.
    Structured {
        #[schema(value_type = Object)]
        limit: Option<Value>,
        #[schema(value_type = Object)]
        remaining: Option<Value>,
        #[schema(value_type = Object)]
        reset: Option<Value>,
    },
    /// Anything that did not parse as the structured shape.
    Raw(String),
}

/// Header captured from one remote response.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CapturedRateLimit {
    /// Header name as listed in [`RATE_LIMIT_HEADERS`].
    pub header: String,
    pub value: RateLimitValue,
}

#[derive(Debug, Deserialize)]
struct StructuredBudget {
    #[serde(default)]
    limit: Option<Value>,
    #[serde(default)]
    remaining: Option<Value>,
    #[serde(default)]
    reset: Option<Value>,
}

fn parse_value(raw: &str) -> RateLimitValue {
    match serde_json::from_str::<StructuredBudget>(raw) {
        Ok(budget)
            if budget.limit.is_some() || budget.remaining.is_some() || budget.reset.is_some() =>
        {
            RateLimitValue::Structured {
                limit: budget.limit,
                remaining: budget.remaining,
                reset: budget.reset,
            }
        }
        _ => RateLimitValue::Raw(raw.to_string()),
    }
}

/// Pick the first known rate-limit header (case-insensitive) out of a response's headers.
pub fn capture_rate_limit<'a, I>(headers: I) -> Option<CapturedRateLimit>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let headers: Vec<(&str, &str)> = headers.into_iter().collect();
    RATE_LIMIT_HEADERS.iter().find_map(|known| {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(known))
            .map(|(_, value)| CapturedRateLimit {
                header: (*known).to_string(),
                value: parse_value(value.trim()),
            })
    })
}

/// Last captured rate-limit header per court. Advisory only.
#[derive(Debug, Default)]
pub struct RateHeaderStore {
    latest: Mutex<HashMap<String, CapturedRateLimit>>,
}

impl RateHeaderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the latest capture for a court.
    pub async fn store(&self, kort_id: &str, captured: CapturedRateLimit) {
        self.latest
            .lock()
            .await
            .insert(kort_id.to_string(), captured);
    }

    /// Latest capture for a court.
    pub async fn get(&self, kort_id: &str) -> Option<CapturedRateLimit> {
        self.latest.lock().await.get(kort_id).cloned()
    }

    /// Forget a removed court.
    pub async fn forget(&self, kort_id: &str) {
        self.latest.lock().await.remove(kort_id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn structured_json_header_is_parsed() {
        let captured = capture_rate_limit([
            ("Content-Type", "application/json"),
            (
                "X-RateLimit-Limit",
                r#"{"limit": 1000, "remaining": 12, "reset": "2024-06-01T00:00:00Z"}"#,
            ),
        ])
        .unwrap();
        assert_eq!(captured.header, "x-ratelimit-limit");
        assert_eq!(
            captured.value,
            RateLimitValue::Structured {
                limit: Some(json!(1000)),
                remaining: Some(json!(12)),
                reset: Some(json!("2024-06-01T00:00:00Z")),
            }
        );
    }

    #[test]
    fn plain_value_is_kept_raw() {
        let captured = capture_rate_limit([("x-singular-ratelimit-daily-calls", "4312")]).unwrap();
        assert_eq!(captured.value, RateLimitValue::Raw("4312".into()));
    }

    #[test]
    fn list_order_decides_between_multiple_headers() {
        let captured = capture_rate_limit([
            ("x-ratelimit-limit", "100"),
            ("Rate-Limit-Daily", "5000"),
        ])
        .unwrap();
        assert_eq!(captured.header, "rate-limit-daily");
    }

    #[test]
    fn no_known_header_yields_none() {
        assert!(capture_rate_limit([("server", "nginx")]).is_none());
    }
}
