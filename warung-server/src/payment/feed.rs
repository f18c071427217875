//! Transaction feed client
//!
//! Queries the external mutation/history API for inbound payments and
//! maps its heterogeneous rows onto one canonical [`Mutation`] shape.
//!
//! # Canonical adapter
//!
//! Feed providers disagree on field names. The adapter takes the first
//! present of each group, which is the versioned contract with the
//! provider:
//!
//! | Canonical | Accepted keys |
//! |-----------|----------------------------|
//! | amount | `amount`, `nominal`, `kredit` |
//! | direction | `status`, `type`, `jenis` |
//! | description | `desc`, `ket`, `remark` |
//!
//! Amounts may arrive as numbers or as formatted strings
//! ("Rp10.410"); formatting is stripped before parsing.

use async_trait::async_trait;
use serde::Deserialize;
use shared::FeedCredentials;
use thiserror::Error;

/// Feed errors
///
/// `Auth` is terminal for the querying order and escalated to the
/// operator; retrying cannot heal an invalid credential. Everything
/// else counts as transient and is retried until the tick ceiling.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed authentication failed: {0}")]
    Auth(String),

    #[error("Feed returned status '{status}': {message}")]
    Status { status: String, message: String },

    #[error("Feed payload malformed: {0}")]
    Shape(String),

    #[error("Feed request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl FeedError {
    /// Classify a non-success feed status. An auth-failure signature
    /// in the message wins over the generic status error.
    fn from_status(status: String, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| "unknown".to_string());
        let lowered = message.to_lowercase();
        if lowered.contains("token") || lowered.contains("auth") {
            FeedError::Auth(message)
        } else {
            FeedError::Status { status, message }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FeedError::Auth(_))
    }
}

/// A feed row in canonical shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Absolute amount in smallest currency units
    pub amount: i64,
    /// Lowercased direction marker; inbound credits contain "in"
    pub direction: String,
    /// Lowercased free-text description / remark
    pub description: String,
}

impl Mutation {
    pub fn is_inbound(&self) -> bool {
        self.direction.contains("in")
    }
}

/// Raw feed response envelope.
#[derive(Debug, Deserialize)]
struct FeedResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Seam for the order polling loop; production uses [`HttpFeed`],
/// tests inject a scripted feed.
#[async_trait]
pub trait TransactionFeed: Send + Sync {
    async fn fetch_mutations(&self, creds: &FeedCredentials) -> Result<Vec<Mutation>, FeedError>;
}

/// HTTP implementation of the transaction feed.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TransactionFeed for HttpFeed {
    async fn fetch_mutations(&self, creds: &FeedCredentials) -> Result<Vec<Mutation>, FeedError> {
        let url = format!("{}/api/mutations", self.base_url);
        let response: FeedResponse = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "username": creds.username,
                "auth_token": creds.auth_token,
                "account_id": creds.account_id,
            }))
            .send()
            .await?
            .json()
            .await?;

        parse_response(response)
    }
}

fn parse_response(response: FeedResponse) -> Result<Vec<Mutation>, FeedError> {
    if response.status != "success" {
        return Err(FeedError::from_status(response.status, response.message));
    }

    let rows = response
        .data
        .as_array()
        .ok_or_else(|| FeedError::Shape(format!("data is not an array: {}", response.data)))?;

    Ok(rows.iter().map(canonicalize).collect())
}

/// Map one raw feed row onto the canonical shape.
pub fn canonicalize(row: &serde_json::Value) -> Mutation {
    Mutation {
        amount: first_present(row, &["amount", "nominal", "kredit"])
            .map(value_to_amount)
            .unwrap_or(0),
        direction: first_present(row, &["status", "type", "jenis"])
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase(),
        description: first_present(row, &["desc", "ket", "remark"])
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase(),
    }
}

fn first_present<'a>(row: &'a serde_json::Value, keys: &[&str]) -> Option<&'a serde_json::Value> {
    keys.iter().find_map(|k| {
        row.get(k)
            .filter(|v| !v.is_null())
    })
}

/// Parse an amount that may be a number or a formatted string.
///
/// Amounts are integral smallest-currency units, so "." and "," in a
/// string are grouping separators, never decimal points.
fn value_to_amount(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            let parsed = digits.parse::<i64>().unwrap_or(0);
            if s.trim_start().starts_with('-') {
                -parsed
            } else {
                parsed
            }
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_each_field_alias() {
        let row = serde_json::json!({
            "nominal": "Rp10.410",
            "jenis": "IN",
            "ket": "Transfer masuk REF123"
        });
        let m = canonicalize(&row);
        assert_eq!(m.amount, 10410);
        assert_eq!(m.direction, "in");
        assert!(m.is_inbound());
        assert!(m.description.contains("ref123"));
    }

    #[test]
    fn grouped_string_amounts_parse_as_integral_units() {
        assert_eq!(value_to_amount(&serde_json::json!("Rp10.410")), 10_410);
        assert_eq!(value_to_amount(&serde_json::json!("1,250,000")), 1_250_000);
        assert_eq!(value_to_amount(&serde_json::json!("Rp 25.030,-")), 25_030);
        assert_eq!(value_to_amount(&serde_json::json!("-2.500")), -2_500);
        assert_eq!(value_to_amount(&serde_json::json!("no digits")), 0);
    }

    #[test]
    fn numeric_amounts_pass_through() {
        let row = serde_json::json!({ "amount": 10412, "status": "credit_in" });
        let m = canonicalize(&row);
        assert_eq!(m.amount, 10412);
        assert!(m.is_inbound());
    }

    #[test]
    fn missing_fields_default_empty() {
        let m = canonicalize(&serde_json::json!({}));
        assert_eq!(m.amount, 0);
        assert!(!m.is_inbound());
        assert!(m.description.is_empty());
    }

    #[test]
    fn non_success_status_is_retryable_error() {
        let response = FeedResponse {
            status: "error".into(),
            message: Some("server busy".into()),
            data: serde_json::Value::Null,
        };
        let err = parse_response(response).unwrap_err();
        assert!(!err.is_auth());
        assert!(matches!(err, FeedError::Status { .. }));
    }

    #[test]
    fn token_failure_classifies_as_auth() {
        let response = FeedResponse {
            status: "error".into(),
            message: Some("Invalid TOKEN supplied".into()),
            data: serde_json::Value::Null,
        };
        assert!(parse_response(response).unwrap_err().is_auth());
    }

    #[test]
    fn non_array_data_is_shape_error() {
        let response = FeedResponse {
            status: "success".into(),
            message: None,
            data: serde_json::json!({"unexpected": true}),
        };
        assert!(matches!(
            parse_response(response).unwrap_err(),
            FeedError::Shape(_)
        ));
    }
}
