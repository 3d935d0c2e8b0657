//! Verification of the signed requests automation platforms send
//!
//! The `Authorization` header carries an HS256 JWT signed with the shared
//! endpoint secret. The token is sent bare, a `Bearer ` prefix is tolerated.

use crate::error::ApiError;
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClaims {
    /// Platform user the request is made for
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub account_id: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Verify the request's token and return its claims
pub fn verify_request(headers: &HeaderMap, secret: &str) -> Result<RequestClaims, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization token"))?;

    let mut validation = Validation::new(Algorithm::HS256);
    // Platform tokens do not always carry an expiry
    validation.required_spec_claims.clear();

    let key = DecodingKey::from_secret(secret.as_bytes());
    let token_data = jsonwebtoken::decode::<RequestClaims>(token, &key, &validation)?;

    Ok(token_data.claims)
}
