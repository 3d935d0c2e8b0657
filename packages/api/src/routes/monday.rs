//! Automation platform endpoints
//!
//! The platform calls `subscribe` when a user adds the integration recipe
//! to a board, `unsubscribe` when it is removed, and `tweet-definition` to
//! learn the shape of the items the integration emits.

use crate::auth::verify_request;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/tweet-definition", post(tweet_definition))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub payload: SubscribePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub input_fields: InputFields,
    pub webhook_url: String,
}

#[derive(Debug, Deserialize)]
pub struct InputFields {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub payload: UnsubscribePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribePayload {
    #[serde(deserialize_with = "string_or_number")]
    pub webhook_id: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[tracing::instrument(name = "POST /monday/subscribe", skip(state, headers, body))]
async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let claims = verify_request(&headers, &state.endpoint_secret)?;
    let Json(body) = body?;
    let user_id = claims
        .user_id
        .ok_or_else(|| ApiError::unauthorized("Token carries no userId"))?;

    let SubscribePayload {
        input_fields,
        webhook_url,
    } = body.payload;
    tracing::info!(user_id = %user_id, webhook = %webhook_url, "Subscribe");

    state
        .manager
        .subscribe(&user_id, &input_fields.query, &webhook_url)
        .await?;

    Ok(StatusCode::OK)
}

#[tracing::instrument(name = "POST /monday/unsubscribe", skip(state, headers, body))]
async fn unsubscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    verify_request(&headers, &state.endpoint_secret)?;
    let Json(body) = body?;

    let destination_url = state
        .manager
        .config()
        .destination_url(&body.payload.webhook_id);
    let report = state.manager.unsubscribe(&destination_url).await?;

    if !report.is_clean() {
        tracing::warn!(report = ?report, "Unsubscribe left elements behind");
    }

    Ok(StatusCode::OK)
}

/// One output field of a delivered item
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub id: &'static str,
    pub title: &'static str,
    pub outbound_type: &'static str,
    pub inbound_types: &'static [&'static str],
}

pub const TWEET_FIELDS: &[FieldDefinition] = &[
    FieldDefinition {
        id: "id",
        title: "Id",
        outbound_type: "text",
        inbound_types: &["text"],
    },
    FieldDefinition {
        id: "text",
        title: "Text",
        outbound_type: "text",
        inbound_types: &["empty_value", "text", "text_array"],
    },
    FieldDefinition {
        id: "username",
        title: "Username",
        outbound_type: "text",
        inbound_types: &["empty_value", "text", "text_array"],
    },
    FieldDefinition {
        id: "creationDate",
        title: "Creation Date",
        outbound_type: "date_time",
        inbound_types: &["date", "date_time"],
    },
];

#[tracing::instrument(name = "POST /monday/tweet-definition")]
async fn tweet_definition() -> Json<&'static [FieldDefinition]> {
    Json(TWEET_FIELDS)
}
