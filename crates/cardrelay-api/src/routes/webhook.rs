use axum::{body::Bytes, extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::feishu::events::{EventEnvelope, MessageReceiveEvent, MESSAGE_RECEIVE_EVENT};
use crate::state::AppState;

/// Chat-surface event callback
///
/// Answers the URL-verification handshake, otherwise starts a turn for each
/// new text message and acknowledges right away. The answer is streamed
/// into the placeholder card in the background.
pub async fn handle_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let envelope: EventEnvelope = serde_json::from_slice(&body)?;
    verify_token(&state, &envelope)?;

    if let Some(challenge) = envelope.challenge.as_deref() {
        tracing::info!("Answering URL verification");
        return Ok(Json(json!({ "challenge": challenge })));
    }

    let event_type = envelope.event_type().unwrap_or_default();
    if event_type != MESSAGE_RECEIVE_EVENT {
        tracing::debug!(event_type, "Ignoring unsupported event");
        return Ok(acknowledged());
    }

    let event = envelope
        .event
        .ok_or_else(|| ApiError::BadRequest("event body missing".to_string()))?;
    let event: MessageReceiveEvent = serde_json::from_value(event)?;

    let Some(message) = event.into_inbound()? else {
        tracing::debug!("Ignoring non-text message");
        return Ok(acknowledged());
    };

    if !state.first_delivery(&message.turn_id) {
        tracing::info!(turn_id = %message.turn_id, "Ignoring redelivered message");
        return Ok(acknowledged());
    }

    tracing::info!(user_id = %message.user_id, turn_id = %message.turn_id, "Message received");
    // Both turn tasks run detached; failures are logged by the orchestrator
    let _tasks = state.orchestrator.handle_message(message);

    Ok(acknowledged())
}

/// Card interaction callback; the relay has no interactive elements
pub async fn handle_card(body: Bytes) -> ApiResult<Json<Value>> {
    let payload: Value = serde_json::from_slice(&body)?;
    if let Some(challenge) = payload.get("challenge").and_then(Value::as_str) {
        return Ok(Json(json!({ "challenge": challenge })));
    }
    tracing::debug!("Card callback acknowledged");
    Ok(acknowledged())
}

fn verify_token(state: &AppState, envelope: &EventEnvelope) -> ApiResult<()> {
    match state.config.feishu_verification_token.as_deref() {
        Some(expected) if envelope.verification_token() != Some(expected) => Err(ApiError::Unauthorized),
        _ => Ok(()),
    }
}

fn acknowledged() -> Json<Value> {
    Json(json!({ "code": 0 }))
}
