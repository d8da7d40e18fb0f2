use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::platform::{InboundEvent, UserId};
use crate::responder::AutoResponder;

#[derive(Clone)]
struct WebhookState {
    responder: Arc<AutoResponder>,
    verify_token: Arc<str>,
}

/// Rejections for an inbound delivery. All map to 400.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload has no {0}")]
    MissingField(&'static str),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        warn!("Rejected webhook delivery: {}", self);
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

// ── Payload ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    text: Option<TextBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    #[serde(default)]
    body: String,
}

/// Decode the first message of the first change of the first entry.
/// `Ok(None)` means the delivery carried no message (e.g. a status update).
fn decode_event(body: &[u8]) -> Result<Option<InboundEvent>, WebhookError> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;

    let entry = payload
        .entry
        .into_iter()
        .next()
        .ok_or(WebhookError::MissingField("entry"))?;
    let change = entry
        .changes
        .into_iter()
        .next()
        .ok_or(WebhookError::MissingField("changes"))?;

    let Some(message) = change.value.messages.into_iter().next() else {
        return Ok(None);
    };

    let sender = message
        .from
        .filter(|from| !from.is_empty())
        .ok_or(WebhookError::MissingField("message sender"))?;

    Ok(Some(InboundEvent {
        sender_id: UserId(sender),
        text: message.text.map(|t| t.body).unwrap_or_default(),
    }))
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn verify(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or_default();
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or_default();
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == "subscribe" && !state.verify_token.is_empty() && token == &*state.verify_token {
        info!("Webhook verified successfully");
        return (StatusCode::OK, challenge).into_response();
    }

    warn!("Webhook verification rejected (mode: {:?})", mode);
    StatusCode::FORBIDDEN.into_response()
}

async fn receive(
    State(state): State<WebhookState>,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    let Some(event) = decode_event(&body)? else {
        debug!("Webhook delivery without messages");
        return Ok(StatusCode::OK);
    };

    info!("New message from: {}", event.sender_id);

    // The platform redelivers on non-2xx, so send outcomes stay internal.
    let outcome = state.responder.handle_inbound(&event).await;
    debug!("Webhook reply outcome for {}: {:?}", event.sender_id, outcome);

    Ok(StatusCode::OK)
}

/// axum answers HEAD with the GET handler unless HEAD has its own route.
async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET,POST")])
}

/// `GET /webhook` for the subscription handshake, `POST /webhook` for deliveries.
pub fn routes(responder: Arc<AutoResponder>, verify_token: &str) -> Router {
    let state = WebhookState {
        responder,
        verify_token: Arc::from(verify_token),
    };

    Router::new()
        .route(
            "/webhook",
            get(verify).post(receive).head(method_not_allowed),
        )
        .with_state(state)
}
