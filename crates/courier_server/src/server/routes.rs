#![forbid(unsafe_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_domain::{ActorId, ChatId, MessageDraft, MessageType};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::limiter::rules;
use crate::server::collaborators::StoreError;
use crate::server::dispatcher::EventDispatcher;
use crate::server::gateway::ws_handler;
use crate::server::guard::rate_limit_guard;
use crate::server::state::AppState;

/// Assembles the public router: message send, websocket upgrade, and
/// the health probes. Each guarded route carries its own rule name.
pub fn build_router(state: AppState) -> Router {
	let send_messages = Router::new()
		.route("/api/messages", post(send_message))
		.layer(middleware::from_fn_with_state(
			(state.clone(), rules::MESSAGE_SEND),
			rate_limit_guard,
		));

	let websocket = Router::new()
		.route("/ws/{token}", get(ws_handler))
		.layer(middleware::from_fn_with_state(
			(state.clone(), rules::GENERAL),
			rate_limit_guard,
		));

	Router::new()
		.merge(send_messages)
		.merge(websocket)
		.route("/healthz", get(healthz))
		.route("/readyz", get(readyz))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
	pub chat_id: ChatId,
	pub content: String,
	#[serde(default)]
	pub message_type: MessageType,
	#[serde(default)]
	pub reply_to_id: Option<courier_domain::MessageId>,
}

/// `POST /api/messages`: persist a message, then fan it out to the
/// chat's online participants. Persistence is authoritative; delivery
/// is best-effort and never fails the request.
async fn send_message(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(req): Json<SendMessageRequest>,
) -> Response {
	let Some(sender) = authenticated_actor(&state, &headers) else {
		return (
			StatusCode::UNAUTHORIZED,
			Json(json!({"detail": "missing or invalid credentials"})),
		)
			.into_response();
	};

	let draft = MessageDraft {
		chat_id: req.chat_id,
		sender_id: sender,
		content: req.content,
		message_type: req.message_type,
		reply_to_id: req.reply_to_id,
	};

	let message = match state.store.persist_message(draft).await {
		Ok(message) => message,
		Err(StoreError::UnknownChat(chat_id)) => {
			return (
				StatusCode::NOT_FOUND,
				Json(json!({"detail": format!("unknown chat {chat_id}")})),
			)
				.into_response();
		}
		Err(StoreError::Unavailable(reason)) => {
			warn!(reason, "routes: message store unavailable");
			return (
				StatusCode::SERVICE_UNAVAILABLE,
				Json(json!({"detail": "message store unavailable"})),
			)
				.into_response();
		}
	};

	let event = EventDispatcher::encode_message_event(message.clone());
	if let Err(err) = state.dispatcher.deliver_to_chat(message.chat_id, &event).await {
		warn!(chat_id = %message.chat_id, error = %err, "routes: message fan-out failed");
	}

	(StatusCode::CREATED, Json(message)).into_response()
}

fn authenticated_actor(state: &AppState, headers: &HeaderMap) -> Option<ActorId> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let token = value.strip_prefix("Bearer ")?;
	state.verifier.verify(token).ok()
}

async fn healthz() -> &'static str {
	"ok"
}

async fn readyz(State(state): State<AppState>) -> Response {
	if state.health.is_ready() {
		(StatusCode::OK, "ready").into_response()
	} else {
		(StatusCode::SERVICE_UNAVAILABLE, "starting").into_response()
	}
}
