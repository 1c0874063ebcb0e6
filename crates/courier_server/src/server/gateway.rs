#![forbid(unsafe_code)]

//! Websocket session gateway.
//!
//! One task per connection runs the session state machine: authenticate
//! the path token, register with the connection registry, then pump
//! frames until the client leaves or misbehaves. A paired writer task
//! drains the connection's outbound queue so slow readers never stall
//! dispatch.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use courier_protocol::{ClientCommand, ServerEvent};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::server::registry::{ConnectionHandle, EnqueueError};
use crate::server::state::AppState;

/// Why a session ended. Logged at close; never sent to the client
/// beyond the close frame itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
	ClientClosed,
	TransportError,
	ProtocolError,
	WriterGone,
}

impl CloseReason {
	fn as_str(self) -> &'static str {
		match self {
			CloseReason::ClientClosed => "client_closed",
			CloseReason::TransportError => "transport_error",
			CloseReason::ProtocolError => "protocol_error",
			CloseReason::WriterGone => "writer_gone",
		}
	}
}

/// Decrements the active-connection gauge when the session task ends,
/// no matter which path it exits through.
struct ConnectionGaugeGuard;

impl ConnectionGaugeGuard {
	fn acquire() -> Self {
		metrics::gauge!("courier_server_active_connections").increment(1);
		Self
	}
}

impl Drop for ConnectionGaugeGuard {
	fn drop(&mut self) {
		metrics::gauge!("courier_server_active_connections").decrement(1);
	}
}

/// `GET /ws/{token}` upgrade handler.
pub async fn ws_handler(
	State(state): State<AppState>,
	Path(token): Path<String>,
	ws: WebSocketUpgrade,
) -> Response {
	ws.on_upgrade(move |socket| run_session(state, socket, token))
}

/// Drives one websocket session from handshake to teardown.
async fn run_session(state: AppState, mut socket: WebSocket, token: String) {
	metrics::counter!("courier_server_connections_total").increment(1);

	// Credential check happens before any registry mutation: a rejected
	// session leaves no trace beyond the auth-failure counter.
	let actor = match state.verifier.verify(&token) {
		Ok(actor) => actor,
		Err(err) => {
			metrics::counter!("courier_server_auth_failures_total").increment(1);
			debug!(error = %err, "gateway: rejecting unauthenticated session");
			let _ = socket
				.send(Message::Close(Some(CloseFrame {
					code: close_code::POLICY,
					reason: "authentication failed".into(),
				})))
				.await;
			return;
		}
	};

	let (conn, mut outbound_rx) = ConnectionHandle::channel(actor, state.settings.outbound_queue_capacity);
	let conn_id = conn.id();
	state.registry.register(conn.clone()).await;
	let _gauge = ConnectionGaugeGuard::acquire();
	info!(%actor, %conn_id, "gateway: session open");

	let (mut sink, mut stream) = socket.split();
	let max_frame = state.settings.max_frame_bytes;

	let mut writer_task = tokio::spawn(async move {
		while let Some(event) = outbound_rx.recv().await {
			let text = match courier_protocol::encode_event(&event, max_frame) {
				Ok(text) => text,
				Err(err) => {
					warn!(error = %err, "gateway: dropping unencodable event");
					continue;
				}
			};
			if sink.send(Message::Text(text.into())).await.is_err() {
				break;
			}
			metrics::counter!("courier_server_frames_out_total").increment(1);
		}
	});

	let close_reason = loop {
		let frame = match stream.next().await {
			Some(Ok(frame)) => frame,
			Some(Err(err)) => {
				debug!(%actor, %conn_id, error = %err, "gateway: transport error");
				break CloseReason::TransportError;
			}
			None => break CloseReason::ClientClosed,
		};

		match frame {
			Message::Text(text) => {
				metrics::counter!("courier_server_frames_in_total").increment(1);
				match courier_protocol::decode_command(text.as_str(), max_frame) {
					Ok(cmd) => handle_command(&state, &conn, cmd).await,
					Err(err) => {
						metrics::counter!("courier_server_decode_errors_total").increment(1);
						debug!(%actor, %conn_id, error = %err, "gateway: undecodable frame");
						match conn.enqueue(ServerEvent::Error {
							code: "PROTOCOL_ERROR".to_string(),
							message: "malformed frame".to_string(),
						}) {
							Ok(()) | Err(EnqueueError::Full) => {}
							Err(EnqueueError::Closed) => break CloseReason::WriterGone,
						}
						break CloseReason::ProtocolError;
					}
				}
			}
			Message::Binary(_) => {
				// Text-only protocol; binary frames are a client bug.
				metrics::counter!("courier_server_decode_errors_total").increment(1);
				break CloseReason::ProtocolError;
			}
			Message::Ping(_) | Message::Pong(_) => {}
			Message::Close(_) => break CloseReason::ClientClosed,
		}

		if conn.is_closed() {
			break CloseReason::WriterGone;
		}
	};

	// Single teardown path: the connection leaves the registry exactly
	// once regardless of which branch ended the loop.
	state.registry.unregister(actor, conn_id).await;

	// Dropping the last queue sender lets the writer drain what is still
	// queued (a protocol error frame, typically) and exit on its own;
	// abort only if it wedges on an unresponsive peer.
	drop(conn);
	if tokio::time::timeout(Duration::from_secs(5), &mut writer_task).await.is_err() {
		writer_task.abort();
	}
	info!(%actor, %conn_id, reason = close_reason.as_str(), "gateway: session closed");
}

/// Applies one decoded client command to the session.
pub(crate) async fn handle_command(state: &AppState, conn: &ConnectionHandle, cmd: ClientCommand) {
	match cmd {
		ClientCommand::Typing { chat_id, is_typing } => {
			let event = crate::server::dispatcher::EventDispatcher::encode_typing_indicator(chat_id, conn.actor(), is_typing);
			if let Err(err) = state.dispatcher.deliver_to_chat(chat_id, &event).await {
				warn!(%chat_id, error = %err, "gateway: typing fan-out failed");
			}
		}
		ClientCommand::Ping { timestamp } => {
			// Pong goes only to the connection that pinged, not to the
			// actor's other devices.
			let _ = conn.enqueue(ServerEvent::Pong { timestamp });
		}
		ClientCommand::Call { chat_id, data } => {
			let event = crate::server::dispatcher::EventDispatcher::encode_call_signal(data);
			match chat_id {
				Some(chat_id) => {
					if let Err(err) = state.dispatcher.deliver_to_chat(chat_id, &event).await {
						warn!(%chat_id, error = %err, "gateway: call fan-out failed");
					}
				}
				None => {
					state.dispatcher.broadcast(&event).await;
				}
			}
		}
		ClientCommand::Unknown => {
			// Tolerated for forward compatibility.
			debug!(actor = %conn.actor(), "gateway: ignoring unknown command");
		}
	}
}
