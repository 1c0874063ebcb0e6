#![forbid(unsafe_code)]

use std::sync::Arc;

use courier_domain::{ActorId, ChatId, ChatMessage};
use courier_protocol::ServerEvent;
use tracing::debug;

use crate::server::collaborators::{ParticipantDirectory, StoreError};
use crate::server::registry::{ConnectionRegistry, EnqueueError};

/// Outcome of one fan-out call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
	pub attempted: usize,
	pub succeeded: usize,
	pub failed: usize,
}

impl DeliveryReport {
	fn absorb(&mut self, other: DeliveryReport) {
		self.attempted += other.attempted;
		self.succeeded += other.succeeded;
		self.failed += other.failed;
	}
}

/// Translates domain events into wire payloads and routes them through
/// the connection registry.
///
/// Delivery is best-effort and at-most-once per live connection: a
/// failed enqueue is counted and skipped, never retried, and never
/// unregisters the connection (the gateway owning the stream does that
/// when it notices its own transport is broken).
pub struct EventDispatcher {
	registry: Arc<ConnectionRegistry>,
	directory: Arc<dyn ParticipantDirectory>,
}

impl EventDispatcher {
	pub fn new(registry: Arc<ConnectionRegistry>, directory: Arc<dyn ParticipantDirectory>) -> Self {
		Self { registry, directory }
	}

	/// Wire payload for a persisted chat message.
	pub fn encode_message_event(message: ChatMessage) -> ServerEvent {
		ServerEvent::Message { data: message }
	}

	/// Wire payload for a typing start/stop signal.
	pub fn encode_typing_indicator(chat_id: ChatId, actor_id: ActorId, is_typing: bool) -> ServerEvent {
		ServerEvent::TypingIndicator {
			chat_id,
			user_id: actor_id,
			is_typing,
		}
	}

	/// Wire payload for an opaque call signal.
	pub fn encode_call_signal(call_data: serde_json::Value) -> ServerEvent {
		ServerEvent::CallNotification { data: call_data }
	}

	/// Send `event` to every connection currently registered for the
	/// actor. Per-connection failures are isolated: the remaining
	/// connections still get the event.
	pub async fn deliver_to_actor(&self, actor: ActorId, event: &ServerEvent) -> DeliveryReport {
		let snapshot = self.registry.connections_for(actor).await;
		self.deliver_to_snapshot(snapshot, event)
	}

	/// Send `event` to every open connection of every actor.
	pub async fn broadcast(&self, event: &ServerEvent) -> DeliveryReport {
		let snapshot = self.registry.all_connections().await;
		self.deliver_to_snapshot(snapshot, event)
	}

	/// Fan `event` out to each active participant of a chat, one
	/// `deliver_to_actor` per participant. Offline participants simply
	/// contribute zero attempts; they reconcile via history fetch.
	pub async fn deliver_to_chat(&self, chat_id: ChatId, event: &ServerEvent) -> Result<DeliveryReport, StoreError> {
		let participants = self.directory.active_participants(chat_id).await?;

		let mut report = DeliveryReport::default();
		for actor in participants {
			report.absorb(self.deliver_to_actor(actor, event).await);
		}

		debug!(
			%chat_id,
			attempted = report.attempted,
			failed = report.failed,
			"dispatcher: chat fan-out complete"
		);
		Ok(report)
	}

	fn deliver_to_snapshot(
		&self,
		snapshot: Vec<crate::server::registry::ConnectionHandle>,
		event: &ServerEvent,
	) -> DeliveryReport {
		let mut report = DeliveryReport {
			attempted: snapshot.len(),
			..DeliveryReport::default()
		};

		for conn in &snapshot {
			match conn.enqueue(event.clone()) {
				Ok(()) => report.succeeded += 1,
				Err(EnqueueError::Full) => {
					report.failed += 1;
					metrics::counter!("courier_server_delivery_dropped_full_total").increment(1);
				}
				Err(EnqueueError::Closed) => {
					report.failed += 1;
					metrics::counter!("courier_server_delivery_dropped_closed_total").increment(1);
				}
			}
		}

		metrics::counter!("courier_server_deliveries_total").increment(report.succeeded as u64);
		report
	}
}
