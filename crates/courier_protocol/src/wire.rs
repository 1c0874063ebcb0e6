#![forbid(unsafe_code)]

use courier_domain::{ActorId, ChatId, ChatMessage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum frame payload size for v1.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("json decode error: {0}")]
	Decode(#[source] serde_json::Error),

	#[error("json encode error: {0}")]
	Encode(#[source] serde_json::Error),
}

/// Server-originated frames delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
	/// A persisted chat message, fanned out to chat participants.
	Message {
		data: ChatMessage,
	},

	/// Someone started or stopped typing in a chat.
	TypingIndicator {
		chat_id: ChatId,
		user_id: ActorId,
		is_typing: bool,
	},

	/// Call signaling payload, opaque to the server.
	CallNotification {
		data: serde_json::Value,
	},

	/// Liveness reply; `timestamp` is echoed from the client's ping.
	Pong {
		timestamp: serde_json::Value,
	},

	/// Terminal protocol error, sent best-effort before closing.
	Error {
		code: String,
		message: String,
	},
}

/// Client-originated command frames.
///
/// Any tag not listed here decodes to [`ClientCommand::Unknown`] and is
/// ignored by the gateway (forward-compatible no-op).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
	Typing {
		chat_id: ChatId,
		#[serde(default)]
		is_typing: bool,
	},

	Ping {
		#[serde(default)]
		timestamp: serde_json::Value,
	},

	Call {
		#[serde(default)]
		chat_id: Option<ChatId>,
		#[serde(default)]
		data: serde_json::Value,
	},

	#[serde(other)]
	Unknown,
}

/// Encode a server event into one JSON text frame.
pub fn encode_event(event: &ServerEvent, max_frame_size: usize) -> Result<String, ProtocolError> {
	let text = serde_json::to_string(event).map_err(ProtocolError::Encode)?;
	if text.len() > max_frame_size {
		return Err(ProtocolError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	Ok(text)
}

/// Encode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_event_default(event: &ServerEvent) -> Result<String, ProtocolError> {
	encode_event(event, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode a single client command frame.
pub fn decode_command(text: &str, max_frame_size: usize) -> Result<ClientCommand, ProtocolError> {
	if text.len() > max_frame_size {
		return Err(ProtocolError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Decode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn decode_command_default(text: &str) -> Result<ClientCommand, ProtocolError> {
	decode_command(text, DEFAULT_MAX_FRAME_SIZE)
}
