#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("not a numeric id: {0}")]
	NotNumeric(String),
	#[error("unknown message type: {0}")]
	UnknownMessageType(String),
}

/// Authenticated user identity. Opaque to the delivery layer; issued by
/// the credential verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub i64);

impl ActorId {
	pub const fn as_i64(self) -> i64 {
		self.0
	}
}

impl fmt::Display for ActorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ActorId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		s.parse::<i64>().map(ActorId).map_err(|_| ParseIdError::NotNumeric(s.to_string()))
	}
}

/// Chat (conversation) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl ChatId {
	pub const fn as_i64(self) -> i64 {
		self.0
	}
}

impl fmt::Display for ChatId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Persisted message identifier, assigned by the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Identifier of one live duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
	/// Create a new random connection id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Kind tag carried on every chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
	#[default]
	Text,
	Image,
	File,
	Audio,
	Video,
}

impl MessageType {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageType::Text => "text",
			MessageType::Image => "image",
			MessageType::File => "file",
			MessageType::Audio => "audio",
			MessageType::Video => "video",
		}
	}
}

impl fmt::Display for MessageType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MessageType {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"text" => Ok(MessageType::Text),
			"image" => Ok(MessageType::Image),
			"file" => Ok(MessageType::File),
			"audio" => Ok(MessageType::Audio),
			"video" => Ok(MessageType::Video),
			other => Err(ParseIdError::UnknownMessageType(other.to_string())),
		}
	}
}

/// A chat message as recorded by the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub id: MessageId,
	pub chat_id: ChatId,
	pub sender_id: ActorId,
	pub content: String,
	pub message_type: MessageType,
	/// Unix milliseconds.
	pub created_at: i64,
}

/// A message as submitted by a client, before the store assigns an id
/// and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
	pub chat_id: ChatId,
	pub sender_id: ActorId,
	pub content: String,
	#[serde(default)]
	pub message_type: MessageType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to_id: Option<MessageId>,
}
