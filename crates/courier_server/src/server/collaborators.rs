#![forbid(unsafe_code)]

use async_trait::async_trait;
use courier_domain::{ActorId, ChatId, ChatMessage, MessageDraft};
use thiserror::Error;

/// Errors surfaced by the external persistence collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("unknown chat: {0}")]
	UnknownChat(ChatId),

	#[error("store unavailable: {0}")]
	Unavailable(String),
}

/// External message persistence. The delivery layer only needs "record
/// this draft durably and give it an id and timestamp".
#[async_trait]
pub trait MessageStore: Send + Sync {
	async fn persist_message(&self, draft: MessageDraft) -> Result<ChatMessage, StoreError>;
}

/// External chat membership lookup, used to scope fan-out to the
/// participants of a chat instead of the whole connected population.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
	async fn active_participants(&self, chat_id: ChatId) -> Result<Vec<ActorId>, StoreError>;
}
