#![forbid(unsafe_code)]

//! In-memory collaborator implementations for tests and dev runs.
//! Production deployments wire real persistence behind the same traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use courier_domain::{ActorId, ChatId, ChatMessage, MessageDraft, MessageId};
use courier_util::time::unix_ms_now;
use tokio::sync::{Mutex, RwLock};

use crate::server::collaborators::{MessageStore, ParticipantDirectory, StoreError};

/// Message store backed by a growable in-process vector.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
	next_id: AtomicI64,
	messages: Mutex<Vec<ChatMessage>>,
}

impl InMemoryMessageStore {
	pub fn new() -> Self {
		Self {
			next_id: AtomicI64::new(1),
			messages: Mutex::new(Vec::new()),
		}
	}

	/// Snapshot of everything persisted so far.
	pub async fn messages(&self) -> Vec<ChatMessage> {
		self.messages.lock().await.clone()
	}
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
	async fn persist_message(&self, draft: MessageDraft) -> Result<ChatMessage, StoreError> {
		let message = ChatMessage {
			id: MessageId(self.next_id.fetch_add(1, Ordering::Relaxed)),
			chat_id: draft.chat_id,
			sender_id: draft.sender_id,
			content: draft.content,
			message_type: draft.message_type,
			created_at: unix_ms_now(),
		};

		self.messages.lock().await.push(message.clone());
		Ok(message)
	}
}

/// Participant directory with an explicitly seeded membership table.
#[derive(Debug, Default)]
pub struct StaticParticipantDirectory {
	chats: RwLock<HashMap<ChatId, Vec<ActorId>>>,
}

impl StaticParticipantDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Directory pre-seeded with one demo chat (chat 1, actors 1 and 2)
	/// so a dev run has somewhere to deliver without a real membership
	/// source.
	pub fn demo() -> Self {
		let mut chats = HashMap::new();
		chats.insert(ChatId(1), vec![ActorId(1), ActorId(2)]);
		Self {
			chats: RwLock::new(chats),
		}
	}

	pub async fn set_participants(&self, chat_id: ChatId, participants: Vec<ActorId>) {
		self.chats.write().await.insert(chat_id, participants);
	}
}

#[async_trait]
impl ParticipantDirectory for StaticParticipantDirectory {
	async fn active_participants(&self, chat_id: ChatId) -> Result<Vec<ActorId>, StoreError> {
		self.chats
			.read()
			.await
			.get(&chat_id)
			.cloned()
			.ok_or(StoreError::UnknownChat(chat_id))
	}
}
