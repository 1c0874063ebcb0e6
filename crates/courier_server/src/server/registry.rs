#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use courier_domain::{ActorId, ConnectionId};
use courier_protocol::ServerEvent;
use courier_util::time::unix_ms_now;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Handle to one live client connection.
///
/// The handle owns only the outbound queue; the websocket itself lives
/// in the gateway task that drains the queue. Cloning a handle clones
/// the queue sender, so a registry snapshot stays usable even if the
/// connection closes mid-iteration (sends just start failing).
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
	id: ConnectionId,
	actor: ActorId,
	created_at_unix_ms: i64,
	outbound: mpsc::Sender<ServerEvent>,
}

/// Why an enqueue did not hand the event to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
	/// The outbound queue is full (slow client).
	Full,
	/// The connection's writer task is gone.
	Closed,
}

impl ConnectionHandle {
	/// Create a handle plus the receiving half drained by the gateway's
	/// writer task.
	pub fn channel(actor: ActorId, queue_capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
		let (tx, rx) = mpsc::channel(queue_capacity);
		let handle = Self {
			id: ConnectionId::new_v4(),
			actor,
			created_at_unix_ms: unix_ms_now(),
			outbound: tx,
		};
		(handle, rx)
	}

	pub fn id(&self) -> ConnectionId {
		self.id
	}

	pub fn actor(&self) -> ActorId {
		self.actor
	}

	pub fn created_at_unix_ms(&self) -> i64 {
		self.created_at_unix_ms
	}

	/// Hand an event to this connection's outbound queue without
	/// blocking. Delivery to the wire is the writer task's job.
	pub fn enqueue(&self, event: ServerEvent) -> Result<(), EnqueueError> {
		self.outbound.try_send(event).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
			mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
		})
	}

	pub fn is_closed(&self) -> bool {
		self.outbound.is_closed()
	}
}

/// Live mapping from actor id to that actor's open connections.
///
/// Invariant: an actor appears in the map iff it has at least one open
/// connection; the entry is removed the instant its last connection
/// unregisters. All mutation happens under one lock, and no I/O ever
/// runs while the lock is held.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
	inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	by_actor: HashMap<ActorId, HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Add a connection to its actor's entry, creating the entry if
	/// absent. Registering the same connection id twice is a no-op
	/// (set semantics).
	pub async fn register(&self, handle: ConnectionHandle) {
		let actor = handle.actor();
		let conn_id = handle.id();

		let mut inner = self.inner.lock().await;
		let entry = inner.by_actor.entry(actor).or_default();
		entry.insert(conn_id, handle);

		debug!(%actor, %conn_id, conns = entry.len(), "registry: connection registered");
	}

	/// Remove a connection from its actor's entry, dropping the entry
	/// when it becomes empty. Unknown pairs are ignored; disconnect
	/// races are expected.
	pub async fn unregister(&self, actor: ActorId, conn_id: ConnectionId) {
		let mut inner = self.inner.lock().await;
		let Some(entry) = inner.by_actor.get_mut(&actor) else {
			return;
		};

		if entry.remove(&conn_id).is_some() {
			debug!(%actor, %conn_id, remaining = entry.len(), "registry: connection unregistered");
		}

		if entry.is_empty() {
			inner.by_actor.remove(&actor);
		}
	}

	/// Snapshot of the actor's open connections. The snapshot does not
	/// track later mutation; sends to a since-closed handle fail and
	/// are the caller's to count.
	pub async fn connections_for(&self, actor: ActorId) -> Vec<ConnectionHandle> {
		let inner = self.inner.lock().await;
		inner
			.by_actor
			.get(&actor)
			.map(|conns| conns.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Snapshot of every open connection across all actors.
	pub async fn all_connections(&self) -> Vec<ConnectionHandle> {
		let inner = self.inner.lock().await;
		inner.by_actor.values().flat_map(|conns| conns.values().cloned()).collect()
	}

	/// Number of actors with at least one open connection.
	pub async fn actor_count(&self) -> usize {
		self.inner.lock().await.by_actor.len()
	}

	/// Whether the actor currently has any open connection.
	pub async fn contains_actor(&self, actor: ActorId) -> bool {
		self.inner.lock().await.by_actor.contains_key(&actor)
	}
}
