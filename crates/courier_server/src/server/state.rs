#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::limiter::RateLimiter;
use crate::server::auth::CredentialVerifier;
use crate::server::collaborators::MessageStore;
use crate::server::dispatcher::EventDispatcher;
use crate::server::registry::ConnectionRegistry;

/// Per-connection gateway settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
	/// Maximum queued outbound events per connection.
	pub outbound_queue_capacity: usize,

	/// Maximum accepted/emitted frame size in bytes.
	pub max_frame_bytes: usize,

	/// Whether to prefer `X-Forwarded-For`/`X-Real-IP` over the peer
	/// address when deriving rate-limit origins. Trusting these headers
	/// is only safe behind a proxy that sets them; a directly exposed
	/// deployment lets clients spoof their origin.
	pub trust_forwarded_headers: bool,
}

impl Default for GatewaySettings {
	fn default() -> Self {
		Self {
			outbound_queue_capacity: 1024,
			max_frame_bytes: courier_protocol::DEFAULT_MAX_FRAME_SIZE,
			trust_forwarded_headers: true,
		}
	}
}

/// Readiness flag flipped once startup completes.
#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

/// Shared handles for every request- and connection-handling task.
///
/// All services are constructed once at startup and passed by handle;
/// none of them is reachable through ambient global state, so tests can
/// build isolated instances per case.
#[derive(Clone)]
pub struct AppState {
	pub registry: Arc<ConnectionRegistry>,
	pub dispatcher: Arc<EventDispatcher>,
	pub limiter: Arc<RateLimiter>,
	pub verifier: Arc<dyn CredentialVerifier>,
	pub store: Arc<dyn MessageStore>,
	pub settings: Arc<GatewaySettings>,
	pub health: HealthState,
}
