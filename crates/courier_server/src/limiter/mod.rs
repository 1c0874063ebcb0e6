#![forbid(unsafe_code)]

//! Sliding-window rate limiter with escalating blocks.
//!
//! Every surface (HTTP routes and websocket upgrades) consults this one
//! limiter through [`RateLimiter::check`]. Decisions are a typed
//! outcome, never an error: every call site handles both branches
//! inline.

pub mod rules;

#[cfg(test)]
mod limiter_tests;

use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_domain::ActorId;
use courier_util::time::unix_secs_now;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::limiter::rules::RuleSet;

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	Allowed {
		/// Requests left in the window after this one.
		remaining: u32,
	},
	Denied {
		retry_after: Duration,
		reason: DenyReason,
	},
}

impl Decision {
	pub fn is_allowed(&self) -> bool {
		matches!(self, Decision::Allowed { .. })
	}
}

/// Why a request was denied. User-visible through the 429 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
	/// The key is inside an active block from an earlier violation.
	Blocked,
	/// This request pushed the key over the rule's limit.
	RateLimitExceeded,
	/// The origin accumulated too many violations across rules.
	SuspiciousActivity,
}

impl DenyReason {
	pub const fn as_str(self) -> &'static str {
		match self {
			DenyReason::Blocked => "blocked",
			DenyReason::RateLimitExceeded => "rate_limit_exceeded",
			DenyReason::SuspiciousActivity => "suspicious_activity",
		}
	}
}

/// Network-origin identifier (an IP, or a forwarded address when the
/// deployment trusts its proxy).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
	pub fn new(origin: impl Into<String>) -> Self {
		Self(origin.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

/// Identity of the caller for limiting purposes. The scope prefers the
/// authenticated actor; the origin is always kept alongside it because
/// suspicious-activity escalation is per origin regardless of scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
	pub actor: Option<ActorId>,
	pub origin: Origin,
}

impl RequestKey {
	pub fn for_actor(actor: ActorId, origin: Origin) -> Self {
		Self {
			actor: Some(actor),
			origin,
		}
	}

	pub fn anonymous(origin: Origin) -> Self {
		Self { actor: None, origin }
	}

	fn scope(&self) -> Scope {
		match self.actor {
			Some(actor) => Scope::Actor(actor),
			None => Scope::Origin(self.origin.0.clone()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Scope {
	Actor(ActorId),
	Origin(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
	scope: Scope,
	rule: String,
}

#[derive(Debug)]
struct WindowState {
	/// Request instants inside the trailing window, pruned lazily on
	/// each check.
	timestamps: Vec<Instant>,
	blocked_until: Option<Instant>,
	failed_attempts: u32,
	last_seen: Instant,
}

impl WindowState {
	fn new(now: Instant) -> Self {
		Self {
			timestamps: Vec::new(),
			blocked_until: None,
			failed_attempts: 0,
			last_seen: now,
		}
	}
}

/// Read-only quota projection for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaHeaders {
	pub limit: u32,
	pub remaining: u32,
	pub reset_epoch: u64,
	pub window_secs: u64,
}

/// Tuning knobs beyond the per-rule table.
#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
	/// Strikes above this count mark an origin suspicious.
	pub suspicious_threshold: usize,
	/// Strikes older than this stop counting (and are swept).
	pub suspicious_decay: Duration,
	/// Keys idle for `idle_factor * longest_window` are swept.
	pub idle_factor: u32,
}

impl Default for LimiterConfig {
	fn default() -> Self {
		Self {
			suspicious_threshold: 5,
			suspicious_decay: Duration::from_secs(3600),
			idle_factor: 3,
		}
	}
}

/// Multi-rule sliding-window limiter.
///
/// State is keyed by `(scope, rule)` in a sharded map, so concurrent
/// checks on unrelated keys never serialize on one lock.
pub struct RateLimiter {
	rules: RuleSet,
	cfg: LimiterConfig,
	windows: DashMap<WindowKey, WindowState>,
	strikes: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
	pub fn new(rules: RuleSet, cfg: LimiterConfig) -> Self {
		Self {
			rules,
			cfg,
			windows: DashMap::new(),
			strikes: DashMap::new(),
		}
	}

	pub fn with_builtin_rules() -> Self {
		Self::new(RuleSet::builtin(), LimiterConfig::default())
	}

	/// Check and record one request under `rule_name`.
	pub fn check(&self, key: &RequestKey, rule_name: &str) -> Decision {
		self.check_at(key, rule_name, Instant::now())
	}

	/// Clock-injected variant of [`RateLimiter::check`].
	pub fn check_at(&self, key: &RequestKey, rule_name: &str, now: Instant) -> Decision {
		if self.is_suspicious(&key.origin, now) {
			metrics::counter!("courier_server_rate_limit_suspicious_denials_total").increment(1);
			return Decision::Denied {
				retry_after: self.cfg.suspicious_decay,
				reason: DenyReason::SuspiciousActivity,
			};
		}

		let Some(rule) = self.rules.get(rule_name).copied() else {
			// Fail open: an unconfigured rule must never outage traffic.
			warn!(rule = rule_name, "unknown rate limit rule; allowing request");
			metrics::counter!("courier_server_rate_limit_unknown_rule_total").increment(1);
			return Decision::Allowed { remaining: u32::MAX };
		};

		let window_key = WindowKey {
			scope: key.scope(),
			rule: rule_name.to_string(),
		};

		let mut state = self
			.windows
			.entry(window_key)
			.or_insert_with(|| WindowState::new(now));
		state.last_seen = now;

		if let Some(until) = state.blocked_until {
			if now < until {
				return Decision::Denied {
					retry_after: until - now,
					reason: DenyReason::Blocked,
				};
			}
			state.blocked_until = None;
		}

		state.timestamps.retain(|&ts| now.duration_since(ts) < rule.window);

		if state.timestamps.len() as u32 >= rule.max_requests {
			state.blocked_until = Some(now + rule.block_duration);
			state.failed_attempts += 1;
			drop(state);

			self.record_strike(&key.origin, now);
			metrics::counter!("courier_server_rate_limit_denials_total").increment(1);
			debug!(rule = rule_name, origin = key.origin.as_str(), "rate limit exceeded");

			return Decision::Denied {
				retry_after: rule.block_duration,
				reason: DenyReason::RateLimitExceeded,
			};
		}

		state.timestamps.push(now);
		let remaining = rule.max_requests - state.timestamps.len() as u32;
		Decision::Allowed { remaining }
	}

	/// Quota projection for response headers. Pure read: does not
	/// create keys, record requests, or prune stored state.
	pub fn headers_for(&self, key: &RequestKey, rule_name: &str) -> Option<QuotaHeaders> {
		self.headers_for_at(key, rule_name, Instant::now())
	}

	pub fn headers_for_at(&self, key: &RequestKey, rule_name: &str, now: Instant) -> Option<QuotaHeaders> {
		let rule = self.rules.get(rule_name)?;

		let window_key = WindowKey {
			scope: key.scope(),
			rule: rule_name.to_string(),
		};

		let count = self
			.windows
			.get(&window_key)
			.map(|state| {
				state
					.timestamps
					.iter()
					.filter(|&&ts| now.duration_since(ts) < rule.window)
					.count() as u32
			})
			.unwrap_or(0);

		Some(QuotaHeaders {
			limit: rule.max_requests,
			remaining: rule.max_requests.saturating_sub(count),
			reset_epoch: unix_secs_now() + rule.window.as_secs(),
			window_secs: rule.window.as_secs(),
		})
	}

	/// Operator escape hatch: clear an origin's suspicious strikes.
	pub fn reset_origin(&self, origin: &Origin) {
		self.strikes.remove(origin.as_str());
	}

	/// Evict idle window state and decayed strikes. Bounds memory under
	/// high-cardinality traffic; run periodically via [`spawn_sweeper`].
	pub fn sweep_at(&self, now: Instant) {
		let idle_cutoff = self.rules.longest_window() * self.cfg.idle_factor.max(1);

		let before = self.windows.len();
		self.windows
			.retain(|_, state| now.duration_since(state.last_seen) < idle_cutoff);

		self.strikes.retain(|_, hits| {
			hits.retain(|&ts| now.duration_since(ts) < self.cfg.suspicious_decay);
			!hits.is_empty()
		});

		let evicted = before.saturating_sub(self.windows.len());
		if evicted > 0 {
			debug!(evicted, remaining = self.windows.len(), "rate limiter sweep");
		}
	}

	/// Number of tracked `(scope, rule)` keys. Test/introspection hook.
	pub fn tracked_keys(&self) -> usize {
		self.windows.len()
	}

	fn is_suspicious(&self, origin: &Origin, now: Instant) -> bool {
		let Some(hits) = self.strikes.get(origin.as_str()) else {
			return false;
		};
		let live = hits
			.iter()
			.filter(|&&ts| now.duration_since(ts) < self.cfg.suspicious_decay)
			.count();
		live > self.cfg.suspicious_threshold
	}

	fn record_strike(&self, origin: &Origin, now: Instant) {
		let mut hits = self.strikes.entry(origin.as_str().to_string()).or_default();
		hits.retain(|&ts| now.duration_since(ts) < self.cfg.suspicious_decay);
		hits.push(now);
	}
}

/// Background sweep at the cadence of the longest configured window.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let period = limiter.rules.longest_window().max(Duration::from_secs(60));
		let mut ticker = tokio::time::interval(period);
		ticker.tick().await;
		loop {
			ticker.tick().await;
			limiter.sweep_at(Instant::now());
		}
	})
}
