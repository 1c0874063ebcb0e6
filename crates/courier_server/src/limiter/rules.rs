#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

/// Built-in rule names. Route guards reference these; anything else
/// fails open.
pub const GENERAL: &str = "general";
pub const SMS_SEND: &str = "sms-send";
pub const LOGIN: &str = "login";
pub const UPLOAD: &str = "upload";
pub const MESSAGE_SEND: &str = "message-send";

/// Static configuration for one named rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleDef {
	/// Maximum requests counted inside the trailing window.
	pub max_requests: u32,
	/// Trailing window length.
	pub window: Duration,
	/// Block applied once the limit is exceeded.
	pub block_duration: Duration,
}

/// Named rule table consulted by the limiter.
#[derive(Debug, Clone)]
pub struct RuleSet {
	rules: HashMap<String, RuleDef>,
}

impl RuleSet {
	pub fn empty() -> Self {
		Self { rules: HashMap::new() }
	}

	/// The five rules every deployment carries, with the reference
	/// thresholds. Config can override each of them.
	pub fn builtin() -> Self {
		let mut set = Self::empty();
		set.insert(GENERAL, RuleDef {
			max_requests: 100,
			window: Duration::from_secs(60),
			block_duration: Duration::from_secs(300),
		});
		set.insert(SMS_SEND, RuleDef {
			max_requests: 5,
			window: Duration::from_secs(3600),
			block_duration: Duration::from_secs(1800),
		});
		set.insert(LOGIN, RuleDef {
			max_requests: 10,
			window: Duration::from_secs(3600),
			block_duration: Duration::from_secs(3600),
		});
		set.insert(UPLOAD, RuleDef {
			max_requests: 10,
			window: Duration::from_secs(300),
			block_duration: Duration::from_secs(600),
		});
		set.insert(MESSAGE_SEND, RuleDef {
			max_requests: 100,
			window: Duration::from_secs(60),
			block_duration: Duration::from_secs(300),
		});
		set
	}

	pub fn insert(&mut self, name: impl Into<String>, def: RuleDef) {
		self.rules.insert(name.into(), def);
	}

	pub fn get(&self, name: &str) -> Option<&RuleDef> {
		self.rules.get(name)
	}

	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	/// Longest configured window; the sweeper sizes its idle cutoff
	/// from this.
	pub fn longest_window(&self) -> Duration {
		self.rules
			.values()
			.map(|r| r.window)
			.max()
			.unwrap_or(Duration::from_secs(60))
	}
}

impl Default for RuleSet {
	fn default() -> Self {
		Self::builtin()
	}
}
