#![forbid(unsafe_code)]

//! Server configuration.
//!
//! Precedence is built-in defaults, then the TOML config file, then
//! `COURIER_*` environment variables. The file is optional; a missing
//! path silently yields defaults so dev runs work with nothing on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use courier_util::secret::SecretString;
use serde::Deserialize;
use tracing::info;

use crate::limiter::LimiterConfig;
use crate::limiter::rules::{GENERAL, LOGIN, MESSAGE_SEND, RuleDef, RuleSet, SMS_SEND, UPLOAD};

/// `~/.courier/config.toml`, or a bare relative path when the home
/// directory cannot be resolved.
pub fn default_config_path() -> PathBuf {
	dirs::home_dir()
		.map(|home| home.join(".courier").join("config.toml"))
		.unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub limits: LimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Listen address for the public HTTP/websocket listener.
	pub bind: String,
	/// Listen address for the Prometheus scrape endpoint.
	pub metrics_bind: String,
	/// HMAC secret for credential verification. Startup fails without it.
	pub auth_hmac_secret: Option<SecretString>,
	pub outbound_queue_capacity: usize,
	pub max_frame_bytes: usize,
	pub trust_forwarded_headers: bool,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			bind: "127.0.0.1:8080".to_string(),
			metrics_bind: "127.0.0.1:9464".to_string(),
			auth_hmac_secret: None,
			outbound_queue_capacity: 1024,
			max_frame_bytes: courier_protocol::DEFAULT_MAX_FRAME_SIZE,
			trust_forwarded_headers: true,
		}
	}
}

/// Per-rule overrides layered over the built-in rule table.
#[derive(Debug, Clone)]
pub struct LimitSettings {
	pub general_requests: u32,
	pub general_window_secs: u64,
	pub sms_requests: u32,
	pub login_requests: u32,
	pub upload_requests: u32,
	pub message_requests: u32,
	pub suspicious_decay_secs: u64,
}

impl Default for LimitSettings {
	fn default() -> Self {
		Self {
			general_requests: 100,
			general_window_secs: 60,
			sms_requests: 5,
			login_requests: 10,
			upload_requests: 10,
			message_requests: 100,
			suspicious_decay_secs: 3600,
		}
	}
}

impl LimitSettings {
	/// The built-in rules with this deployment's thresholds applied.
	pub fn to_rule_set(&self) -> RuleSet {
		let mut set = RuleSet::builtin();

		let patch = |set: &mut RuleSet, name: &str, max_requests: u32, window: Option<Duration>| {
			if let Some(base) = set.get(name).copied() {
				set.insert(name, RuleDef {
					max_requests,
					window: window.unwrap_or(base.window),
					..base
				});
			}
		};

		patch(
			&mut set,
			GENERAL,
			self.general_requests,
			Some(Duration::from_secs(self.general_window_secs)),
		);
		patch(&mut set, SMS_SEND, self.sms_requests, None);
		patch(&mut set, LOGIN, self.login_requests, None);
		patch(&mut set, UPLOAD, self.upload_requests, None);
		patch(&mut set, MESSAGE_SEND, self.message_requests, None);
		set
	}

	pub fn limiter_config(&self) -> LimiterConfig {
		LimiterConfig {
			suspicious_decay: Duration::from_secs(self.suspicious_decay_secs),
			..LimiterConfig::default()
		}
	}
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
	server: Option<FileServerSettings>,
	limits: Option<FileLimitSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	metrics_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	outbound_queue_capacity: Option<usize>,
	max_frame_bytes: Option<usize>,
	trust_forwarded_headers: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLimitSettings {
	general_requests: Option<u32>,
	general_window_secs: Option<u64>,
	sms_requests: Option<u32>,
	login_requests: Option<u32>,
	upload_requests: Option<u32>,
	message_requests: Option<u32>,
	suspicious_decay_secs: Option<u64>,
}

impl ServerConfig {
	/// Load configuration: defaults, then `path` if it exists, then
	/// environment overrides.
	pub fn from_file(path: &Path) -> anyhow::Result<Self> {
		let mut config = Self {
			server: ServerSettings::default(),
			limits: LimitSettings::default(),
		};

		if let Some(file) = read_toml_if_exists(path)? {
			config.apply_file(file);
			info!(path = %path.display(), "loaded config file");
		}

		config.apply_env_overrides();
		Ok(config)
	}

	fn apply_file(&mut self, file: FileConfig) {
		if let Some(server) = file.server {
			if let Some(bind) = server.bind {
				self.server.bind = bind;
			}
			if let Some(metrics_bind) = server.metrics_bind {
				self.server.metrics_bind = metrics_bind;
			}
			if let Some(secret) = server.auth_hmac_secret {
				self.server.auth_hmac_secret = Some(SecretString::new(secret));
			}
			if let Some(cap) = server.outbound_queue_capacity {
				self.server.outbound_queue_capacity = cap;
			}
			if let Some(max) = server.max_frame_bytes {
				self.server.max_frame_bytes = max;
			}
			if let Some(trust) = server.trust_forwarded_headers {
				self.server.trust_forwarded_headers = trust;
			}
		}

		if let Some(limits) = file.limits {
			if let Some(v) = limits.general_requests {
				self.limits.general_requests = v;
			}
			if let Some(v) = limits.general_window_secs {
				self.limits.general_window_secs = v;
			}
			if let Some(v) = limits.sms_requests {
				self.limits.sms_requests = v;
			}
			if let Some(v) = limits.login_requests {
				self.limits.login_requests = v;
			}
			if let Some(v) = limits.upload_requests {
				self.limits.upload_requests = v;
			}
			if let Some(v) = limits.message_requests {
				self.limits.message_requests = v;
			}
			if let Some(v) = limits.suspicious_decay_secs {
				self.limits.suspicious_decay_secs = v;
			}
		}
	}

	fn apply_env_overrides(&mut self) {
		if let Ok(secret) = std::env::var("COURIER_AUTH_HMAC_SECRET")
			&& !secret.trim().is_empty()
		{
			self.server.auth_hmac_secret = Some(SecretString::new(secret));
			info!("auth secret set from environment");
		}

		if let Ok(bind) = std::env::var("COURIER_BIND")
			&& !bind.trim().is_empty()
		{
			self.server.bind = bind.trim().to_string();
			info!(bind = %self.server.bind, "bind address set from environment");
		}

		if let Ok(bind) = std::env::var("COURIER_METRICS_BIND")
			&& !bind.trim().is_empty()
		{
			self.server.metrics_bind = bind.trim().to_string();
		}

		if let Ok(v) = std::env::var("COURIER_TRUST_FORWARDED_HEADERS")
			&& let Some(trust) = parse_env_bool(&v)
		{
			self.server.trust_forwarded_headers = trust;
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	let contents = match std::fs::read_to_string(path) {
		Ok(contents) => contents,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(err) => return Err(err).with_context(|| format!("reading config file {}", path.display())),
	};

	let file = toml::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))?;
	Ok(Some(file))
}

fn parse_env_bool(value: &str) -> Option<bool> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_reference_thresholds() {
		let limits = LimitSettings::default();
		let rules = limits.to_rule_set();

		let general = rules.get(GENERAL).unwrap();
		assert_eq!(general.max_requests, 100);
		assert_eq!(general.window, Duration::from_secs(60));

		let sms = rules.get(SMS_SEND).unwrap();
		assert_eq!(sms.max_requests, 5);
		assert_eq!(sms.window, Duration::from_secs(3600));
	}

	#[test]
	fn file_values_override_defaults() {
		let file: FileConfig = toml::from_str(
			r#"
			[server]
			bind = "0.0.0.0:9000"
			auth_hmac_secret = "shh"
			trust_forwarded_headers = false

			[limits]
			general_requests = 10
			suspicious_decay_secs = 120
			"#,
		)
		.unwrap();

		let mut config = ServerConfig {
			server: ServerSettings::default(),
			limits: LimitSettings::default(),
		};
		config.apply_file(file);

		assert_eq!(config.server.bind, "0.0.0.0:9000");
		assert!(!config.server.trust_forwarded_headers);
		assert_eq!(config.server.auth_hmac_secret.as_ref().unwrap().expose(), "shh");
		assert_eq!(config.limits.general_requests, 10);
		assert_eq!(config.limits.limiter_config().suspicious_decay, Duration::from_secs(120));

		let rules = config.limits.to_rule_set();
		assert_eq!(rules.get(GENERAL).unwrap().max_requests, 10);
		// Untouched rules keep their defaults.
		assert_eq!(rules.get(LOGIN).unwrap().max_requests, 10);
		assert_eq!(rules.get(UPLOAD).unwrap().window, Duration::from_secs(300));
	}

	#[test]
	fn empty_file_keeps_defaults() {
		let file: FileConfig = toml::from_str("").unwrap();
		let mut config = ServerConfig {
			server: ServerSettings::default(),
			limits: LimitSettings::default(),
		};
		config.apply_file(file);

		assert_eq!(config.server.bind, "127.0.0.1:8080");
		assert!(config.server.auth_hmac_secret.is_none());
		assert_eq!(config.limits.message_requests, 100);
	}

	#[test]
	fn env_bool_parsing() {
		assert_eq!(parse_env_bool("true"), Some(true));
		assert_eq!(parse_env_bool(" YES "), Some(true));
		assert_eq!(parse_env_bool("0"), Some(false));
		assert_eq!(parse_env_bool("off"), Some(false));
		assert_eq!(parse_env_bool("maybe"), None);
	}
}
