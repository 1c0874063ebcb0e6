#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use courier_domain::ActorId;

use crate::limiter::rules::{RuleDef, RuleSet, GENERAL};
use crate::limiter::{Decision, DenyReason, LimiterConfig, Origin, RateLimiter, RequestKey};

fn rule_set(max: u32, window_secs: u64, block_secs: u64) -> RuleSet {
	let mut set = RuleSet::empty();
	set.insert("test", RuleDef {
		max_requests: max,
		window: Duration::from_secs(window_secs),
		block_duration: Duration::from_secs(block_secs),
	});
	set.insert(GENERAL, RuleDef {
		max_requests: 100,
		window: Duration::from_secs(60),
		block_duration: Duration::from_secs(300),
	});
	set
}

fn key() -> RequestKey {
	RequestKey::anonymous(Origin::new("203.0.113.7"))
}

#[test]
fn allows_up_to_limit_then_blocks() {
	let limiter = RateLimiter::new(rule_set(3, 60, 300), LimiterConfig::default());
	let t0 = Instant::now();
	let key = key();

	for i in 0..3 {
		match limiter.check_at(&key, "test", t0 + Duration::from_secs(i)) {
			Decision::Allowed { remaining } => assert_eq!(remaining, 2 - i as u32),
			other => panic!("request {i} should be allowed, got {other:?}"),
		}
	}

	match limiter.check_at(&key, "test", t0 + Duration::from_secs(3)) {
		Decision::Denied { retry_after, reason } => {
			assert_eq!(reason, DenyReason::RateLimitExceeded);
			assert_eq!(retry_after, Duration::from_secs(300));
		}
		other => panic!("4th request should be denied, got {other:?}"),
	}
}

#[test]
fn retry_after_decreases_while_blocked() {
	let limiter = RateLimiter::new(rule_set(3, 60, 300), LimiterConfig::default());
	let t0 = Instant::now();
	let key = key();

	for i in 0..4 {
		let _ = limiter.check_at(&key, "test", t0 + Duration::from_secs(i));
	}

	let mut last = Duration::from_secs(300);
	for offset in [4u64, 10, 60, 200] {
		match limiter.check_at(&key, "test", t0 + Duration::from_secs(offset)) {
			Decision::Denied { retry_after, reason } => {
				assert_eq!(reason, DenyReason::Blocked);
				assert!(retry_after < last, "retry_after must decrease toward zero");
				last = retry_after;
			}
			other => panic!("blocked key should stay denied, got {other:?}"),
		}
	}
}

#[test]
fn sliding_window_recovers_after_timestamps_age_out() {
	let limiter = RateLimiter::new(rule_set(3, 60, 300), LimiterConfig::default());
	let t0 = Instant::now();
	let key = key();

	for _ in 0..3 {
		assert!(limiter.check_at(&key, "test", t0).is_allowed());
	}

	// No block was triggered; once the window passes, old timestamps
	// are pruned and the key is usable again.
	assert!(limiter.check_at(&key, "test", t0 + Duration::from_secs(61)).is_allowed());
}

#[test]
fn block_expires_and_key_is_usable_again() {
	let limiter = RateLimiter::new(rule_set(1, 2, 5), LimiterConfig::default());
	let t0 = Instant::now();
	let key = key();

	assert!(limiter.check_at(&key, "test", t0).is_allowed());
	assert!(!limiter.check_at(&key, "test", t0 + Duration::from_secs(1)).is_allowed());

	// Block (5s) outlives the window (2s): after both pass, allowed.
	assert!(limiter.check_at(&key, "test", t0 + Duration::from_secs(7)).is_allowed());
}

#[test]
fn unknown_rule_fails_open() {
	let limiter = RateLimiter::new(rule_set(1, 60, 300), LimiterConfig::default());
	let key = key();

	for _ in 0..100 {
		assert!(limiter.check(&key, "no-such-rule").is_allowed());
	}
}

#[test]
fn suspicious_escalation_crosses_rules() {
	let limiter = RateLimiter::new(rule_set(1, 600, 1), LimiterConfig::default());
	let t0 = Instant::now();
	let key = key();

	// One allowed request fills the window (max=1); each later check
	// after the short block expires is a fresh limit violation.
	assert!(limiter.check_at(&key, "test", t0).is_allowed());

	let mut t = t0 + Duration::from_secs(2);
	for strike in 0..6 {
		match limiter.check_at(&key, "test", t) {
			Decision::Denied {
				reason: DenyReason::RateLimitExceeded,
				..
			} => {}
			other => panic!("strike {strike} expected a limit violation, got {other:?}"),
		}
		t += Duration::from_secs(2);
	}

	// A different, unconfigured-for-abuse rule from the same origin is
	// now denied too.
	match limiter.check_at(&key, GENERAL, t) {
		Decision::Denied { reason, .. } => assert_eq!(reason, DenyReason::SuspiciousActivity),
		other => panic!("expected suspicious denial, got {other:?}"),
	}

	// A different origin is unaffected.
	let other = RequestKey::anonymous(Origin::new("198.51.100.1"));
	assert!(limiter.check_at(&other, GENERAL, t).is_allowed());
}

#[test]
fn suspicious_strikes_decay_over_time() {
	let cfg = LimiterConfig {
		suspicious_decay: Duration::from_secs(100),
		..LimiterConfig::default()
	};
	let limiter = RateLimiter::new(rule_set(1, 600, 1), cfg);
	let t0 = Instant::now();
	let key = key();

	assert!(limiter.check_at(&key, "test", t0).is_allowed());
	let mut t = t0 + Duration::from_secs(2);
	for _ in 0..6 {
		let _ = limiter.check_at(&key, "test", t);
		t += Duration::from_secs(2);
	}

	match limiter.check_at(&key, GENERAL, t) {
		Decision::Denied { reason, .. } => assert_eq!(reason, DenyReason::SuspiciousActivity),
		other => panic!("expected suspicious denial, got {other:?}"),
	}

	// All strikes fall out of the decay window.
	assert!(limiter.check_at(&key, GENERAL, t + Duration::from_secs(101)).is_allowed());
}

#[test]
fn reset_origin_clears_suspicion() {
	let limiter = RateLimiter::new(rule_set(1, 600, 1), LimiterConfig::default());
	let t0 = Instant::now();
	let key = key();

	assert!(limiter.check_at(&key, "test", t0).is_allowed());
	let mut t = t0 + Duration::from_secs(2);
	for _ in 0..6 {
		let _ = limiter.check_at(&key, "test", t);
		t += Duration::from_secs(2);
	}
	assert!(!limiter.check_at(&key, GENERAL, t).is_allowed());

	limiter.reset_origin(&key.origin);
	assert!(limiter.check_at(&key, GENERAL, t).is_allowed());
}

#[test]
fn actor_scopes_are_independent() {
	let limiter = RateLimiter::new(rule_set(1, 60, 300), LimiterConfig::default());
	let t0 = Instant::now();
	let origin = Origin::new("203.0.113.7");

	let a = RequestKey::for_actor(ActorId(1), origin.clone());
	let b = RequestKey::for_actor(ActorId(2), origin.clone());
	let anon = RequestKey::anonymous(origin);

	assert!(limiter.check_at(&a, "test", t0).is_allowed());
	assert!(!limiter.check_at(&a, "test", t0).is_allowed());

	// Same origin, different scope: unaffected by actor 1's block.
	assert!(limiter.check_at(&b, "test", t0).is_allowed());
	assert!(limiter.check_at(&anon, "test", t0).is_allowed());
}

#[test]
fn headers_reflect_usage_without_mutating() {
	let limiter = RateLimiter::new(rule_set(3, 60, 300), LimiterConfig::default());
	let t0 = Instant::now();
	let key = key();

	let fresh = limiter.headers_for_at(&key, "test", t0).unwrap();
	assert_eq!(fresh.limit, 3);
	assert_eq!(fresh.remaining, 3);
	assert_eq!(fresh.window_secs, 60);

	// headers_for must not create or count state.
	assert_eq!(limiter.tracked_keys(), 0);

	assert!(limiter.check_at(&key, "test", t0).is_allowed());
	let after_one = limiter.headers_for_at(&key, "test", t0).unwrap();
	assert_eq!(after_one.remaining, 2);

	// Repeated projection is stable.
	let again = limiter.headers_for_at(&key, "test", t0).unwrap();
	assert_eq!(again.remaining, 2);

	assert!(limiter.headers_for_at(&key, "no-such-rule", t0).is_none());
}

#[test]
fn sweep_evicts_idle_keys_and_dead_strikes() {
	let cfg = LimiterConfig {
		idle_factor: 3,
		..LimiterConfig::default()
	};
	let limiter = RateLimiter::new(rule_set(3, 60, 300), cfg);
	let t0 = Instant::now();
	let key = key();

	assert!(limiter.check_at(&key, "test", t0).is_allowed());
	assert_eq!(limiter.tracked_keys(), 1);

	// Not yet idle for 3x the longest window (general: 60s => cutoff 180s).
	limiter.sweep_at(t0 + Duration::from_secs(100));
	assert_eq!(limiter.tracked_keys(), 1);

	limiter.sweep_at(t0 + Duration::from_secs(30 * 60));
	assert_eq!(limiter.tracked_keys(), 0);
}
