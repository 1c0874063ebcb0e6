#![forbid(unsafe_code)]

//! Rate-limit guard middleware.
//!
//! Each guarded route carries a rule name; the guard derives the request
//! key (authenticated actor if a valid bearer token is present, client
//! origin otherwise), consults the limiter, and either forwards the
//! request with quota headers attached or short-circuits with a 429.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::debug;

use crate::limiter::{Decision, DenyReason, Origin, QuotaHeaders, RequestKey};
use crate::server::state::AppState;

pub async fn rate_limit_guard(
	State((state, rule)): State<(AppState, &'static str)>,
	ConnectInfo(peer): ConnectInfo<SocketAddr>,
	req: Request,
	next: Next,
) -> Response {
	let key = request_key(&state, req.headers(), peer);

	match state.limiter.check(&key, rule) {
		Decision::Allowed { .. } => {
			let quota = state.limiter.headers_for(&key, rule);
			let mut response = next.run(req).await;
			if let Some(quota) = quota {
				apply_quota_headers(response.headers_mut(), quota);
			}
			response
		}
		Decision::Denied { retry_after, reason } => {
			debug!(
				rule,
				origin = key.origin.as_str(),
				reason = reason.as_str(),
				"guard: request denied"
			);
			deny_response(&state, &key, rule, reason, retry_after.as_secs())
		}
	}
}

/// Limiter key for this request: prefer the authenticated actor, fall
/// back to the client origin.
fn request_key(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> RequestKey {
	let origin = client_origin(headers, peer, state.settings.trust_forwarded_headers);
	match bearer_actor(state, headers) {
		Some(actor) => RequestKey::for_actor(actor, origin),
		None => RequestKey::anonymous(origin),
	}
}

/// Client origin for limiting. Forwarded headers are only honored when
/// the deployment declares its proxy trustworthy.
fn client_origin(headers: &HeaderMap, peer: SocketAddr, trust_forwarded: bool) -> Origin {
	if trust_forwarded {
		if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
			// First entry is the originating client.
			if let Some(first) = forwarded.split(',').next() {
				let first = first.trim();
				if !first.is_empty() {
					return Origin::new(first);
				}
			}
		}
		if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
			let real_ip = real_ip.trim();
			if !real_ip.is_empty() {
				return Origin::new(real_ip);
			}
		}
	}
	Origin::new(peer.ip().to_string())
}

/// Actor id from a `Authorization: Bearer <token>` header, if the token
/// verifies. An invalid token degrades to origin scoping rather than
/// rejecting the request; authentication proper is each route's job.
fn bearer_actor(state: &AppState, headers: &HeaderMap) -> Option<courier_domain::ActorId> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let token = value.strip_prefix("Bearer ")?;
	state.verifier.verify(token).ok()
}

fn apply_quota_headers(headers: &mut HeaderMap, quota: QuotaHeaders) {
	if let Ok(v) = HeaderValue::from_str(&quota.limit.to_string()) {
		headers.insert("x-ratelimit-limit", v);
	}
	if let Ok(v) = HeaderValue::from_str(&quota.remaining.to_string()) {
		headers.insert("x-ratelimit-remaining", v);
	}
	if let Ok(v) = HeaderValue::from_str(&quota.reset_epoch.to_string()) {
		headers.insert("x-ratelimit-reset", v);
	}
	if let Ok(v) = HeaderValue::from_str(&quota.window_secs.to_string()) {
		headers.insert("x-ratelimit-window", v);
	}
}

fn deny_response(state: &AppState, key: &RequestKey, rule: &str, reason: DenyReason, retry_after_secs: u64) -> Response {
	metrics::counter!("courier_server_guard_denials_total").increment(1);

	let mut response = (
		StatusCode::TOO_MANY_REQUESTS,
		Json(json!({
			"detail": reason.as_str(),
			"retry_after": retry_after_secs,
		})),
	)
		.into_response();

	if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
		response.headers_mut().insert(header::RETRY_AFTER, v);
	}
	if let Some(quota) = state.limiter.headers_for(key, rule) {
		apply_quota_headers(response.headers_mut(), quota);
	}
	response
}
