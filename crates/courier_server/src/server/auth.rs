#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use courier_domain::ActorId;
use courier_util::secret::SecretString;
use courier_util::time::unix_secs_now;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Credential verification failures. All of them are terminal for the
/// presenting connection; none carry retry semantics.
#[derive(Debug, Error)]
pub enum VerifyError {
	#[error("invalid token format")]
	MalformedToken,

	#[error("invalid token signature")]
	BadSignature,

	#[error("token expired")]
	Expired,

	#[error("invalid token claims: {0}")]
	InvalidClaims(String),
}

/// Verifies an opaque credential and yields the actor behind it.
///
/// Treated as a black box by the rest of the system: token issuance,
/// rotation and revocation live elsewhere.
pub trait CredentialVerifier: Send + Sync {
	fn verify(&self, token: &str) -> Result<ActorId, VerifyError>;
}

#[derive(Debug, Clone, Deserialize)]
struct AuthClaims {
	sub: i64,
	exp: u64,
}

/// Stateless `v1.<payload_b64>.<sig_b64>` HMAC token verifier.
pub struct HmacVerifier {
	secret: SecretString,
}

impl HmacVerifier {
	pub fn new(secret: SecretString) -> Self {
		Self { secret }
	}
}

impl CredentialVerifier for HmacVerifier {
	fn verify(&self, token: &str) -> Result<ActorId, VerifyError> {
		let parts = token.split('.').collect::<Vec<_>>();
		if parts.len() != 3 || parts[0] != "v1" {
			return Err(VerifyError::MalformedToken);
		}

		let payload_b64 = parts[1];
		let sig_b64 = parts[2];

		let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| VerifyError::MalformedToken)?;
		let expected_sig = sign(payload_b64.as_bytes(), self.secret.expose().as_bytes());
		let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| VerifyError::MalformedToken)?;

		if !constant_time_eq(&expected_sig, &provided_sig) {
			return Err(VerifyError::BadSignature);
		}

		let claims: AuthClaims =
			serde_json::from_slice(&payload).map_err(|e| VerifyError::InvalidClaims(e.to_string()))?;

		if claims.exp <= unix_secs_now() {
			return Err(VerifyError::Expired);
		}

		Ok(ActorId(claims.sub))
	}
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &str, sub: i64, exp: u64) -> String {
	let payload = serde_json::json!({ "sub": sub, "exp": exp }).to_string();
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());
	let sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	format!("v1.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig))
}
