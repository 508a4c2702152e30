//! Stateless token codec
//!
//! Three token families, all keyed on server-side secrets:
//! - Access tokens: HS256 JWTs carrying `{sub, exp}`, verified statelessly.
//! - Anti-forgery (CSRF) tokens: `{raw}.{hex mac}`, not time-bounded.
//! - Opaque tokens: high-entropy random values whose SHA-256 hex digest is
//!   what gets persisted (refresh sessions, one-time tokens, invites).
//!
//! Verification is deliberately oracle-free: a parse failure, a signature
//! mismatch and an expired token all collapse into the same `None`/`false`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const OPAQUE_TOKEN_BYTES: usize = 48;

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id).
    pub sub: Uuid,
    /// Absolute expiry, unix seconds.
    pub exp: i64,
}

/// Constant-time byte equality (XOR fold, length checked first).
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

fn hmac_sha256(secret: &str, input: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(input);
    mac.finalize().into_bytes().to_vec()
}

/// Issue a signed access token for `subject`, expiring `ttl_minutes` from now.
pub fn create_access_token(subject: Uuid, secret: &str, ttl_minutes: i64) -> String {
    let header = JwtHeader {
        alg: "HS256".to_string(),
        typ: "JWT".to_string(),
    };
    let claims = AccessClaims {
        sub: subject,
        exp: (Utc::now() + Duration::minutes(ttl_minutes)).timestamp(),
    };

    let header_json = serde_json::to_vec(&header).expect("serialize header");
    let claims_json = serde_json::to_vec(&claims).expect("serialize claims");
    let h = URL_SAFE_NO_PAD.encode(header_json);
    let b = URL_SAFE_NO_PAD.encode(claims_json);

    let signing_input = format!("{h}.{b}");
    let sig = hmac_sha256(secret, signing_input.as_bytes());
    let s = URL_SAFE_NO_PAD.encode(sig);

    format!("{h}.{b}.{s}")
}

/// Verify an access token and return its claims.
///
/// Returns `None` on any parse failure, signature mismatch or expiry; callers
/// get no signal about which check failed.
pub fn decode_access_token(token: &str, secret: &str) -> Option<AccessClaims> {
    let mut parts = token.split('.');
    let (h, b, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let signing_input = format!("{h}.{b}");
    let expected = hmac_sha256(secret, signing_input.as_bytes());
    let provided = URL_SAFE_NO_PAD.decode(s).ok()?;
    if !constant_time_eq(&expected, &provided) {
        return None;
    }

    let claims_json = URL_SAFE_NO_PAD.decode(b).ok()?;
    let claims: AccessClaims = serde_json::from_slice(&claims_json).ok()?;
    if Utc::now().timestamp() > claims.exp {
        return None;
    }
    Some(claims)
}

/// Sign an anti-forgery value: `{raw}.{hex mac}`.
pub fn sign_csrf_token(raw: &str, secret: &str) -> String {
    let mac = hmac_sha256(secret, raw.as_bytes());
    format!("{raw}.{}", hex_encode(&mac))
}

/// Verify an anti-forgery value produced by [`sign_csrf_token`].
pub fn verify_csrf_token(token: &str, secret: &str) -> bool {
    let Some((raw, mac_hex)) = token.rsplit_once('.') else {
        return false;
    };
    let expected = hex_encode(&hmac_sha256(secret, raw.as_bytes()));
    constant_time_eq(expected.as_bytes(), mac_hex.as_bytes())
}

/// Generate a high-entropy opaque token (refresh / one-time / invite).
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of a raw opaque token; the only form ever persisted.
pub fn hash_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
