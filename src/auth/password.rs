//! Password hashing (PBKDF2-HMAC-SHA256)
//!
//! Encoded form: `pbkdf2_sha256$<salt b64>$<derived b64>`. Verification is
//! constant-time and any malformed encoding verifies as false.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const SCHEME: &str = "pbkdf2_sha256";
const ITERATIONS: u32 = 150_000;
const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::rng().fill_bytes(&mut salt);

    let mut derived = [0u8; HASH_BYTES];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ITERATIONS, &mut derived);

    format!(
        "{SCHEME}${}${}",
        URL_SAFE.encode(salt),
        URL_SAFE.encode(derived)
    )
}

pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.splitn(3, '$');
    let (Some(scheme), Some(salt_b64), Some(hash_b64)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (URL_SAFE.decode(salt_b64), URL_SAFE.decode(hash_b64)) else {
        return false;
    };

    let mut actual = vec![0u8; expected.len().max(1)];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ITERATIONS, &mut actual);

    if actual.len() != expected.len() {
        return false;
    }
    let mut acc = 0u8;
    for (a, b) in actual.iter().zip(expected.iter()) {
        acc |= a ^ b;
    }
    acc == 0
}
