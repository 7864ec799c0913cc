//! Secret generation and hashing shared by the credential stores.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// 256 bits of OS randomness.
pub fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// 256-bit random secret, lowercase hex (64 characters).
pub fn generate_secret() -> String {
    hex::encode(random_bytes())
}

/// 256-bit random secret, URL-safe base64 without padding.
pub fn generate_url_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes())
}

/// Uniform six-digit code in `000000..=999999`.
pub fn generate_otp_code() -> String {
    format!("{:06}", OsRng.gen_range(0..=999_999u32))
}

/// SHA-256 hex digest. Only suitable for high-entropy inputs.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
