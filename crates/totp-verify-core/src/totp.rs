//! RFC 6238 TOTP generation.
//!
//! HMAC-SHA1, 6-digit output, fixed 30-second step. These three are not
//! configurable per-secret in this data model (see SPEC_FULL §4.6).

use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Error;

pub const TOTP_STEP: i64 = 30;
pub const TOTP_DIGITS: u32 = 6;

type HmacSha1 = Hmac<Sha1>;

pub fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

pub fn decode_secret(base32_secret: &str) -> Result<Vec<u8>, Error> {
    base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &base32_secret.trim().to_uppercase())
        .ok_or_else(|| Error::user_secret("invalid base32 TOTP secret"))
}

/// Generate the 6-digit code for the step containing `time`.
pub fn generate_at(key: &[u8], time: i64) -> Result<String, Error> {
    let counter = time.div_euclid(TOTP_STEP) as u64;
    let mut mac =
        HmacSha1::new_from_slice(key).map_err(|_| Error::user_secret("invalid TOTP key length"))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let truncated = ((u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]))
        % 10u32.pow(TOTP_DIGITS);

    Ok(format!("{:0width$}", truncated, width = TOTP_DIGITS as usize))
}
