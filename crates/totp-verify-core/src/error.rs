//! Error kinds surfaced by the verification engine.
//!
//! The five kinds below are the only vocabulary an embedder ever needs to
//! pattern-match on; everything a backend raises gets folded into one of
//! them before it reaches `Authenticator::verify_user_token`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid characters in username")]
    InvalidUsername,

    #[error("{0}")]
    UserNotFound(String),

    #[error("{0}")]
    UserSecretError(String),

    #[error("{0}")]
    UserPincodeError(String),

    #[error("{0}")]
    VerifyFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn verify_failed(msg: impl Into<String>) -> Self {
        Error::VerifyFailed(msg.into())
    }

    pub fn user_not_found(msg: impl Into<String>) -> Self {
        Error::UserNotFound(msg.into())
    }

    pub fn user_secret(msg: impl Into<String>) -> Self {
        Error::UserSecretError(msg.into())
    }

    pub fn user_pincode(msg: impl Into<String>) -> Self {
        Error::UserPincodeError(msg.into())
    }

    /// A pincode mismatch under the scratch split doesn't rule out the
    /// TOTP split (a shorter/longer pincode could still be valid), so the
    /// caller re-slices the whole credential and tries again.
    pub(crate) fn allows_scratch_to_totp_fallback(&self) -> bool {
        matches!(self, Error::UserPincodeError(_))
    }

    /// The scratch split's pincode checked out fine but its 8-digit token
    /// wasn't a registered scratch code. Unlike a pincode mismatch this
    /// doesn't call for a fresh re-slice: the pincode is already known
    /// good, so the caller just retries the trailing 6 digits as a TOTP
    /// code instead of the trailing 8 as a scratch code.
    pub(crate) fn is_not_a_valid_scratch_token(&self) -> bool {
        matches!(self, Error::VerifyFailed(m) if m.contains("Not a valid scratch-token"))
    }
}
