//! Pluggable storage seams.
//!
//! The core never knows whether a `Secret` came from a flat file, a SQL
//! table, or a remote directory; it only knows the three traits below. Each
//! concrete storage variant lives in a separate crate and implements
//! whichever subset of these traits it supports, exactly as the teacher
//! splits `patronus-core`'s config surface from `patronus-secrets`' storage
//! engines. A remote directory bind (LDAP) is just another `PincodeBackend`
//! impl that performs a live bind instead of a stored-hash comparison.

use crate::error::Error;
use crate::secret::Secret;
use crate::state::UserState;

/// Looks up and optionally decrypts a user's TOTP secret. `pincode` is
/// `None` when the submitted credential carried no pincode prefix; an
/// encrypted-at-rest secret then fails to load rather than silently
/// skipping decryption.
pub trait SecretBackend {
    fn load_secret(&self, username: &str, pincode: Option<&str>) -> Result<Secret, Error>;
}

/// Verifies a pincode against whatever store backs it (flat file, SQL
/// table, or a remote directory bind).
pub trait PincodeBackend {
    /// `None` means this user has no pincode configured; the caller must
    /// still accept a bare token in that case.
    fn verify_pincode(&self, username: &str, candidate: &str) -> Result<bool, Error>;
}

/// An exclusive, per-user hold on mutable state. Obtained from
/// [`StateBackend::acquire`]; the holder must call exactly one of
/// `commit`/`abort`/`delete`. Implementations back this with their own
/// `Drop` to release the lock on an unwinding panic as a last resort, but
/// callers should not rely on that path for correctness.
pub trait StateGuard {
    fn state(&self) -> &UserState;
    fn state_mut(&mut self) -> &mut UserState;

    /// Persist `state` and release the lock.
    fn commit(self: Box<Self>, state: UserState) -> Result<(), Error>;

    /// Release the lock without persisting any change.
    fn abort(self: Box<Self>) -> Result<(), Error>;

    /// Remove the user's state entirely and release the lock.
    fn delete(self: Box<Self>) -> Result<(), Error>;
}

/// Acquires per-user state under an exclusive lock.
pub trait StateBackend {
    fn acquire(&self, username: &str) -> Result<Box<dyn StateGuard>, Error>;
}
