//! Core TOTP/pincode verification engine: pure logic over pluggable storage
//! backends, with no knowledge of files, SQL, or the network.

pub mod authenticator;
pub mod backend;
pub mod credential;
pub mod error;
pub mod hash;
pub mod secret;
pub mod state;
pub mod totp;
pub mod user;
pub mod username;

pub use authenticator::Authenticator;
pub use backend::{PincodeBackend, SecretBackend, StateBackend, StateGuard};
pub use error::{Error, Result};
pub use secret::{RateLimit, Secret};
pub use state::UserState;
