//! Orchestration: wires a username + submitted credential through pincode
//! verification, secret lookup, and the per-user token check, with the
//! scratch-then-TOTP fallback described in SPEC_FULL §4.1.

use crate::backend::{PincodeBackend, SecretBackend, StateBackend};
use crate::credential::{split_scratch, split_totp, CredentialSplit, TOTP_TOKEN_LEN};
use crate::error::Error;
use crate::totp::now_seconds;
use crate::user;
use crate::username::validate_username;

pub struct Authenticator {
    secret_backend: Box<dyn SecretBackend + Send + Sync>,
    pincode_backend: Option<Box<dyn PincodeBackend + Send + Sync>>,
    state_backend: Box<dyn StateBackend + Send + Sync>,
    require_pincode: bool,
}

impl Authenticator {
    pub fn new(
        secret_backend: Box<dyn SecretBackend + Send + Sync>,
        state_backend: Box<dyn StateBackend + Send + Sync>,
    ) -> Self {
        Authenticator {
            secret_backend,
            pincode_backend: None,
            state_backend,
            require_pincode: false,
        }
    }

    pub fn with_pincode_backend(mut self, backend: Box<dyn PincodeBackend + Send + Sync>) -> Self {
        self.pincode_backend = Some(backend);
        self
    }

    pub fn with_require_pincode(mut self, require_pincode: bool) -> Self {
        self.require_pincode = require_pincode;
        self
    }

    /// Verify `credential` for `username`, returning the acceptance message
    /// on success. Tries the scratch-token split (last 8 characters) first;
    /// only retries with the TOTP split (last 6 characters) if that
    /// attempt's pincode check or token lookup fails in a way that doesn't
    /// rule out the other interpretation.
    pub fn verify_user_token(&self, username: &str, credential: &str) -> Result<String, Error> {
        let result = self.verify_user_token_inner(username, credential);
        match &result {
            Ok(message) => tracing::info!(%username, %message, "token verified"),
            Err(err) => tracing::debug!(%username, error = %err, "token verification rejected"),
        }
        result
    }

    fn verify_user_token_inner(&self, username: &str, credential: &str) -> Result<String, Error> {
        validate_username(username)?;

        if self.require_pincode && is_bare_token(credential) {
            return Err(Error::user_pincode("Pincode is required"));
        }

        if self.pincode_backend.is_none() {
            // No pincode backend at all: the entire credential is the token,
            // no split is attempted.
            return self.attempt(
                username,
                &CredentialSplit {
                    pincode: None,
                    token: credential,
                },
                now_seconds(),
            );
        }

        let now = now_seconds();

        if let Some(split) = split_scratch(credential) {
            match self.attempt(username, &split, now) {
                Ok(message) => return Ok(message),
                Err(e) if e.is_not_a_valid_scratch_token() => {
                    // The pincode already checked out; only the 8-digit
                    // scratch code was unknown. Retry the already-verified
                    // pincode against the trailing 6 digits as a TOTP code,
                    // rather than re-slicing the whole credential (which
                    // would manufacture a different, unverified pincode).
                    let retry = CredentialSplit {
                        pincode: split.pincode,
                        token: &split.token[split.token.len() - TOTP_TOKEN_LEN..],
                    };
                    return self.attempt(username, &retry, now);
                }
                Err(e) if e.allows_scratch_to_totp_fallback() => {}
                Err(e) => return Err(e),
            }
        }

        match split_totp(credential) {
            Some(split) => self.attempt(username, &split, now),
            None => Err(Error::verify_failed("not a valid token")),
        }
    }

    fn attempt(
        &self,
        username: &str,
        split: &CredentialSplit<'_>,
        now: i64,
    ) -> Result<String, Error> {
        if let Some(pincode) = split.pincode {
            let backend = self
                .pincode_backend
                .as_ref()
                .ok_or_else(|| Error::user_pincode("Pincode did not match"))?;
            let matched = backend.verify_pincode(username, pincode).map_err(|e| {
                tracing::warn!(%username, error = %e, "pincode backend rejected credential");
                e
            })?;
            if !matched {
                return Err(Error::user_pincode("Pincode did not match"));
            }
        }

        let secret = self
            .secret_backend
            .load_secret(username, split.pincode)
            .map_err(|e| {
                tracing::warn!(%username, error = %e, "secret backend load failed");
                e
            })?;
        let guard = self.state_backend.acquire(username).map_err(|e| {
            tracing::warn!(%username, error = %e, "state backend acquire failed");
            e
        })?;
        let mut state = guard.state().clone();

        let result = user::verify_token(&secret, &mut state, split.token, now);

        // A pincode mismatch is rejected before state is ever touched; every
        // other outcome, success or failure, is recorded by committing the
        // (possibly unchanged) state.
        guard.commit(state)?;

        result
    }
}

fn is_bare_token(credential: &str) -> bool {
    (credential.len() == 6 || credential.len() == 8) && credential.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StateGuard;
    use crate::secret::Secret;
    use crate::state::UserState;

    #[test]
    fn bare_token_detection() {
        assert!(is_bare_token("123456"));
        assert!(is_bare_token("12345678"));
        assert!(!is_bare_token("1234"));
        assert!(!is_bare_token("99123456"));
    }

    struct MockSecretBackend;
    impl SecretBackend for MockSecretBackend {
        fn load_secret(&self, _username: &str, _pincode: Option<&str>) -> Result<Secret, Error> {
            Ok(Secret::new("VN7J5UVLZEP7ZAGM").with_scratch_tokens(["11112222".to_string()]))
        }
    }

    struct MockPincodeBackend {
        expected: &'static str,
    }
    impl PincodeBackend for MockPincodeBackend {
        fn verify_pincode(&self, _username: &str, candidate: &str) -> Result<bool, Error> {
            Ok(candidate == self.expected)
        }
    }

    struct MockStateBackend;
    impl StateBackend for MockStateBackend {
        fn acquire(&self, _username: &str) -> Result<Box<dyn StateGuard>, Error> {
            Ok(Box::new(MockStateGuard {
                state: UserState::default(),
            }))
        }
    }

    struct MockStateGuard {
        state: UserState,
    }
    impl StateGuard for MockStateGuard {
        fn state(&self) -> &UserState {
            &self.state
        }
        fn state_mut(&mut self) -> &mut UserState {
            &mut self.state
        }
        fn commit(self: Box<Self>, _state: UserState) -> Result<(), Error> {
            Ok(())
        }
        fn abort(self: Box<Self>) -> Result<(), Error> {
            Ok(())
        }
        fn delete(self: Box<Self>) -> Result<(), Error> {
            Ok(())
        }
    }

    /// A correct, non-6-character pincode followed by an unregistered
    /// 8-digit value must fail as an unknown TOTP code, not as a pincode
    /// mismatch — the scratch retry must not re-slice a pincode that
    /// already checked out.
    #[test]
    fn correct_pincode_with_unregistered_scratch_code_fails_as_not_a_valid_token() {
        let authenticator = Authenticator::new(Box::new(MockSecretBackend), Box::new(MockStateBackend))
            .with_pincode_backend(Box::new(MockPincodeBackend {
                expected: "wakkawakka",
            }));

        let err = authenticator
            .verify_user_token("valid", "wakkawakka00000000")
            .unwrap_err();

        assert!(matches!(err, Error::VerifyFailed(m) if m == "Not a valid token"));
    }
}
