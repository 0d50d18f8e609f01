//! Username validation.
//!
//! The allowed character class is injectable rather than hardwired to a
//! single regex, per the open question in the design notes: an embedder can
//! widen or narrow it without forking the crate.

use crate::error::Error;

/// Default character class, inferred from the fixture set: `[A-Za-z0-9@._-]`.
pub fn default_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-')
}

pub fn validate_username(username: &str) -> Result<(), Error> {
    validate_username_with(username, default_allowed_char)
}

pub fn validate_username_with(username: &str, allowed: impl Fn(char) -> bool) -> Result<(), Error> {
    if username.is_empty() || !username.chars().all(allowed) {
        return Err(Error::InvalidUsername);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fixture_usernames() {
        assert!(validate_username("valid").is_ok());
        assert!(validate_username("bob@example.com").is_ok());
        assert!(validate_username("jane.doe_99").is_ok());
    }

    #[test]
    fn rejects_path_traversal() {
        let err = validate_username("../../etc/passwd").unwrap_err();
        assert!(matches!(err, Error::InvalidUsername));
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_username("").is_err());
    }

    #[test]
    fn custom_predicate_can_widen_class() {
        assert!(validate_username_with("bob smith", |c| c.is_alphanumeric() || c == ' ').is_ok());
    }
}
