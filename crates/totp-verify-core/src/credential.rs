//! Splitting a submitted credential string into pincode/token parts.
//!
//! A credential may be a bare TOTP code, a bare 8-digit scratch code, or
//! either of those prefixed with a pincode. The split is ambiguous on its
//! own (a 14-character credential could be a 6-digit pincode plus an 8-digit
//! scratch code), so callers try [`split_scratch`] first and fall back to
//! [`split_totp`] only when the scratch interpretation's pincode or token
//! check fails; see SPEC_FULL §4.6.

pub const SCRATCH_TOKEN_LEN: usize = 8;
pub const TOTP_TOKEN_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSplit<'a> {
    pub pincode: Option<&'a str>,
    pub token: &'a str,
}

fn split_last(credential: &str, token_len: usize) -> Option<CredentialSplit<'_>> {
    if credential.len() < token_len {
        return None;
    }
    let split_at = credential.len() - token_len;
    let (pincode, token) = credential.split_at(split_at);
    let pincode = if pincode.is_empty() { None } else { Some(pincode) };
    Some(CredentialSplit { pincode, token })
}

/// Interpret the trailing 8 characters as a scratch token.
pub fn split_scratch(credential: &str) -> Option<CredentialSplit<'_>> {
    split_last(credential, SCRATCH_TOKEN_LEN)
}

/// Interpret the trailing 6 characters as a TOTP code.
pub fn split_totp(credential: &str) -> Option<CredentialSplit<'_>> {
    split_last(credential, TOTP_TOKEN_LEN)
}
