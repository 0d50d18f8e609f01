//! The per-user token check: rate limiting, scratch tokens, and the TOTP
//! window scan, operating purely on a [`Secret`] and a [`UserState`] already
//! loaded by the caller (SPEC_FULL §4.6).

use crate::credential::{SCRATCH_TOKEN_LEN, TOTP_TOKEN_LEN};
use crate::error::Error;
use crate::secret::Secret;
use crate::state::UserState;
use crate::totp::{decode_secret, generate_at, TOTP_STEP};

/// Check `token` (a bare TOTP code or scratch code, pincode already
/// stripped) against `secret`, mutating `state` in place to record the
/// attempt. The caller is responsible for persisting `state` afterward
/// regardless of the outcome. On success, returns the human-readable
/// acceptance message (`Valid token used`, `Valid token within window size
/// used`, or `Scratch-token used`).
pub fn verify_token(
    secret: &Secret,
    state: &mut UserState,
    token: &str,
    now: i64,
) -> Result<String, Error> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::verify_failed("token is not an integer"));
    }

    state.prune(secret.rate_limit.window_seconds, secret.window_size, now);

    let recent = state
        .fail_timestamps
        .iter()
        .filter(|&&t| now - t <= secret.rate_limit.window_seconds)
        .count();
    if recent as u32 >= secret.rate_limit.max_attempts {
        return Err(Error::verify_failed(
            "Rate-limit reached, please try again later",
        ));
    }

    match token.len() {
        TOTP_TOKEN_LEN => verify_totp(secret, state, token, now),
        SCRATCH_TOKEN_LEN => verify_scratch(secret, state, token, now),
        len if len > SCRATCH_TOKEN_LEN => Err(Error::verify_failed("token is too long")),
        _ => Err(Error::verify_failed("not a valid token")),
    }
}

fn verify_scratch(
    secret: &Secret,
    state: &mut UserState,
    token: &str,
    now: i64,
) -> Result<String, Error> {
    if !secret.scratch_tokens.contains(token) {
        state.fail_timestamps.push(now);
        return Err(Error::verify_failed("Not a valid scratch-token"));
    }
    if state.used_scratch_tokens.contains(token) {
        return Err(Error::verify_failed("Scratch-token already used once"));
    }
    state.used_scratch_tokens.insert(token.to_string());
    Ok("Scratch-token used".to_string())
}

/// Offsets to scan, nearest-to-`now` first: `0, -30, +30, -60, +60, ...`
/// up to `window_size`. The current step always wins a tie.
fn window_offsets(window_size: i64) -> Vec<i64> {
    let steps_back = window_size / TOTP_STEP;
    let mut offsets = Vec::with_capacity(2 * steps_back as usize + 1);
    offsets.push(0);
    for step in 1..=steps_back {
        offsets.push(-step);
        offsets.push(step);
    }
    offsets
}

fn verify_totp(
    secret: &Secret,
    state: &mut UserState,
    token: &str,
    now: i64,
) -> Result<String, Error> {
    let key = decode_secret(&secret.totp_key)?;
    let current_step = now - now.rem_euclid(TOTP_STEP);

    let mut matched_step = None;
    for offset in window_offsets(secret.window_size) {
        let step_time = current_step + offset * TOTP_STEP;
        let candidate = generate_at(&key, step_time)?;
        if crate::hash::ct_eq(candidate.as_bytes(), token.as_bytes()) {
            matched_step = Some(step_time);
            break;
        }
    }

    let Some(step_time) = matched_step else {
        state.fail_timestamps.push(now);
        return Err(Error::verify_failed("Not a valid token"));
    };

    if state.used_timestamps.contains_key(&step_time) {
        return Err(Error::verify_failed("Token has already been used once"));
    }

    state.used_timestamps.insert(step_time, now);
    if step_time == current_step {
        Ok("Valid token used".to_string())
    } else {
        Ok("Valid token within window size used".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totp::decode_secret as decode;

    fn secret() -> Secret {
        Secret::new("VN7J5UVLZEP7ZAGM")
            .with_rate_limit(3, 30)
            .with_scratch_tokens(["11112222".to_string()])
    }

    #[test]
    fn current_step_token_is_accepted_once() {
        let secret = secret();
        let key = decode(&secret.totp_key).unwrap();
        let now = 1_700_000_010;
        let code = generate_at(&key, now).unwrap();
        let mut state = UserState::default();

        assert_eq!(
            verify_token(&secret, &mut state, &code, now).unwrap(),
            "Valid token used"
        );
        let err = verify_token(&secret, &mut state, &code, now).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed(m) if m == "Token has already been used once"));
    }

    #[test]
    fn outside_window_is_rejected() {
        let secret = secret().with_window_size(0);
        let key = decode(&secret.totp_key).unwrap();
        let now = 1_700_000_000;
        let code = generate_at(&key, now + 60).unwrap();
        let mut state = UserState::default();

        let err = verify_token(&secret, &mut state, &code, now).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed(m) if m == "Not a valid token"));
    }

    #[test]
    fn within_window_is_accepted_with_distinct_message() {
        let secret = secret().with_window_size(60);
        let key = decode(&secret.totp_key).unwrap();
        let now = 1_700_000_010;
        let code = generate_at(&key, now + 30).unwrap();
        let mut state = UserState::default();

        assert_eq!(
            verify_token(&secret, &mut state, &code, now).unwrap(),
            "Valid token within window size used"
        );
    }

    #[test]
    fn scratch_token_is_single_use() {
        let secret = secret();
        let mut state = UserState::default();

        assert_eq!(
            verify_token(&secret, &mut state, "11112222", 1_700_000_000).unwrap(),
            "Scratch-token used"
        );
        let err = verify_token(&secret, &mut state, "11112222", 1_700_000_030).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed(m) if m == "Scratch-token already used once"));
    }

    #[test]
    fn unknown_scratch_token_is_rejected_distinctly() {
        let secret = secret();
        let mut state = UserState::default();
        let err = verify_token(&secret, &mut state, "99999999", 1_700_000_000).unwrap_err();
        assert!(err.is_not_a_valid_scratch_token());
    }

    #[test]
    fn non_digit_token_is_rejected_before_rate_limit_check() {
        let secret = secret();
        let mut state = UserState::default();
        let err = verify_token(&secret, &mut state, "abcdef", 1_700_000_000).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed(m) if m == "token is not an integer"));
        assert!(state.fail_timestamps.is_empty());
    }

    #[test]
    fn overlong_token_is_rejected_distinctly() {
        let secret = secret();
        let mut state = UserState::default();
        let err = verify_token(&secret, &mut state, "12345678910", 1_700_000_000).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed(m) if m == "token is too long"));
    }

    #[test]
    fn rate_limit_trips_after_max_attempts_and_does_not_grow_further() {
        let secret = secret();
        let mut state = UserState::default();
        let now = 1_700_000_000;

        for _ in 0..3 {
            assert!(verify_token(&secret, &mut state, "000000", now).is_err());
        }
        assert_eq!(state.fail_timestamps.len(), 3);
        let err = verify_token(&secret, &mut state, "000000", now).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed(m) if m.contains("Rate-limit reached")));
        assert_eq!(state.fail_timestamps.len(), 3);
    }

    #[test]
    fn rate_limit_recovers_once_window_elapses() {
        let secret = secret();
        let mut state = UserState::default();

        for i in 0..3 {
            assert!(verify_token(&secret, &mut state, "000000", i).is_err());
        }
        let key = decode(&secret.totp_key).unwrap();
        let later = 1000;
        let code = generate_at(&key, later).unwrap();
        assert!(verify_token(&secret, &mut state, &code, later).is_ok());
    }
}
