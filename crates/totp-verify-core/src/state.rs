//! The `UserState` data model (SPEC_FULL §3) and its pruning rule (§4.4).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::totp::TOTP_STEP;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserState {
    pub fail_timestamps: Vec<i64>,
    pub used_scratch_tokens: HashSet<String>,
    /// step timestamp -> wall-clock time it was first accepted.
    pub used_timestamps: HashMap<i64, i64>,
}

impl UserState {
    /// Drop entries a backend is required to forget on every
    /// `update_user_state`/commit. Per §4.4 the `used_timestamps` retention
    /// window is `2 * TOTP_STEP + window_size`, which is the larger (and
    /// therefore safer, replay-wise) of the two bounds mentioned in the
    /// spec; see DESIGN.md for why that one wins over the tighter bound
    /// implied by the §3 invariant text.
    pub fn prune(&mut self, rate_limit_window_seconds: i64, totp_window_size: i64, now: i64) {
        self.fail_timestamps.retain(|&t| now - t <= rate_limit_window_seconds);

        let used_ttl = 2 * TOTP_STEP + totp_window_size;
        self.used_timestamps.retain(|&step_time, _| now - step_time <= used_ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_drops_old_failures_and_used_timestamps() {
        let mut state = UserState {
            fail_timestamps: vec![100, 900, 950],
            used_scratch_tokens: HashSet::new(),
            used_timestamps: HashMap::from([(100, 100), (940, 940)]),
        };

        state.prune(40, 0, 1000);

        assert_eq!(state.fail_timestamps, vec![900, 950]);
        assert_eq!(state.used_timestamps.len(), 1);
        assert!(state.used_timestamps.contains_key(&940));
    }
}
