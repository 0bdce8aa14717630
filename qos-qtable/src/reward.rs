//! Maps raw telemetry to a discrete congestion state and a scalar reward. Kept free of
//! any locking or storage concerns so the state/reward contract can be unit-tested in
//! isolation from the engine that uses it.

pub const STATE_LOW: u8 = 0;
pub const STATE_MED: u8 = 1;
pub const STATE_HIGH: u8 = 2;

/// `drops` dominates; below that, load is bucketed against `threshold`. When
/// `threshold` is zero every non-drop observation falls through to HIGH, since no load
/// can be below a zero floor.
pub fn congestion_state(load_bps: f64, drops: u64, threshold: f64) -> u8 {
    if drops > 0 {
        return STATE_HIGH;
    }
    if load_bps < 0.5 * threshold {
        STATE_LOW
    } else if load_bps < threshold {
        STATE_MED
    } else {
        STATE_HIGH
    }
}

/// Ordering is part of the contract: drops dominate, then low-load beats med-load beats
/// high-load, with stability/backup adjustments layered on top.
pub fn reward(load_bps: f64, drops: u64, threshold: f64, stable: bool, backup: bool) -> f64 {
    let base = if drops > 0 {
        -50.0
    } else if load_bps < 0.5 * threshold {
        20.0
    } else if load_bps < threshold {
        10.0
    } else {
        -5.0
    };
    let stability_bonus = if stable { 5.0 } else { 0.0 };
    let backup_penalty = if backup { -3.0 } else { 0.0 };
    base + stability_bonus + backup_penalty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_monotonic_in_drops_at_fixed_load() {
        assert_eq!(congestion_state(100.0, 0, 1000.0), STATE_LOW);
        assert_eq!(congestion_state(100.0, 1, 1000.0), STATE_HIGH);
    }

    #[test]
    fn state_is_monotonic_in_load_at_zero_drops() {
        let t = 1000.0;
        assert_eq!(congestion_state(400.0, 0, t), STATE_LOW);
        assert_eq!(congestion_state(600.0, 0, t), STATE_MED);
        assert_eq!(congestion_state(1500.0, 0, t), STATE_HIGH);
    }

    #[test]
    fn zero_threshold_forces_high_state() {
        assert_eq!(congestion_state(1.0, 0, 0.0), STATE_HIGH);
        assert_eq!(congestion_state(0.0, 0, 0.0), STATE_HIGH);
    }

    #[test]
    fn stability_and_backup_deltas_are_exact() {
        let base = reward(100.0, 0, 1000.0, false, false);
        let stable = reward(100.0, 0, 1000.0, true, false);
        let backup = reward(100.0, 0, 1000.0, false, true);
        assert_eq!(stable - base, 5.0);
        assert_eq!(backup - base, -3.0);
    }

    #[test]
    fn reward_ordering_prefers_low_over_med_over_high_load() {
        let t = 1000.0;
        let low = reward(100.0, 0, t, false, false);
        let med = reward(700.0, 0, t, false, false);
        let high = reward(1500.0, 0, t, false, false);
        let dropped = reward(100.0, 3, t, false, false);
        assert!(low > med);
        assert!(med > high);
        assert!(dropped < high);
    }
}
