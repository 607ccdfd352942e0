//! Monetary rounding and tolerance helpers for Marquee POS.
//!
//! All amounts are decimal currency units stored as `f64`. Every running
//! accumulation in the reconciliation engine goes through [`add2`] so that
//! binary floating-point drift is flushed after each addition instead of
//! compounding across a whole night of orders.

/// Maximum absolute difference at which two independently computed
/// aggregates are still considered reconciled.
pub const RECONCILE_TOLERANCE: f64 = 0.01;

/// Round a monetary amount to 2 decimal places (half away from zero).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Add `amount` to a running total, rounding the result to 2 decimals.
pub fn add2(total: f64, amount: f64) -> f64 {
    round2(total + amount)
}

/// `true` when two amounts agree within [`RECONCILE_TOLERANCE`].
pub fn within_tolerance(a: f64, b: f64) -> bool {
    (a - b).abs() <= RECONCILE_TOLERANCE + f64::EPSILON
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(10.504999), 10.5);
        assert_eq!(round2(1.0 / 3.0), 0.33);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(-2.0 / 3.0), -0.67);
        assert_eq!(round2(0.1 + 0.2), 0.3);
    }

    #[test]
    fn test_add2_flushes_drift() {
        // 0.10 added a thousand times drifts in raw f64 arithmetic but not
        // when rounded after each addition.
        let mut total = 0.0;
        for _ in 0..1000 {
            total = add2(total, 0.10);
        }
        assert_eq!(total, 100.0);
    }

    #[test]
    fn test_within_tolerance() {
        assert!(within_tolerance(100.00, 100.01));
        assert!(within_tolerance(100.01, 100.00));
        assert!(!within_tolerance(100.00, 100.02));
    }
}
