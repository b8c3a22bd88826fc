//! Property-based tests for the angle arithmetic.

use axle_common::angle::{Angle, MDEG_PER_ROTATION};
use proptest::prelude::*;

fn any_angle() -> impl Strategy<Value = Angle> {
    // Keep rotations away from the extreme ends so sums of two angles
    // stay inside the representable range.
    (-1_000_000..1_000_000i32, -359_999..360_000i32)
        .prop_map(|(rotations, millidegrees)| Angle::new(rotations, millidegrees))
}

proptest! {
    #[test]
    fn normalized_invariant(a in any_angle()) {
        prop_assert!(a.millidegrees().abs() < MDEG_PER_ROTATION);
    }

    #[test]
    fn sum_then_diff_round_trips(a in any_angle(), b in any_angle()) {
        prop_assert_eq!(a.sum(&b).diff(&b), a);
    }

    #[test]
    fn diff_then_sum_round_trips(a in any_angle(), b in any_angle()) {
        prop_assert_eq!(a.diff(&b).sum(&b), a);
    }

    #[test]
    fn double_negation_is_identity(a in any_angle()) {
        prop_assert_eq!(a.negate().negate(), a);
    }

    #[test]
    fn sum_is_commutative(a in any_angle(), b in any_angle()) {
        prop_assert_eq!(a.sum(&b), b.sum(&a));
    }

    #[test]
    fn diff_matches_total_millidegrees(a in any_angle(), b in any_angle()) {
        let d = a.diff(&b);
        prop_assert_eq!(d.total_mdeg(), a.total_mdeg() - b.total_mdeg());
    }

    #[test]
    fn diff_mdeg_agrees_with_wide_diff_when_small(a in any_angle(), b in any_angle()) {
        let wide = a.total_mdeg() - b.total_mdeg();
        if a.diff_is_small(&b) {
            prop_assert_eq!(a.diff_mdeg(&b).unwrap() as i64, wide);
        } else {
            prop_assert!(a.diff_mdeg(&b).is_err());
        }
    }

    #[test]
    fn average_is_bounded_by_inputs(a in any_angle(), b in any_angle()) {
        let avg = a.average(&b).total_mdeg();
        let (lo, hi) = {
            let (x, y) = (a.total_mdeg(), b.total_mdeg());
            (x.min(y), x.max(y))
        };
        prop_assert!(avg >= lo && avg <= hi);
    }

    #[test]
    fn low_res_round_trip(app in -2_000_000..2_000_000i32) {
        let a = Angle::from_low_res(app, 1000).unwrap();
        prop_assert_eq!(a.to_low_res(1000).unwrap(), app);
    }
}
