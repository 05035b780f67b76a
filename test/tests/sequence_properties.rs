/// Property tests for 16 bit sequence number comparisons
/// These hold for every pair of numbers, including across the wrap at 65535

use netrep_shared::{
    sequence_greater_than, sequence_less_than, sequential_distance, wrapping_diff,
    SEQUENCE_HALF_SPAN,
};
use proptest::prelude::*;

proptest! {
    /// Two distinct numbers are always ordered one way, never both
    #[test]
    fn ordering_is_antisymmetric(a in any::<u16>(), b in any::<u16>()) {
        prop_assume!(a != b);
        prop_assert_ne!(sequence_greater_than(a, b), sequence_greater_than(b, a));
        prop_assert_eq!(sequence_less_than(a, b), sequence_greater_than(b, a));
    }

    #[test]
    fn nothing_is_greater_than_itself(a in any::<u16>()) {
        prop_assert!(!sequence_greater_than(a, a));
        prop_assert!(!sequence_less_than(a, a));
    }

    /// Swapping the operands flips the sign of the difference, except at
    /// exactly half the range where both directions read as -32768
    #[test]
    fn diff_sign_flips_with_operands(a in any::<u16>(), b in any::<u16>()) {
        let forward = wrapping_diff(a, b);
        prop_assume!(forward != i16::MIN);
        prop_assert_eq!(wrapping_diff(b, a), -forward);
    }

    #[test]
    fn diff_steps_from_a_to_b(a in any::<u16>(), b in any::<u16>()) {
        prop_assert_eq!(a.wrapping_add(wrapping_diff(a, b) as u16), b);
    }

    #[test]
    fn distance_counts_forward_steps(a in any::<u16>(), steps in 1..=SEQUENCE_HALF_SPAN) {
        prop_assert_eq!(sequential_distance(a, a.wrapping_add(steps)), steps);
    }

    /// A zero distance is ambiguous: equal numbers and numbers that do not
    /// follow `a` both read as 0
    #[test]
    fn distance_is_zero_when_b_does_not_follow(
        a in any::<u16>(),
        steps in (SEQUENCE_HALF_SPAN + 1)..=u16::MAX,
    ) {
        prop_assert_eq!(sequential_distance(a, a), 0);
        prop_assert_eq!(sequential_distance(a, a.wrapping_add(steps)), 0);
    }
}

#[test]
fn half_span_boundary() {
    assert!(sequence_greater_than(SEQUENCE_HALF_SPAN, 0));
    assert!(!sequence_greater_than(0, SEQUENCE_HALF_SPAN));
    assert!(sequence_greater_than(0, SEQUENCE_HALF_SPAN + 1));
    assert_eq!(wrapping_diff(0, SEQUENCE_HALF_SPAN), i16::MIN);
    assert_eq!(wrapping_diff(SEQUENCE_HALF_SPAN, 0), i16::MIN);
}
