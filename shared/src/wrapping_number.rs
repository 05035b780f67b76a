use thiserror::Error;

use crate::types::SequenceNumber;

/// Half of the 16 bit sequence range. Two numbers closer than this are
/// ordered by their forward distance, further apart they are assumed to have
/// wrapped.
pub const SEQUENCE_HALF_SPAN: u16 = 32768;

/// Errors that can occur during wrapping number operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WrappingNumberError {
    /// Integer overflow occurred during wrapping difference calculation.
    /// This should be mathematically impossible with valid u16 inputs.
    #[error("Integer overflow in wrapping_diff({a}, {b}) - this should not happen")]
    IntegerOverflow { a: u16, b: u16 },
}

/// Returns whether or not a wrapping number is greater than another
/// sequence_greater_than(2,1) will return true
/// sequence_greater_than(1,2) will return false
/// sequence_greater_than(1,1) will return false
/// sequence_greater_than(0,65535) will return true
pub fn sequence_greater_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_HALF_SPAN)) || ((s1 < s2) && (s2 - s1 > SEQUENCE_HALF_SPAN))
}

/// Returns whether or not a wrapping number is less than another
/// sequence_less_than(1,2) will return true
/// sequence_less_than(2,1) will return false
/// sequence_less_than(1,1) will return false
pub fn sequence_less_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    sequence_greater_than(s2, s1)
}

/// Forward distance from `a` to `b`, for a `b` that follows `a`.
///
/// Returns 0 both when `a == b` and when `b` does not follow `a` within
/// [`SEQUENCE_HALF_SPAN`]; the second case is an invalid distance, so a 0
/// result only means "equal" if the caller already knows `a == b`.
///
/// # Examples
/// ```
/// # use netrep_shared::sequential_distance;
/// assert_eq!(sequential_distance(10, 14), 4);
/// assert_eq!(sequential_distance(65534, 1), 3);
/// assert_eq!(sequential_distance(7, 7), 0);
/// assert_eq!(sequential_distance(14, 10), 0);
/// assert_eq!(sequential_distance(0, 40000), 0);
/// ```
pub fn sequential_distance(a: SequenceNumber, b: SequenceNumber) -> u16 {
    if sequence_greater_than(b, a) {
        b.wrapping_sub(a)
    } else {
        0
    }
}

/// Retrieves the wrapping difference between 2 u16 values.
/// Returns an error if an impossible integer overflow occurs.
///
/// # Examples
/// ```
/// # use netrep_shared::try_wrapping_diff;
/// assert_eq!(try_wrapping_diff(1, 2).unwrap(), 1);
/// assert_eq!(try_wrapping_diff(2, 1).unwrap(), -1);
/// assert_eq!(try_wrapping_diff(65535, 0).unwrap(), 1);
/// assert_eq!(try_wrapping_diff(0, 65535).unwrap(), -1);
/// ```
pub fn try_wrapping_diff(a: SequenceNumber, b: SequenceNumber) -> Result<i16, WrappingNumberError> {
    const MAX: i32 = i16::MAX as i32;
    const MIN: i32 = i16::MIN as i32;
    const ADJUST: i32 = (u16::MAX as i32) + 1;

    let a_i32: i32 = i32::from(a);
    let b_i32: i32 = i32::from(b);

    let result = b_i32 - a_i32;
    if (MIN..=MAX).contains(&result) {
        return Ok(result as i16);
    }

    let adjusted = if b_i32 > a_i32 {
        b_i32 - (a_i32 + ADJUST)
    } else {
        (b_i32 + ADJUST) - a_i32
    };
    if (MIN..=MAX).contains(&adjusted) {
        Ok(adjusted as i16)
    } else {
        Err(WrappingNumberError::IntegerOverflow { a, b })
    }
}

/// Retrieves the wrapping difference between 2 u16 values.
///
/// # Panics
///
/// Panics if an impossible integer overflow occurs (this should never happen with valid u16 inputs).
///
/// # Examples
/// ```
/// # use netrep_shared::wrapping_diff;
/// assert_eq!(wrapping_diff(1, 2), 1);
/// assert_eq!(wrapping_diff(2, 1), -1);
/// assert_eq!(wrapping_diff(65535, 0), 1);
/// assert_eq!(wrapping_diff(0, 65535), -1);
/// ```
pub fn wrapping_diff(a: SequenceNumber, b: SequenceNumber) -> i16 {
    try_wrapping_diff(a, b).expect("integer overflow in wrapping_diff - this should not happen")
}
