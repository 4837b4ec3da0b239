//! Wrap-aware sequence number arithmetic
//!
//! Sequence numbers are 32 bits and wrap modulo 2^32. Ordering across the
//! wrap boundary uses signed-difference arithmetic: `a` is before `b` when
//! the wrapping difference `b - a`, reinterpreted as `i32`, is positive.
//!
//! The half-range point is ambiguous by construction: `b - a == 2^31` maps
//! to `i32::MIN`, which is negative, so `seq_lt(a, a + 2^31)` is defined as
//! `false` rather than guessed.

/// Signed distance from `a` to `b` modulo 2^32.
///
/// Positive means `b` is ahead of `a`.
#[inline]
pub fn seq_diff(a: u32, b: u32) -> i32 {
    b.wrapping_sub(a) as i32
}

/// True if `a` is strictly before `b` in wrap order.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    seq_diff(a, b) > 0
}

/// True if `a` is before or equal to `b` in wrap order.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

/// Unrolls a wrapping 32-bit sequence number into a monotonic 64-bit
/// counter, given the last unrolled value seen on the same sub-stream.
///
/// Packets more than half a range behind stay behind; everything else is
/// placed at the nearest 64-bit position ahead of or behind `last`.
#[inline]
pub fn seq_unroll(last: u64, seq: u32) -> u64 {
    let delta = seq_diff(last as u32, seq) as i64;
    last.wrapping_add_signed(delta)
}
