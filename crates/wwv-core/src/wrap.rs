//! Wrap-aware arithmetic for RTP sequence numbers and timestamps.
//!
//! `seq` wraps mod 2^16 and `rtp_ts` wraps mod 2^32 (RFC 3550 §5.1). Every
//! comparison and subtraction in the resequencer and the TimeSnap mapping
//! must go through these helpers rather than native integer subtraction,
//! or a wrap near the epoch boundary reads as a multi-hour jump.
//!
//! The half-range convention follows RFC 3550 Appendix A.1: the signed
//! difference `a - b` is defined as the shorter arc around the modular
//! circle, so a result is only ambiguous when `a` and `b` are exactly
//! half the modulus apart.

/// Signed difference `a - b` for 16-bit wrapping sequence numbers, returned
/// as the shortest signed arc in `[-32768, 32767]`.
pub fn signed_wrap_u16(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

/// Signed difference `a - b` for 32-bit wrapping RTP timestamps, returned
/// as the shortest signed arc in `[i32::MIN, i32::MAX]`.
pub fn signed_wrap_u32(a: u32, b: u32) -> i64 {
    a.wrapping_sub(b) as i32 as i64
}

/// Advances a 16-bit wrapping sequence number by `delta` (may be negative).
pub fn advance_u16(base: u16, delta: i32) -> u16 {
    base.wrapping_add(delta as i16 as u16)
}

/// Advances a 32-bit wrapping RTP timestamp by `delta` samples (may be negative).
pub fn advance_u32(base: u32, delta: i64) -> u32 {
    base.wrapping_add(delta as i32 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wrap_boundary_512_samples() {
        // property 10: rtp_ts = 0 arriving after rtp_ts = 0xFFFFFE00 is 512
        // samples later, not ~2^32 earlier.
        let before = 0xFFFFFE00u32;
        let after = 0u32;
        assert_eq!(signed_wrap_u32(after, before), 512);
    }

    #[test]
    fn seq_wrap_boundary() {
        let before = 0xFFFEu16;
        let after = 0x0001u16;
        assert_eq!(signed_wrap_u16(after, before), 3);
    }

    proptest! {
        #[test]
        fn u16_roundtrip(base: u16, delta in -30000i32..30000i32) {
            let advanced = advance_u16(base, delta);
            prop_assert_eq!(signed_wrap_u16(advanced, base), delta);
        }

        #[test]
        fn u32_roundtrip(base: u32, delta in -1_000_000_000i64..1_000_000_000i64) {
            let advanced = advance_u32(base, delta);
            prop_assert_eq!(signed_wrap_u32(advanced, base), delta);
        }

        #[test]
        fn u16_antisymmetric(a: u16, b: u16) {
            prop_assert_eq!(signed_wrap_u16(a, b), -signed_wrap_u16(b, a));
        }

        #[test]
        fn u32_antisymmetric(a: u32, b: u32) {
            prop_assert_eq!(signed_wrap_u32(a, b), -signed_wrap_u32(b, a));
        }
    }
}
