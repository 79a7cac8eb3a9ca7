//! Byte-aligned windows over pairs of 256-bit memory words.
//!
//! A value may straddle two consecutive words at a byte offset; these
//! helpers compute the read window and the one or two rewritten words for
//! the aligned-write forms. The same formulas back both the free-input
//! resolver and the check section, and the `memAlignWR*` expression
//! functions reuse them.

use num_bigint::BigUint;
use once_cell::sync::Lazy;

use crate::field::MASK_256;

/// Mask selecting everything except one byte lane, over a 512-bit span.
static BYTE_MASK_ON_256: Lazy<BigUint> =
    Lazy::new(|| (&*MASK_256 << 256u32) | (&*MASK_256 >> 8u32));

/// 256-bit window starting `offset` bytes into `m0`, continuing into `m1`.
/// `offset` must already be validated to lie in `0..=32`.
pub fn read_value(m0: &BigUint, m1: &BigUint, offset: u32) -> BigUint {
    let bits = 8 * offset;
    let left = (m0 << bits) & &*MASK_256;
    let right = (m1 >> (256 - bits)) & (&*MASK_256 >> (256 - bits));
    left | right
}

/// Both words after writing the 256-bit value `v` at byte `offset`.
pub fn write_word(m0: &BigUint, m1: &BigUint, v: &BigUint, offset: u32) -> (BigUint, BigUint) {
    let bits = 8 * offset;
    let w0 = (m0 & (&*MASK_256 - ((BigUint::from(1u8) << (256 - bits)) - 1u8))) | (v >> bits);
    let w1 = (m1 & (&*MASK_256 >> bits)) | ((v << (256 - bits)) & &*MASK_256);
    (w0, w1)
}

/// First word after writing the low byte of `v` at byte `offset`.
pub fn write_byte(m0: &BigUint, v: &BigUint, offset: u32) -> BigUint {
    let bits = 8 * (31 - offset);
    (m0 & (&*BYTE_MASK_ON_256 >> (8 * offset)) & &*MASK_256)
        | ((v & BigUint::from(0xFFu8)) << bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn s(hex: &str) -> BigUint {
        BigUint::parse_bytes(hex.as_bytes(), 16).unwrap()
    }

    #[test]
    fn read_at_zero_returns_first_word() {
        let m0 = s("1122334455");
        let m1 = s("ff00000000000000000000000000000000000000000000000000000000000000");
        assert_eq!(read_value(&m0, &m1, 0), m0);
    }

    #[test]
    fn read_at_32_returns_second_word() {
        let m0 = s("1122334455");
        let m1 = s("deadbeef");
        assert_eq!(read_value(&m0, &m1, 32), m1);
    }

    #[test]
    fn read_straddles_boundary() {
        // One byte from m0's tail, the rest from m1's head.
        let m0 = s("aa");
        let m1 = s("bb00000000000000000000000000000000000000000000000000000000000000");
        let v = read_value(&m0, &m1, 31);
        assert_eq!(
            v,
            s("aabb000000000000000000000000000000000000000000000000000000000000")
        );
    }

    #[test]
    fn write_word_at_zero_replaces_first_word() {
        let m0 = s("11");
        let m1 = s("22");
        let v = s("deadbeef");
        let (w0, w1) = write_word(&m0, &m1, &v, 0);
        assert_eq!(w0, v);
        assert_eq!(w1, m1);
    }

    #[test]
    fn write_byte_replaces_single_lane() {
        let m0 = s("ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff");
        let w0 = write_byte(&m0, &s("00"), 0);
        assert_eq!(
            w0,
            s("00ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
        );
        let w31 = write_byte(&m0, &BigUint::zero(), 31);
        assert_eq!(
            w31,
            s("ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff00")
        );
    }
}
