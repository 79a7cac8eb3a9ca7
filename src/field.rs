//! Goldilocks field bindings and the fixed-width value model.
//!
//! Every machine register is either a field element or an 8-limb vector of
//! them ("fea") encoding a 256-bit scalar, 32 bits per limb, little endian.
//! State roots and storage keys travel as 4-limb vectors ("h4") of 64-bit
//! limbs; [`sr8to4`] and [`sr4to8`] convert between the two shapes.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use once_cell::sync::Lazy;
use p3_field::{Field, AbstractField, PrimeField64};

use crate::errors::{ExecutorError, Result};

pub type Fe = p3_goldilocks::Goldilocks;

/// 8-limb encoding of a 256-bit scalar.
pub type Fea = [Fe; 8];

/// 4-limb root/key encoding.
pub type H4 = [Fe; 4];

pub static FEA_ZERO: Lazy<Fea> = Lazy::new(|| [Fe::zero(); 8]);

/// Scalars up to 2^256 - 1.
pub static MASK_256: Lazy<BigUint> = Lazy::new(|| (BigUint::from(1u8) << 256) - 1u8);
pub static TWO_TO_255: Lazy<BigUint> = Lazy::new(|| BigUint::from(1u8) << 255);
pub static TWO_TO_256: Lazy<BigUint> = Lazy::new(|| BigUint::from(1u8) << 256);

pub fn fe(v: u64) -> Fe {
    Fe::from_canonical_u64(v % Fe::ORDER_U64)
}

pub fn fe_i64(v: i64) -> Fe {
    if v >= 0 {
        fe(v as u64)
    } else {
        -fe(v.unsigned_abs())
    }
}

/// Narrows a field element to a signed 32-bit quantity.
///
/// Canonical values up to `2^31 - 1` map to themselves; values within
/// `2^31` of the modulus map to their negative counterpart. Anything in
/// between is not representable and is a fatal range error.
pub fn fe_to_i64(v: Fe) -> Result<i64> {
    let o = v.as_canonical_u64();
    if o <= 0x7FFF_FFFF {
        Ok(o as i64)
    } else if o >= Fe::ORDER_U64 - 0x8000_0000 {
        Ok(o as i64 - Fe::ORDER_U64 as i64)
    } else {
        Err(ExecutorError::NotA32BitValue(o))
    }
}

/// Recomposes a 256-bit scalar from 8 limbs of 32 bits each.
///
/// Limbs are taken at their canonical value without a range check, matching
/// the trace semantics where sums of weighted limbs may momentarily exceed
/// 32 bits.
pub fn fea_to_scalar(v: &Fea) -> BigUint {
    let mut s = BigUint::zero();
    for limb in v.iter().rev() {
        s = (s << 32) + BigUint::from(limb.as_canonical_u64());
    }
    s
}

/// Decomposes a 256-bit scalar into 8 limbs of 32 bits each.
pub fn scalar_to_fea(s: &BigUint) -> Fea {
    let mut out = *FEA_ZERO;
    let mask = BigUint::from(0xFFFF_FFFFu32);
    for (k, limb) in out.iter_mut().enumerate() {
        let part = (s >> (32 * k)) & &mask;
        *limb = fe(part.to_u64_digits().first().copied().unwrap_or(0));
    }
    out
}

/// Signed variant used by the expression evaluator: negative values wrap
/// through the 256-bit two's complement before decomposition.
pub fn bigint_to_fea(s: &BigInt) -> Fea {
    let wrapped: BigUint = if s.sign() == Sign::Minus {
        let m = BigInt::from_biguint(Sign::Plus, MASK_256.clone()) + 1;
        let v: BigInt = ((s % &m) + &m) % &m;
        v.to_biguint().unwrap_or_default()
    } else {
        s.to_biguint().unwrap_or_default() & MASK_256.clone()
    };
    scalar_to_fea(&wrapped)
}

pub fn scalar_to_bigint(s: &BigUint) -> BigInt {
    BigInt::from_biguint(Sign::Plus, s.clone())
}

/// Packs pairs of 32-bit limbs into the 4-limb root shape.
pub fn sr8to4(sr: &Fea) -> H4 {
    let shift = fe(0x1_0000_0000);
    [
        sr[0] + sr[1] * shift,
        sr[2] + sr[3] * shift,
        sr[4] + sr[5] * shift,
        sr[6] + sr[7] * shift,
    ]
}

/// Splits 4 wide limbs back into the 8-limb register shape.
pub fn sr4to8(r: &H4) -> Fea {
    let mut sr = *FEA_ZERO;
    for k in 0..4 {
        let v = r[k].as_canonical_u64();
        sr[2 * k] = fe(v & 0xFFFF_FFFF);
        sr[2 * k + 1] = fe(v >> 32);
    }
    sr
}

/// Recomposes a scalar from a 4-limb root, 64 bits per limb.
pub fn h4_to_scalar(h: &H4) -> BigUint {
    let mut s = BigUint::zero();
    for limb in h.iter().rev() {
        s = (s << 64) + BigUint::from(limb.as_canonical_u64());
    }
    s
}

pub fn scalar_to_h4(s: &BigUint) -> H4 {
    let mask = BigUint::from(u64::MAX);
    let mut out = [Fe::zero(); 4];
    for (k, limb) in out.iter_mut().enumerate() {
        let part = (s >> (64 * k)) & &mask;
        *limb = fe(part.to_u64_digits().first().copied().unwrap_or(0));
    }
    out
}

pub fn h4_canonical(h: &H4) -> [u64; 4] {
    [
        h[0].as_canonical_u64(),
        h[1].as_canonical_u64(),
        h[2].as_canonical_u64(),
        h[3].as_canonical_u64(),
    ]
}

pub fn fea_is_zero(a: &Fea) -> bool {
    a.iter().all(|v| v.is_zero())
}
