//! The eight 256-bit binary opcodes shared between the free-input resolver
//! and the per-step check section.

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::errors::{ExecutorError, Result};
use crate::field::{MASK_256, TWO_TO_255, TWO_TO_256};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BinOpcode {
    #[default]
    Add = 0,
    Sub = 1,
    Lt = 2,
    Slt = 3,
    Eq = 4,
    And = 5,
    Or = 6,
    Xor = 7,
}

impl BinOpcode {
    pub fn decode(raw: u8) -> Result<Self> {
        Self::try_from(raw).map_err(|_| ExecutorError::InvalidBinaryOpcode(raw))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinOpcode::Add => "ADD",
            BinOpcode::Sub => "SUB",
            BinOpcode::Lt => "LT",
            BinOpcode::Slt => "SLT",
            BinOpcode::Eq => "EQ",
            BinOpcode::And => "AND",
            BinOpcode::Or => "OR",
            BinOpcode::Xor => "XOR",
        }
    }

    /// 256-bit result of the opcode. ADD and SUB wrap explicitly;
    /// comparisons return 0 or 1.
    pub fn apply(&self, a: &BigUint, b: &BigUint) -> BigUint {
        match self {
            BinOpcode::Add => (a + b) & &*MASK_256,
            BinOpcode::Sub => ((a + &*TWO_TO_256) - b) & &*MASK_256,
            BinOpcode::Lt => bool_scalar(a < b),
            BinOpcode::Slt => {
                let (sa, sb) = (to_signed(a), to_signed(b));
                bool_scalar(sa < sb)
            }
            BinOpcode::Eq => bool_scalar(a == b),
            BinOpcode::And => a & b,
            BinOpcode::Or => a | b,
            BinOpcode::Xor => a ^ b,
        }
    }

    /// Carry column value for the opcode.
    pub fn carry(&self, a: &BigUint, b: &BigUint) -> bool {
        match self {
            BinOpcode::Add => (a + b) >> 256u32 > BigUint::zero(),
            BinOpcode::Sub => a < b,
            BinOpcode::Lt => a < b,
            BinOpcode::Slt => to_signed(a) < to_signed(b),
            BinOpcode::Eq => a == b,
            BinOpcode::And | BinOpcode::Or | BinOpcode::Xor => false,
        }
    }

    /// Operand pair as recorded in the evidence queue. SLT records the
    /// signed interpretations.
    pub fn evidence_operands(&self, a: &BigUint, b: &BigUint) -> (BigInt, BigInt) {
        match self {
            BinOpcode::Slt => (to_signed(a), to_signed(b)),
            _ => (BigInt::from(a.clone()), BigInt::from(b.clone())),
        }
    }
}

fn bool_scalar(v: bool) -> BigUint {
    if v {
        BigUint::one()
    } else {
        BigUint::zero()
    }
}

fn to_signed(v: &BigUint) -> BigInt {
    if v >= &*TWO_TO_255 {
        BigInt::from(v.clone()) - BigInt::from(TWO_TO_256.clone())
    } else {
        BigInt::from(v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scalar(bytes: &[u8]) -> BigUint {
        BigUint::from_bytes_be(bytes)
    }

    #[test]
    fn add_wraps_and_carries() {
        let max = MASK_256.clone();
        let one = BigUint::one();
        assert_eq!(BinOpcode::Add.apply(&max, &one), BigUint::zero());
        assert!(BinOpcode::Add.carry(&max, &one));
        assert!(!BinOpcode::Add.carry(&one, &one));
    }

    #[test]
    fn slt_uses_signed_interpretation() {
        // -1 < 1 even though the unsigned encoding of -1 is larger.
        let minus_one = MASK_256.clone();
        let one = BigUint::one();
        assert_eq!(BinOpcode::Slt.apply(&minus_one, &one), BigUint::one());
        assert_eq!(BinOpcode::Lt.apply(&minus_one, &one), BigUint::zero());
    }

    #[test]
    fn slt_evidence_is_signed() {
        let minus_one = MASK_256.clone();
        let (a, _) = BinOpcode::Slt.evidence_operands(&minus_one, &BigUint::one());
        assert_eq!(a, BigInt::from(-1));
    }

    proptest! {
        #[test]
        fn add_sub_round_trip(a in proptest::collection::vec(any::<u8>(), 32),
                              b in proptest::collection::vec(any::<u8>(), 32)) {
            let (a, b) = (scalar(&a), scalar(&b));
            let sum = BinOpcode::Add.apply(&a, &b);
            prop_assert_eq!(BinOpcode::Sub.apply(&sum, &b), a & &*MASK_256);
        }
    }
}
