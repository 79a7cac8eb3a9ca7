//! Evidence queues for the coprocessor state machines.
//!
//! Every step that exercises a coprocessor pushes one record describing the
//! operation in the shape that machine expects as input. The collection is
//! returned alongside the trace so each secondary machine can be executed
//! against exactly the work the main machine claimed.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::{BigInt, BigUint};

use crate::field::{Fe, Fea};
use crate::storage::{SmtGetResult, SmtSetResult};

/// One big-number arithmetic or elliptic-curve equation check.
#[derive(Debug, Clone)]
pub struct ArithAction {
    pub x1: BigUint,
    pub y1: BigUint,
    pub x2: BigUint,
    pub y2: BigUint,
    pub x3: BigUint,
    pub y3: BigUint,
    /// Equation selectors: base mul-add, curve add, curve double,
    /// curve result row.
    pub sel_eq: [bool; 4],
}

/// One 256-bit binary operation. Operands are signed because the
/// signed-less-than opcode records its inputs after sign interpretation.
#[derive(Debug, Clone)]
pub struct BinaryAction {
    pub a: BigInt,
    pub b: BigInt,
    pub c: BigUint,
    pub opcode: u8,
}

/// One memory access, read or write, in program order.
#[derive(Debug, Clone)]
pub struct MemAccess {
    pub is_write: bool,
    pub address: u64,
    pub step: usize,
    pub value: Fea,
}

/// One byte-offset read or write over a two-word window.
#[derive(Debug, Clone)]
pub struct MemAlignAction {
    pub m0: BigUint,
    pub m1: BigUint,
    pub v: BigUint,
    pub w0: BigUint,
    pub w1: BigUint,
    pub offset: u32,
    pub wr256: bool,
    pub wr8: bool,
}

/// One storage-tree operation with its full proof record.
#[derive(Debug, Clone)]
pub enum StorageAction {
    Read(SmtGetResult),
    Write(SmtSetResult),
}

/// Final content of one hash buffer together with the chunk sizes it was
/// absorbed in. Consumed by the padding machines.
#[derive(Debug, Clone)]
pub struct HashReads {
    pub data: Vec<u8>,
    pub reads: Vec<usize>,
}

/// Everything the secondary machines need, accumulated across the run.
#[derive(Debug, Default)]
pub struct Evidence {
    pub arith: Vec<ArithAction>,
    pub binary: Vec<BinaryAction>,
    pub mem: Vec<MemAccess>,
    pub mem_align: Vec<MemAlignAction>,
    pub storage: Vec<StorageAction>,
    /// Sponge inputs and outputs observed during storage key derivation,
    /// 12 input limbs followed by the 4-limb output.
    pub poseidon_g: Vec<[Fe; 16]>,
    pub padding_kk: Vec<HashReads>,
    pub padding_pg: Vec<HashReads>,
    /// Distinct 32-bit values that must be range-checked.
    pub byte4: BTreeSet<u64>,
    /// Log payloads assembled by `storeLog`, keyed by log index.
    pub logs: BTreeMap<u64, OutLog>,
}

/// Topics and data words of one emitted log, as hex strings.
#[derive(Debug, Clone, Default)]
pub struct OutLog {
    pub topics: Vec<String>,
    pub data: Vec<String>,
}
