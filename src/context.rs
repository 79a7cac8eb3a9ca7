//! Mutable per-run machine state: registers, memory, hash buffers and the
//! expression-variable scope.

use std::collections::{BTreeMap, HashMap, HashSet};

use num_bigint::BigUint;

use crate::errors::{ExecutorError, Result};
use crate::eval::CmdValue;
use crate::field::{Fea, H4, FEA_ZERO};
use crate::storage::SmtSetResult;

/// Coprocessor usage counters. Each one is bounded by the corresponding
/// machine's row capacity; the ROM reads them back to enforce those bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub arith: u64,
    pub binary: u64,
    pub keccak_f: u64,
    pub mem_align: u64,
    pub padding_pg: u64,
    pub poseidon_g: u64,
}

/// The machine registers as they stand between two steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    pub a: Fea,
    pub b: Fea,
    pub c: Fea,
    pub d: Fea,
    pub e: Fea,
    pub sr: Fea,
    pub ctx: i64,
    pub sp: i64,
    pub pc: i64,
    pub gas: i64,
    pub rr: i64,
    pub hash_pos: i64,
    pub max_mem: i64,
    pub zk_pc: u64,
    pub counters: Counters,
}

impl Default for Registers {
    fn default() -> Self {
        Registers {
            a: (*FEA_ZERO),
            b: (*FEA_ZERO),
            c: (*FEA_ZERO),
            d: (*FEA_ZERO),
            e: (*FEA_ZERO),
            sr: (*FEA_ZERO),
            ctx: 0,
            sp: 0,
            pc: 0,
            gas: 0,
            rr: 0,
            hash_pos: 0,
            max_mem: 0,
            zk_pc: 0,
            counters: Counters::default(),
        }
    }
}

/// Incremental hash buffer. Bytes may be written out of order, so each slot
/// stays `None` until the first write; the digest is sealed by the length
/// instruction.
#[derive(Debug, Clone, Default)]
pub struct HashBuffer {
    pub data: Vec<Option<u8>>,
    /// Chunk size recorded at each absorb position.
    pub reads: HashMap<usize, usize>,
    pub digest: Option<BigUint>,
}

impl HashBuffer {
    /// All bytes as a contiguous slice; a hole is fatal because the padding
    /// machine needs the complete preimage.
    pub fn bytes(&self, addr: u64) -> Result<Vec<u8>> {
        self.data
            .iter()
            .enumerate()
            .map(|(pos, b)| b.ok_or(ExecutorError::HashByteUndefined { addr, pos }))
            .collect()
    }
}

/// Pending storage write computed while resolving the free input, kept so
/// the processing phase of the same step does not repeat the tree update.
#[derive(Debug, Clone)]
pub struct LastStorageWrite {
    pub key_i: H4,
    pub key: H4,
    pub new_root: H4,
    pub res: SmtSetResult,
    pub step: usize,
}

/// Everything mutable that is not a trace column: memory, hash buffers,
/// expression variables and the warm-access bookkeeping.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    pub mem: HashMap<u64, Fea, ahash::RandomState>,
    pub hash_k: BTreeMap<u64, HashBuffer>,
    pub hash_p: BTreeMap<u64, HashBuffer>,
    pub vars: HashMap<String, CmdValue>,
    /// Checkpoint stack of warm addresses and storage slots. Entry maps an
    /// address to the set of warmed storage keys under it; an address with
    /// an empty set is warm by itself.
    pub accessed_storage: Vec<HashMap<String, HashSet<String>>>,
    /// Bytecode by digest, seeded from the input and extended by
    /// `saveContractBytecode`.
    pub contracts_bytecode: HashMap<String, Vec<u8>>,
    pub last_s_write: Option<LastStorageWrite>,
    pub step: usize,
    pub steps_n: usize,
}

impl ExecutionContext {
    pub fn new(steps_n: usize) -> Self {
        ExecutionContext {
            accessed_storage: vec![HashMap::new()],
            steps_n,
            ..Default::default()
        }
    }
}
