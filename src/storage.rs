//! Merkle-tree state store collaborator.
//!
//! The executor only needs two operations, `get(root, key)` and
//! `set(root, key, value)`, both speaking 4-limb roots and keys, plus a
//! program space for contract bytecode addressed by digest. The production
//! deployment backs this with a remote sparse-Merkle-tree service; tests and
//! the demo binary use the in-memory [`MemTreeStore`], whose root evolution
//! is deterministic through the injected [`TreeHasher`].

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::Zero;
use p3_field::{AbstractField, PrimeField64};
use tiny_keccak::{Hasher as _, Keccak};

use crate::errors::{ExecutorError, Result};
use crate::field::{h4_canonical, Fe, Fea, H4};

/// 12-to-4 sponge used for storage keys and root evolution.
///
/// Injected so the executor, the store and the downstream coprocessor all
/// agree bit-for-bit on key derivation without this crate owning the
/// permutation constants.
pub trait TreeHasher {
    fn hash(&self, inp: &Fea, cap: &H4) -> H4;
}

/// Default hasher built on Keccak-256, reduced limb-wise into the field.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeccakTreeHasher;

impl TreeHasher for KeccakTreeHasher {
    fn hash(&self, inp: &Fea, cap: &H4) -> H4 {
        let mut keccak = Keccak::v256();
        for limb in inp.iter().chain(cap.iter()) {
            keccak.update(&limb.as_canonical_u64().to_le_bytes());
        }
        let mut digest = [0u8; 32];
        keccak.finalize(&mut digest);
        let mut out = [Fe::zero(); 4];
        for (k, limb) in out.iter_mut().enumerate() {
            let raw = u64::from_le_bytes(digest[8 * k..8 * (k + 1)].try_into().unwrap());
            *limb = Fe::from_wrapped_u64(raw);
        }
        out
    }
}

/// Proof record returned by a storage read.
#[derive(Debug, Clone)]
pub struct SmtGetResult {
    pub root: H4,
    pub key: H4,
    pub siblings: Vec<Vec<Fe>>,
    pub ins_key: H4,
    pub ins_value: BigUint,
    pub is_old0: bool,
    pub value: BigUint,
    pub proof_hash_counter: u64,
}

/// Proof record returned by a storage write.
#[derive(Debug, Clone)]
pub struct SmtSetResult {
    pub old_root: H4,
    pub new_root: H4,
    pub key: H4,
    pub siblings: Vec<Vec<Fe>>,
    pub ins_key: H4,
    pub ins_value: BigUint,
    pub is_old0: bool,
    pub old_value: BigUint,
    pub new_value: BigUint,
    pub mode: &'static str,
    pub proof_hash_counter: u64,
}

/// The external Merkle store. Both calls are blocking round trips; the
/// step cannot commit until they return.
pub trait StateStore {
    fn get(&mut self, root: &H4, key: &H4) -> Result<SmtGetResult>;
    fn set(&mut self, root: &H4, key: &H4, value: &BigUint) -> Result<SmtSetResult>;
    fn get_program(&mut self, key: &H4) -> Result<Vec<u8>>;
    fn set_program(&mut self, key: &H4, data: &[u8]) -> Result<()>;
}

type KvMap = HashMap<[u64; 4], BigUint, ahash::RandomState>;

/// In-memory store. Every root ever produced keeps its full key/value
/// snapshot so reads against historical roots stay valid.
#[derive(Debug, Default)]
pub struct MemTreeStore<H: TreeHasher> {
    hasher: H,
    states: HashMap<[u64; 4], KvMap, ahash::RandomState>,
    programs: HashMap<[u64; 4], Vec<u8>, ahash::RandomState>,
}

impl<H: TreeHasher> MemTreeStore<H> {
    pub fn new(hasher: H) -> Self {
        Self {
            hasher,
            states: HashMap::default(),
            programs: HashMap::default(),
        }
    }

    fn state_at(&self, root: &H4) -> KvMap {
        self.states
            .get(&h4_canonical(root))
            .cloned()
            .unwrap_or_default()
    }

    /// New root commitment after a write: chain the key and the value
    /// through the sponge, capped by the previous root.
    fn next_root(&self, root: &H4, key: &H4, value: &BigUint) -> H4 {
        let mut key_inp = [Fe::zero(); 8];
        key_inp[..4].copy_from_slice(key);
        let inner = self.hasher.hash(&key_inp, root);
        let value_fea = crate::field::scalar_to_fea(value);
        self.hasher.hash(&value_fea, &inner)
    }
}

impl<H: TreeHasher> StateStore for MemTreeStore<H> {
    fn get(&mut self, root: &H4, key: &H4) -> Result<SmtGetResult> {
        let state = self.state_at(root);
        let value = state.get(&h4_canonical(key)).cloned().unwrap_or_default();
        Ok(SmtGetResult {
            root: *root,
            key: *key,
            siblings: Vec::new(),
            ins_key: [Fe::zero(); 4],
            ins_value: BigUint::zero(),
            is_old0: value.is_zero(),
            value,
            proof_hash_counter: 0,
        })
    }

    fn set(&mut self, root: &H4, key: &H4, value: &BigUint) -> Result<SmtSetResult> {
        let mut state = self.state_at(root);
        let k = h4_canonical(key);
        let old_value = state.get(&k).cloned().unwrap_or_default();
        let mode = match (old_value.is_zero(), value.is_zero()) {
            (true, false) => "insertNotFound",
            (false, false) => "update",
            (false, true) => "deleteFound",
            (true, true) => "zeroToZero",
        };
        if value.is_zero() {
            state.remove(&k);
        } else {
            state.insert(k, value.clone());
        }
        let new_root = if mode == "zeroToZero" {
            *root
        } else {
            self.next_root(root, key, value)
        };
        self.states.insert(h4_canonical(&new_root), state);
        Ok(SmtSetResult {
            old_root: *root,
            new_root,
            key: *key,
            siblings: Vec::new(),
            ins_key: [Fe::zero(); 4],
            ins_value: BigUint::zero(),
            is_old0: old_value.is_zero(),
            old_value,
            new_value: value.clone(),
            mode,
            proof_hash_counter: 0,
        })
    }

    fn get_program(&mut self, key: &H4) -> Result<Vec<u8>> {
        self.programs
            .get(&h4_canonical(key))
            .cloned()
            .ok_or(ExecutorError::ProgramNotFound)
    }

    fn set_program(&mut self, key: &H4, data: &[u8]) -> Result<()> {
        self.programs.insert(h4_canonical(key), data.to_vec());
        Ok(())
    }
}
