//! Batch input: the per-run values fixed before the first step.

use std::collections::HashMap;

use num_bigint::BigUint;
use serde::Deserialize;
use tiny_keccak::{Hasher as _, Keccak};

use crate::errors::{ExecutorError, Result};

/// Raw JSON shape of the batch input file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchInput {
    old_state_root: String,
    new_state_root: String,
    old_local_exit_root: String,
    new_local_exit_root: String,
    global_exit_root: String,
    sequencer_addr: String,
    #[serde(rename = "chainID")]
    chain_id: u64,
    num_batch: u64,
    timestamp: u64,
    #[serde(default)]
    batch_l2_data: String,
    #[serde(default)]
    contracts_bytecode: HashMap<String, String>,
    #[serde(default)]
    from: Option<String>,
}

/// Decoded batch input plus the two precomputed commitments the ROM reads
/// back through expression accessors.
#[derive(Debug, Clone, Default)]
pub struct BatchInput {
    pub old_state_root: BigUint,
    pub new_state_root: BigUint,
    pub old_local_exit_root: BigUint,
    pub new_local_exit_root: BigUint,
    pub global_exit_root: BigUint,
    pub sequencer_addr: BigUint,
    pub chain_id: u64,
    pub num_batch: u64,
    pub timestamp: u64,
    pub batch_l2_data: Vec<u8>,
    /// Contract bytecode keyed by 64-hex-digit digest (no 0x prefix).
    pub contracts_bytecode: HashMap<String, Vec<u8>>,
    pub from: Option<BigUint>,
    pub batch_hash_data: BigUint,
    pub global_hash: BigUint,
}

impl BatchInput {
    pub fn from_json_str(s: &str) -> Result<BatchInput> {
        let raw: RawBatchInput =
            serde_json::from_str(s).map_err(|e| input_err(&format!("invalid JSON: {e}")))?;

        let mut contracts = HashMap::new();
        for (digest, code) in &raw.contracts_bytecode {
            contracts.insert(normalize_digest(digest), parse_hex_bytes(code)?);
        }

        let mut input = BatchInput {
            old_state_root: parse_hex_scalar(&raw.old_state_root)?,
            new_state_root: parse_hex_scalar(&raw.new_state_root)?,
            old_local_exit_root: parse_hex_scalar(&raw.old_local_exit_root)?,
            new_local_exit_root: parse_hex_scalar(&raw.new_local_exit_root)?,
            global_exit_root: parse_hex_scalar(&raw.global_exit_root)?,
            sequencer_addr: parse_hex_scalar(&raw.sequencer_addr)?,
            chain_id: raw.chain_id,
            num_batch: raw.num_batch,
            timestamp: raw.timestamp,
            batch_l2_data: parse_hex_bytes(&raw.batch_l2_data)?,
            contracts_bytecode: contracts,
            from: raw.from.as_deref().map(parse_hex_scalar).transpose()?,
            batch_hash_data: BigUint::default(),
            global_hash: BigUint::default(),
        };
        input.preprocess();
        Ok(input)
    }

    /// Computes the batch data hash and the global input hash the ROM
    /// asserts against. Packing is byte-exact with the contract side:
    /// tightly packed big-endian fields, roots at 32 bytes and the
    /// sequencer address at 20. The sequencer address is committed only
    /// through the batch data hash.
    pub fn preprocess(&mut self) {
        let mut packed = self.batch_l2_data.clone();
        packed.extend(to_be_fixed(&self.global_exit_root, 32));
        packed.extend(to_be_fixed(&self.sequencer_addr, 20));
        self.batch_hash_data = keccak_scalar(&packed);

        let mut packed = Vec::with_capacity(32 * 5 + 4 + 8 + 8);
        packed.extend(to_be_fixed(&self.old_state_root, 32));
        packed.extend(to_be_fixed(&self.old_local_exit_root, 32));
        packed.extend(to_be_fixed(&self.new_state_root, 32));
        packed.extend(to_be_fixed(&self.new_local_exit_root, 32));
        packed.extend(to_be_fixed(&self.batch_hash_data, 32));
        packed.extend((self.num_batch as u32).to_be_bytes());
        packed.extend(self.timestamp.to_be_bytes());
        packed.extend(self.chain_id.to_be_bytes());
        self.global_hash = keccak_scalar(&packed);
    }

    /// Bytecode lookup by digest scalar, as `getBytecode` sees it.
    pub fn bytecode_by_digest(&self, digest: &BigUint) -> Option<&Vec<u8>> {
        let key = format!("{digest:064x}");
        self.contracts_bytecode.get(&key)
    }
}

/// Keccak-256 digest as a 256-bit scalar.
pub(crate) fn keccak_scalar(data: &[u8]) -> BigUint {
    let mut keccak = Keccak::v256();
    keccak.update(data);
    let mut digest = [0u8; 32];
    keccak.finalize(&mut digest);
    BigUint::from_bytes_be(&digest)
}

fn to_be_fixed(v: &BigUint, len: usize) -> Vec<u8> {
    let bytes = v.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    if bytes.len() > len {
        out.extend(&bytes[bytes.len() - len..]);
    } else {
        out.extend(&bytes);
    }
    out
}

fn parse_hex_scalar(s: &str) -> Result<BigUint> {
    let t = s.trim_start_matches("0x");
    if t.is_empty() {
        return Ok(BigUint::default());
    }
    BigUint::parse_bytes(t.as_bytes(), 16)
        .ok_or_else(|| input_err(&format!("bad hex scalar {s}")))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let t = s.trim_start_matches("0x");
    hex::decode(t).map_err(|e| input_err(&format!("bad hex bytes: {e}")))
}

fn normalize_digest(s: &str) -> String {
    let t = s.trim_start_matches("0x").to_lowercase();
    format!("{t:0>64}")
}

fn input_err(msg: &str) -> ExecutorError {
    ExecutorError::InputDecode(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_preprocesses() {
        let json = r#"{
            "oldStateRoot": "0x01",
            "newStateRoot": "0x02",
            "oldLocalExitRoot": "0x00",
            "newLocalExitRoot": "0x00",
            "globalExitRoot": "0x00",
            "sequencerAddr": "0x617b3a3528F9cDd6630fd3301B9c8911F7Bf063D",
            "chainID": 1000,
            "numBatch": 1,
            "timestamp": 1944498031,
            "batchL2Data": "0xdead",
            "from": "0x01"
        }"#;
        let input = BatchInput::from_json_str(json).unwrap();
        assert_eq!(input.batch_l2_data, vec![0xde, 0xad]);
        assert_ne!(input.batch_hash_data, BigUint::default());
        assert_ne!(input.global_hash, BigUint::default());
        assert_eq!(input.from, Some(BigUint::from(1u8)));
    }

    #[test]
    fn digest_lookup_normalizes_keys() {
        let mut input = BatchInput::default();
        input
            .contracts_bytecode
            .insert(normalize_digest("0xAB"), vec![1, 2]);
        assert_eq!(
            input.bytecode_by_digest(&BigUint::from(0xabu8)),
            Some(&vec![1, 2])
        );
    }

    #[test]
    fn global_hash_packs_the_commitment_fields() {
        // The sequencer address reaches the global hash only through the
        // batch data hash; the outer preimage carries the five roots and
        // the three scalars, big-endian.
        let mut input = BatchInput {
            old_state_root: BigUint::from(1u8),
            new_state_root: BigUint::from(2u8),
            old_local_exit_root: BigUint::from(3u8),
            new_local_exit_root: BigUint::from(4u8),
            global_exit_root: BigUint::from(5u8),
            sequencer_addr: BigUint::from(0x617b3a35u32),
            chain_id: 1000,
            num_batch: 1,
            timestamp: 1944498031,
            batch_l2_data: vec![0xde, 0xad],
            ..Default::default()
        };
        input.preprocess();

        let mut inner = vec![0xde, 0xad];
        inner.extend(to_be_fixed(&BigUint::from(5u8), 32));
        inner.extend(to_be_fixed(&BigUint::from(0x617b3a35u32), 20));
        assert_eq!(input.batch_hash_data, keccak_scalar(&inner));

        let mut outer = Vec::new();
        outer.extend(to_be_fixed(&BigUint::from(1u8), 32));
        outer.extend(to_be_fixed(&BigUint::from(3u8), 32));
        outer.extend(to_be_fixed(&BigUint::from(2u8), 32));
        outer.extend(to_be_fixed(&BigUint::from(4u8), 32));
        outer.extend(to_be_fixed(&input.batch_hash_data, 32));
        outer.extend(1u32.to_be_bytes());
        outer.extend(1944498031u64.to_be_bytes());
        outer.extend(1000u64.to_be_bytes());
        assert_eq!(outer.len(), 32 * 5 + 4 + 8 + 8);
        assert_eq!(input.global_hash, keccak_scalar(&outer));
    }

    #[test]
    fn preprocess_is_deterministic() {
        let mut a = BatchInput {
            chain_id: 5,
            ..Default::default()
        };
        let mut b = a.clone();
        a.preprocess();
        b.preprocess();
        assert_eq!(a.global_hash, b.global_hash);
    }
}
