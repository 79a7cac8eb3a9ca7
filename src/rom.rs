//! ROM program decoding.
//!
//! The ROM ships as JSON: an ordered `program` array of instruction lines
//! plus a `labels` map of named absolute indices. Lines are sparse records
//! of optional selector fields; they are decoded once into the typed
//! [`Instruction`] so the step loop never re-inspects field presence.

use num_bigint::BigInt;
use num_traits::Zero;
use p3_field::{AbstractField, PrimeField64};
use serde_json::Value;
use std::str::FromStr;

use crate::binary::BinOpcode;
use crate::command::Cmd;
use crate::errors::{ExecutorError, Result};
use crate::field::{bigint_to_fea, fe, fe_i64, Fe, Fea};

/// How a requested free input is resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum FreeInTag {
    /// Empty tag: dispatch on the line's operation flags.
    Hardware,
    /// Expression tag: run the evaluator.
    Expr(Cmd),
}

/// One decoded ROM line.
#[derive(Debug, Clone, Default)]
pub struct Instruction {
    pub file_name: String,
    pub line: u64,

    // Operand selector weights; zero means the selector is unset.
    pub in_a: Fe,
    pub in_b: Fe,
    pub in_c: Fe,
    pub in_d: Fe,
    pub in_e: Fe,
    pub in_sr: Fe,
    pub in_ctx: Fe,
    pub in_sp: Fe,
    pub in_pc: Fe,
    pub in_gas: Fe,
    pub in_maxmem: Fe,
    pub in_step: Fe,
    pub in_rr: Fe,
    pub in_hashpos: Fe,
    pub in_cnt_arith: Fe,
    pub in_cnt_binary: Fe,
    pub in_cnt_mem_align: Fe,
    pub in_cnt_keccak_f: Fe,
    pub in_cnt_poseidon_g: Fe,
    pub in_cnt_padding_pg: Fe,
    pub in_rotl_c: Fe,
    pub in_free: Fe,

    /// Decoded constant contribution (short or long form).
    pub constant: Option<Fea>,

    pub m_op: bool,
    pub m_wr: bool,
    pub s_rd: bool,
    pub s_wr: bool,
    pub hash_k: bool,
    pub hash_k_len: bool,
    pub hash_k_digest: bool,
    pub hash_p: bool,
    pub hash_p_len: bool,
    pub hash_p_digest: bool,
    pub arith: bool,
    pub arith_eq: [bool; 4],
    pub bin: bool,
    pub bin_opcode: BinOpcode,
    pub mem_align: bool,
    pub mem_align_wr: bool,
    pub mem_align_wr8: bool,
    pub assert: bool,

    pub ind: bool,
    pub ind_rr: bool,
    pub offset: i64,
    pub use_ctx: bool,
    pub is_code: bool,
    pub is_stack: bool,
    pub is_mem: bool,
    pub inc_stack: i64,
    pub inc_code: i64,

    pub jmp: bool,
    pub jmpn: bool,
    pub jmpc: bool,

    pub set_a: bool,
    pub set_b: bool,
    pub set_c: bool,
    pub set_d: bool,
    pub set_e: bool,
    pub set_sr: bool,
    pub set_ctx: bool,
    pub set_sp: bool,
    pub set_pc: bool,
    pub set_rr: bool,
    pub set_gas: bool,
    pub set_maxmem: bool,
    pub set_hashpos: bool,

    pub free_in_tag: Option<FreeInTag>,
    pub cmd_before: Vec<Cmd>,
    pub cmd_after: Vec<Cmd>,
}

impl Instruction {
    /// True when the line needs a resolved effective address.
    pub fn uses_addr(&self) -> bool {
        self.m_op
            || self.jmp
            || self.jmpn
            || self.jmpc
            || self.hash_p
            || self.hash_p_len
            || self.hash_p_digest
            || self.hash_k
            || self.hash_k_len
            || self.hash_k_digest
    }

    fn decode(v: &Value) -> Result<Instruction> {
        let mut l = Instruction {
            file_name: v
                .get("fileName")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            line: v.get("line").and_then(Value::as_u64).unwrap_or(0),
            ..Default::default()
        };

        l.in_a = weight(v, "inA")?;
        l.in_b = weight(v, "inB")?;
        l.in_c = weight(v, "inC")?;
        l.in_d = weight(v, "inD")?;
        l.in_e = weight(v, "inE")?;
        l.in_sr = weight(v, "inSR")?;
        l.in_ctx = weight(v, "inCTX")?;
        l.in_sp = weight(v, "inSP")?;
        l.in_pc = weight(v, "inPC")?;
        l.in_gas = weight(v, "inGAS")?;
        l.in_maxmem = weight(v, "inMAXMEM")?;
        l.in_step = weight(v, "inSTEP")?;
        l.in_rr = weight(v, "inRR")?;
        l.in_hashpos = weight(v, "inHASHPOS")?;
        l.in_cnt_arith = weight(v, "inCntArith")?;
        l.in_cnt_binary = weight(v, "inCntBinary")?;
        l.in_cnt_mem_align = weight(v, "inCntMemAlign")?;
        l.in_cnt_keccak_f = weight(v, "inCntKeccakF")?;
        l.in_cnt_poseidon_g = weight(v, "inCntPoseidonG")?;
        l.in_cnt_padding_pg = weight(v, "inCntPaddingPG")?;
        l.in_rotl_c = weight(v, "inROTL_C")?;
        l.in_free = weight(v, "inFREE")?;

        let const_long = bigint(v, "CONSTL")?;
        let const_short = bigint(v, "CONST")?;
        l.constant = match (const_long, const_short) {
            (Some(_), Some(_)) => {
                return Err(decode_err("CONST and CONSTL are mutually exclusive"))
            }
            // Long form decomposes a 256-bit scalar over all 8 limbs.
            (Some(c), None) if !c.is_zero() => Some(bigint_to_fea(&c)),
            // Short form is a single field element in limb 0.
            (None, Some(c)) if !c.is_zero() => {
                let mut fea = [Fe::zero(); 8];
                fea[0] = fe_bigint(&c);
                Some(fea)
            }
            _ => None,
        };

        l.m_op = flag(v, "mOp");
        l.m_wr = flag(v, "mWR");
        l.s_rd = flag(v, "sRD");
        l.s_wr = flag(v, "sWR");
        l.hash_k = flag(v, "hashK");
        l.hash_k_len = flag(v, "hashKLen");
        l.hash_k_digest = flag(v, "hashKDigest");
        l.hash_p = flag(v, "hashP");
        l.hash_p_len = flag(v, "hashPLen");
        l.hash_p_digest = flag(v, "hashPDigest");
        l.arith = flag(v, "arith");
        l.arith_eq = [
            flag(v, "arithEq0"),
            flag(v, "arithEq1"),
            flag(v, "arithEq2"),
            flag(v, "arithEq3"),
        ];
        l.bin = flag(v, "bin");
        if l.bin {
            let raw = int(v, "binOpcode")?.unwrap_or(0);
            l.bin_opcode = BinOpcode::decode(raw as u8)?;
        }
        l.mem_align = flag(v, "memAlign");
        l.mem_align_wr = flag(v, "memAlignWR");
        l.mem_align_wr8 = flag(v, "memAlignWR8");
        l.assert = flag(v, "assert");

        l.ind = flag(v, "ind");
        l.ind_rr = flag(v, "indRR");
        l.offset = int(v, "offset")?.unwrap_or(0);
        l.use_ctx = flag(v, "useCTX");
        l.is_code = flag(v, "isCode");
        l.is_stack = flag(v, "isStack");
        l.is_mem = flag(v, "isMem");
        l.inc_stack = int(v, "incStack")?.unwrap_or(0);
        l.inc_code = int(v, "incCode")?.unwrap_or(0);

        l.jmp = flag(v, "JMP");
        l.jmpn = flag(v, "JMPN");
        l.jmpc = flag(v, "JMPC");

        l.set_a = flag(v, "setA");
        l.set_b = flag(v, "setB");
        l.set_c = flag(v, "setC");
        l.set_d = flag(v, "setD");
        l.set_e = flag(v, "setE");
        l.set_sr = flag(v, "setSR");
        l.set_ctx = flag(v, "setCTX");
        l.set_sp = flag(v, "setSP");
        l.set_pc = flag(v, "setPC");
        l.set_rr = flag(v, "setRR");
        l.set_gas = flag(v, "setGAS");
        l.set_maxmem = flag(v, "setMAXMEM");
        l.set_hashpos = flag(v, "setHASHPOS");

        if let Some(tag) = v.get("freeInTag") {
            let op = tag.get("op").and_then(Value::as_str).unwrap_or("");
            l.free_in_tag = Some(if op.is_empty() {
                FreeInTag::Hardware
            } else {
                FreeInTag::Expr(Cmd::decode(tag)?)
            });
        }
        l.cmd_before = cmd_list(v, "cmdBefore")?;
        l.cmd_after = cmd_list(v, "cmdAfter")?;

        Ok(l)
    }
}

/// Named ROM labels the executor treats specially.
#[derive(Debug, Clone, Default)]
pub struct RomLabels {
    pub finalize_execution: Option<u64>,
    pub check_and_save_from: Option<u64>,
    pub assert_new_state_root: Option<u64>,
    pub assert_new_local_exit_root: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Rom {
    pub program: Vec<Instruction>,
    pub labels: RomLabels,
}

impl Rom {
    pub fn from_json_str(s: &str) -> Result<Rom> {
        let v: Value =
            serde_json::from_str(s).map_err(|e| decode_err(&format!("invalid JSON: {e}")))?;
        Rom::decode(&v)
    }

    pub fn decode(v: &Value) -> Result<Rom> {
        let program = v
            .get("program")
            .and_then(Value::as_array)
            .ok_or_else(|| decode_err("missing program array"))?
            .iter()
            .map(Instruction::decode)
            .collect::<Result<Vec<_>>>()?;

        let label = |name: &str| {
            v.get("labels")
                .and_then(|labels| labels.get(name))
                .and_then(Value::as_u64)
        };
        let labels = RomLabels {
            finalize_execution: label("finalizeExecution"),
            check_and_save_from: label("checkAndSaveFrom"),
            assert_new_state_root: label("assertNewStateRoot"),
            assert_new_local_exit_root: label("assertNewLocalExitRoot"),
        };

        Ok(Rom { program, labels })
    }
}

fn flag(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s != "0" && !s.is_empty(),
        _ => false,
    }
}

fn int(v: &Value, key: &str) -> Result<Option<i64>> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| decode_err(&format!("{key} is not an integer"))),
        Some(Value::String(s)) => i64::from_str(s)
            .map(Some)
            .map_err(|e| decode_err(&format!("bad {key} value {s}: {e}"))),
        Some(_) => Err(decode_err(&format!("{key} has an unsupported encoding"))),
    }
}

fn bigint(v: &Value, key: &str) -> Result<Option<BigInt>> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(BigInt::from(n)))
            .ok_or_else(|| decode_err(&format!("{key} is not an integer"))),
        Some(Value::String(s)) => BigInt::from_str(s)
            .map(Some)
            .map_err(|e| decode_err(&format!("bad {key} value {s}: {e}"))),
        Some(_) => Err(decode_err(&format!("{key} has an unsupported encoding"))),
    }
}

fn weight(v: &Value, key: &str) -> Result<Fe> {
    Ok(int(v, key)?.map(fe_i64).unwrap_or(Fe::zero()))
}

/// Reduces an arbitrary-precision signed integer into the field.
fn fe_bigint(c: &BigInt) -> Fe {
    let p = BigInt::from(Fe::ORDER_U64);
    let r = ((c % &p) + &p) % &p;
    let (_, digits) = r.to_u64_digits();
    fe(digits.first().copied().unwrap_or(0))
}

fn cmd_list(v: &Value, key: &str) -> Result<Vec<Cmd>> {
    match v.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(Cmd::decode).collect(),
        Some(_) => Err(decode_err(&format!("{key} is not an array"))),
    }
}

fn decode_err(msg: &str) -> ExecutorError {
    ExecutorError::RomDecode(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_selectors_and_constants() {
        let v = json!({
            "program": [
                { "inA": "1", "inB": -1, "CONST": "5", "setC": 1,
                  "fileName": "main.zkasm", "line": 10 },
                { "CONSTL": "115792089237316195423570985008687907853269984665640564039457584007913129639935",
                  "JMP": 1, "offset": 0 }
            ],
            "labels": { "finalizeExecution": 1 }
        });
        let rom = Rom::decode(&v).unwrap();
        assert_eq!(rom.program.len(), 2);
        let l0 = &rom.program[0];
        assert_eq!(l0.in_a, fe_i64(1));
        assert_eq!(l0.in_b, fe_i64(-1));
        assert!(l0.set_c);
        assert_eq!(l0.constant.unwrap()[0], fe_i64(5));
        let l1 = &rom.program[1];
        assert!(l1.jmp);
        let c = l1.constant.unwrap();
        assert!(c.iter().all(|limb| *limb == fe_i64(0xFFFF_FFFF)));
        assert_eq!(rom.labels.finalize_execution, Some(1));
    }

    #[test]
    fn const_and_constl_conflict() {
        let v = json!({ "program": [ { "CONST": "1", "CONSTL": "2" } ] });
        assert!(Rom::decode(&v).is_err());
    }

    #[test]
    fn hardware_free_input_tag() {
        let v = json!({ "program": [ { "inFREE": 1, "freeInTag": { "op": "" }, "mOp": 1 } ] });
        let rom = Rom::decode(&v).unwrap();
        assert_eq!(rom.program[0].free_in_tag, Some(FreeInTag::Hardware));
    }
}
