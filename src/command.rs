//! Closed AST for ROM-embedded expressions.
//!
//! ROM lines carry small expression trees (free-input tags and the
//! `cmdBefore`/`cmdAfter` hook lists) as JSON records tagged by an `op`
//! string. They are decoded once at load time into this sum type; the
//! evaluator then dispatches on enum variants instead of re-matching
//! strings every step. Function calls resolve to the finite
//! [`CmdFunction`] set, so an unknown name is a load-time error.

use std::str::FromStr;

use num_bigint::BigInt;
use serde_json::Value;
use strum_macros::{EnumString, IntoStaticStr};

use crate::errors::{ExecutorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
pub enum Reg {
    A,
    B,
    C,
    D,
    E,
    SR,
    CTX,
    SP,
    PC,
    MAXMEM,
    GAS,
    #[strum(serialize = "zkPC")]
    ZkPc,
    RR,
    STEP,
    HASHPOS,
    #[strum(serialize = "CNT_ARITH")]
    CntArith,
    #[strum(serialize = "CNT_BINARY")]
    CntBinary,
    #[strum(serialize = "CNT_KECCAK_F")]
    CntKeccakF,
    #[strum(serialize = "CNT_MEM_ALIGN")]
    CntMemAlign,
    #[strum(serialize = "CNT_PADDING_PG")]
    CntPaddingPG,
    #[strum(serialize = "CNT_POSEIDON_G")]
    CntPoseidonG,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Neg,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogicalOp {
    Or,
    And,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BitOp {
    Bitand,
    Bitor,
    Bitxor,
    Bitnot,
    Shl,
    Shr,
}

/// Every function name a ROM expression may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
pub enum CmdFunction {
    #[strum(serialize = "getGlobalHash")]
    GetGlobalHash,
    #[strum(serialize = "getGlobalExitRoot")]
    GetGlobalExitRoot,
    #[strum(serialize = "getOldStateRoot")]
    GetOldStateRoot,
    #[strum(serialize = "getNewStateRoot")]
    GetNewStateRoot,
    #[strum(serialize = "getOldLocalExitRoot")]
    GetOldLocalExitRoot,
    #[strum(serialize = "getNewLocalExitRoot")]
    GetNewLocalExitRoot,
    #[strum(serialize = "getSequencerAddr")]
    GetSequencerAddr,
    #[strum(serialize = "getBatchHashData")]
    GetBatchHashData,
    #[strum(serialize = "getNumBatch")]
    GetNumBatch,
    #[strum(serialize = "getTimestamp")]
    GetTimestamp,
    #[strum(serialize = "getChainId")]
    GetChainId,
    #[strum(serialize = "getTxs")]
    GetTxs,
    #[strum(serialize = "getTxsLen")]
    GetTxsLen,
    #[strum(serialize = "getBytecode")]
    GetBytecode,
    #[strum(serialize = "eventLog")]
    EventLog,
    #[strum(serialize = "storeLog")]
    StoreLog,
    #[strum(serialize = "cond")]
    Cond,
    #[strum(serialize = "beforeLast")]
    BeforeLast,
    #[strum(serialize = "exp")]
    Exp,
    #[strum(serialize = "bitwise_and")]
    BitwiseAnd,
    #[strum(serialize = "bitwise_or")]
    BitwiseOr,
    #[strum(serialize = "bitwise_xor")]
    BitwiseXor,
    #[strum(serialize = "bitwise_not")]
    BitwiseNot,
    #[strum(serialize = "comp_lt")]
    CompLt,
    #[strum(serialize = "comp_gt")]
    CompGt,
    #[strum(serialize = "comp_eq")]
    CompEq,
    #[strum(serialize = "loadScalar")]
    LoadScalar,
    #[strum(serialize = "inverseFpEc")]
    InverseFpEc,
    #[strum(serialize = "inverseFnEc")]
    InverseFnEc,
    #[strum(serialize = "sqrtFpEc")]
    SqrtFpEc,
    #[strum(serialize = "xAddPointEc")]
    XAddPointEc,
    #[strum(serialize = "yAddPointEc")]
    YAddPointEc,
    #[strum(serialize = "xDblPointEc")]
    XDblPointEc,
    #[strum(serialize = "yDblPointEc")]
    YDblPointEc,
    #[strum(serialize = "checkpoint")]
    Checkpoint,
    #[strum(serialize = "commit")]
    Commit,
    #[strum(serialize = "revert")]
    Revert,
    #[strum(serialize = "clearWarmedStorage")]
    ClearWarmedStorage,
    #[strum(serialize = "isWarmedAddress")]
    IsWarmedAddress,
    #[strum(serialize = "isWarmedStorage")]
    IsWarmedStorage,
    #[strum(serialize = "saveContractBytecode")]
    SaveContractBytecode,
    #[strum(serialize = "memAlignWR_W0")]
    MemAlignWrW0,
    #[strum(serialize = "memAlignWR_W1")]
    MemAlignWrW1,
    #[strum(serialize = "memAlignWR8_W0")]
    MemAlignWr8W0,
    #[strum(serialize = "dump")]
    Dump,
    #[strum(serialize = "dumpRegs")]
    DumpRegs,
    #[strum(serialize = "dumphex")]
    DumpHex,
    #[strum(serialize = "log")]
    Log,
    #[strum(serialize = "break")]
    Break,
}

impl CmdFunction {
    pub fn name(&self) -> &'static str {
        (*self).into()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    Number(BigInt),
    DeclareVar(String),
    GetVar(String),
    SetVar { left: Box<Cmd>, value: Box<Cmd> },
    GetReg(Reg),
    Arith { op: ArithOp, values: Vec<Cmd> },
    Logical { op: LogicalOp, values: Vec<Cmd> },
    Bit { op: BitOp, values: Vec<Cmd> },
    If { values: Vec<Cmd> },
    GetMemValue { offset: u64 },
    FunctionCall { func: CmdFunction, params: Vec<Cmd> },
}

impl Cmd {
    /// Decodes one tagged JSON expression node.
    pub fn decode(v: &Value) -> Result<Cmd> {
        let op = str_field(v, "op")?;
        match op {
            "number" => {
                let num = v.get("num").ok_or_else(|| decode_err("number without num"))?;
                let parsed = match num {
                    Value::String(s) => BigInt::from_str(s)
                        .map_err(|e| decode_err(&format!("bad number {s}: {e}"))),
                    Value::Number(n) => n
                        .as_i64()
                        .map(BigInt::from)
                        .ok_or_else(|| decode_err("non-integer number")),
                    _ => Err(decode_err("unsupported num encoding")),
                }?;
                Ok(Cmd::Number(parsed))
            }
            "declareVar" => Ok(Cmd::DeclareVar(str_field(v, "varName")?.to_string())),
            "getVar" => Ok(Cmd::GetVar(str_field(v, "varName")?.to_string())),
            "setVar" => {
                let values = decode_list(v, "values")?;
                let [left, value]: [Cmd; 2] = values
                    .try_into()
                    .map_err(|_| decode_err("setVar expects two values"))?;
                Ok(Cmd::SetVar {
                    left: Box::new(left),
                    value: Box::new(value),
                })
            }
            "getReg" => {
                let name = str_field(v, "regName")?;
                let reg = Reg::from_str(name)
                    .map_err(|_| decode_err(&format!("invalid register {name}")))?;
                Ok(Cmd::GetReg(reg))
            }
            "functionCall" => {
                let name = str_field(v, "funcName")?;
                let func = CmdFunction::from_str(name)
                    .map_err(|_| decode_err(&format!("function not defined {name}")))?;
                Ok(Cmd::FunctionCall {
                    func,
                    params: decode_list(v, "params")?,
                })
            }
            "if" => {
                let values = decode_list(v, "values")?;
                if values.len() != 3 {
                    return Err(decode_err("if expects three values"));
                }
                Ok(Cmd::If { values })
            }
            "getMemValue" => {
                let offset = v
                    .get("offset")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| decode_err("getMemValue without offset"))?;
                Ok(Cmd::GetMemValue { offset })
            }
            name => {
                if let Ok(op) = ArithOp::from_str(name) {
                    let arity = if op == ArithOp::Neg { 1 } else { 2 };
                    return Ok(Cmd::Arith {
                        op,
                        values: operands(v, name, arity)?,
                    });
                }
                if let Ok(op) = LogicalOp::from_str(name) {
                    let arity = if op == LogicalOp::Not { 1 } else { 2 };
                    return Ok(Cmd::Logical {
                        op,
                        values: operands(v, name, arity)?,
                    });
                }
                if let Ok(op) = BitOp::from_str(name) {
                    let arity = if op == BitOp::Bitnot { 1 } else { 2 };
                    return Ok(Cmd::Bit {
                        op,
                        values: operands(v, name, arity)?,
                    });
                }
                Err(decode_err(&format!("invalid operation {name}")))
            }
        }
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> Result<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| decode_err(&format!("missing string field {key}")))
}

/// Operand list for an arithmetic, logical or bitwise node; the arity is
/// checked here so the evaluator can index unconditionally.
fn operands(v: &Value, op: &str, arity: usize) -> Result<Vec<Cmd>> {
    let values = decode_list(v, "values")?;
    if values.len() != arity {
        return Err(decode_err(&format!(
            "{op} expects {arity} values, found {}",
            values.len()
        )));
    }
    Ok(values)
}

fn decode_list(v: &Value, key: &str) -> Result<Vec<Cmd>> {
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
    fn decodes_nested_expression() {
        let v = json!({
            "op": "add",
            "values": [
                { "op": "getReg", "regName": "A" },
                { "op": "number", "num": "42" }
            ]
        });
        let cmd = Cmd::decode(&v).unwrap();
        match cmd {
            Cmd::Arith { op: ArithOp::Add, values } => {
                assert_eq!(values[0], Cmd::GetReg(Reg::A));
                assert_eq!(values[1], Cmd::Number(BigInt::from(42)));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_function_call() {
        let v = json!({ "op": "functionCall", "funcName": "getTxsLen", "params": [] });
        assert_eq!(
            Cmd::decode(&v).unwrap(),
            Cmd::FunctionCall { func: CmdFunction::GetTxsLen, params: vec![] }
        );
    }

    #[test]
    fn unknown_function_is_a_decode_error() {
        let v = json!({ "op": "functionCall", "funcName": "nonsense", "params": [] });
        assert!(Cmd::decode(&v).is_err());
    }

    #[test]
    fn unknown_operation_is_a_decode_error() {
        let v = json!({ "op": "frobnicate" });
        assert!(Cmd::decode(&v).is_err());
    }

    #[test]
    fn wrong_operand_count_is_a_decode_error() {
        assert!(Cmd::decode(&json!({ "op": "add", "values": [] })).is_err());
        assert!(Cmd::decode(&json!({ "op": "shl" })).is_err());
        assert!(Cmd::decode(&json!({
            "op": "lt",
            "values": [ { "op": "number", "num": "1" } ]
        }))
        .is_err());
    }

    #[test]
    fn unary_operations_take_one_operand() {
        let v = json!({ "op": "neg", "values": [ { "op": "number", "num": "3" } ] });
        assert!(matches!(
            Cmd::decode(&v).unwrap(),
            Cmd::Arith { op: ArithOp::Neg, .. }
        ));
        let v = json!({ "op": "not", "values": [ { "op": "number", "num": "0" } ] });
        assert!(matches!(
            Cmd::decode(&v).unwrap(),
            Cmd::Logical { op: LogicalOp::Not, .. }
        ));
    }
}
