//! ROM expression evaluator.
//!
//! Expressions run in two places: the `cmdBefore`/`cmdAfter` hooks around a
//! step and the free-input tag. They see the registers read-only, a
//! variable scope on the context, and a fixed set of helper functions.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};
use tracing::debug;

use crate::arith::{ec_add_point, PrimeField};
use crate::command::{ArithOp, BitOp, Cmd, CmdFunction, LogicalOp, Reg};
use crate::errors::{ExecutorError, Result};
use crate::evidence::OutLog;
use crate::executor::Executor;
use crate::field::{
    bigint_to_fea, fe, fe_i64, fea_to_scalar, scalar_to_bigint, scalar_to_fea, Fea, FEA_ZERO,
    MASK_256,
};

/// An expression value: either an arbitrary-precision scalar or an already
/// decomposed 8-limb vector. Conversions wrap through 256 bits.
#[derive(Debug, Clone, PartialEq)]
pub enum CmdValue {
    Scalar(BigInt),
    Fea(Fea),
}

impl CmdValue {
    pub fn zero() -> CmdValue {
        CmdValue::Scalar(BigInt::zero())
    }

    pub fn to_scalar(&self) -> BigInt {
        match self {
            CmdValue::Scalar(s) => s.clone(),
            CmdValue::Fea(f) => scalar_to_bigint(&fea_to_scalar(f)),
        }
    }

    pub fn to_fea(&self) -> Fea {
        match self {
            CmdValue::Scalar(s) => bigint_to_fea(s),
            CmdValue::Fea(f) => *f,
        }
    }
}

impl Default for CmdValue {
    fn default() -> Self {
        CmdValue::zero()
    }
}

/// Hook for an external transaction tracer. `eventLog` and `storeLog`
/// forward here before returning.
pub trait Tracer {
    fn handle_event(&mut self, step: usize, func: CmdFunction, params: &[Cmd]);
}

/// Tracer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn handle_event(&mut self, _step: usize, _func: CmdFunction, _params: &[Cmd]) {}
}

impl<'a> Executor<'a> {
    pub(crate) fn eval_command(&mut self, cmd: &Cmd) -> Result<CmdValue> {
        match cmd {
            Cmd::Number(n) => Ok(CmdValue::Scalar(n.clone())),
            Cmd::DeclareVar(name) => self.declare_var(name),
            Cmd::GetVar(name) => self
                .ctx
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExecutorError::VariableNotDefined(name.clone())),
            Cmd::SetVar { left, value } => {
                let value = self.eval_command(value)?;
                let name = match left.as_ref() {
                    Cmd::DeclareVar(name) => {
                        self.declare_var(name)?;
                        name
                    }
                    Cmd::GetVar(name) if self.ctx.vars.contains_key(name) => name,
                    Cmd::GetVar(name) => {
                        return Err(ExecutorError::VariableNotDefined(name.clone()))
                    }
                    _ => return Err(ExecutorError::InvalidLeftExpression),
                };
                self.ctx.vars.insert(name.clone(), value.clone());
                Ok(value)
            }
            Cmd::GetReg(reg) => Ok(self.read_reg(*reg)),
            Cmd::Arith { op, values } => self.eval_arith(*op, values),
            Cmd::Logical { op, values } => self.eval_logical(*op, values),
            Cmd::Bit { op, values } => self.eval_bit(*op, values),
            Cmd::If { values } => {
                let cond = self.eval_command(&values[0])?.to_scalar();
                let branch = if !cond.is_zero() { 1 } else { 2 };
                self.eval_command(&values[branch])
            }
            Cmd::GetMemValue { offset } => {
                let word = self.ctx.mem.get(offset).copied().unwrap_or(*FEA_ZERO);
                Ok(CmdValue::Scalar(scalar_to_bigint(&fea_to_scalar(&word))))
            }
            Cmd::FunctionCall { func, params } => self.eval_function(*func, params),
        }
    }

    fn declare_var(&mut self, name: &str) -> Result<CmdValue> {
        // `_` is the throwaway name and may be redeclared freely.
        if name != "_" && self.ctx.vars.contains_key(name) {
            return Err(ExecutorError::VariableAlreadyDeclared(name.to_string()));
        }
        self.ctx.vars.insert(name.to_string(), CmdValue::zero());
        Ok(CmdValue::zero())
    }

    fn read_reg(&self, reg: Reg) -> CmdValue {
        let regs = &self.regs;
        match reg {
            Reg::A => CmdValue::Fea(regs.a),
            Reg::B => CmdValue::Fea(regs.b),
            Reg::C => CmdValue::Fea(regs.c),
            Reg::D => CmdValue::Fea(regs.d),
            Reg::E => CmdValue::Fea(regs.e),
            Reg::SR => CmdValue::Fea(regs.sr),
            Reg::CTX => CmdValue::Scalar(BigInt::from(regs.ctx)),
            Reg::SP => CmdValue::Scalar(BigInt::from(regs.sp)),
            Reg::PC => CmdValue::Scalar(BigInt::from(regs.pc)),
            Reg::MAXMEM => CmdValue::Scalar(BigInt::from(regs.max_mem)),
            Reg::GAS => CmdValue::Scalar(BigInt::from(regs.gas)),
            Reg::ZkPc => CmdValue::Scalar(BigInt::from(regs.zk_pc)),
            Reg::RR => CmdValue::Scalar(BigInt::from(regs.rr)),
            Reg::STEP => CmdValue::Scalar(BigInt::from(self.ctx.step)),
            Reg::HASHPOS => CmdValue::Scalar(BigInt::from(regs.hash_pos)),
            Reg::CntArith => CmdValue::Scalar(BigInt::from(regs.counters.arith)),
            Reg::CntBinary => CmdValue::Scalar(BigInt::from(regs.counters.binary)),
            Reg::CntKeccakF => CmdValue::Scalar(BigInt::from(regs.counters.keccak_f)),
            Reg::CntMemAlign => CmdValue::Scalar(BigInt::from(regs.counters.mem_align)),
            Reg::CntPaddingPG => CmdValue::Scalar(BigInt::from(regs.counters.padding_pg)),
            Reg::CntPoseidonG => CmdValue::Scalar(BigInt::from(regs.counters.poseidon_g)),
        }
    }

    fn eval_arith(&mut self, op: ArithOp, values: &[Cmd]) -> Result<CmdValue> {
        let a = self.eval_command(&values[0])?.to_scalar();
        if op == ArithOp::Neg {
            return Ok(CmdValue::Scalar(-a));
        }
        let b = self.eval_command(&values[1])?.to_scalar();
        let r = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => {
                if b.is_zero() {
                    return Err(ExecutorError::DivisionByZero);
                }
                a / b
            }
            ArithOp::Mod => {
                if b.is_zero() {
                    return Err(ExecutorError::DivisionByZero);
                }
                a % b
            }
            ArithOp::Neg => unreachable!(),
        };
        Ok(CmdValue::Scalar(r))
    }

    fn eval_logical(&mut self, op: LogicalOp, values: &[Cmd]) -> Result<CmdValue> {
        let a = self.eval_command(&values[0])?.to_scalar();
        if op == LogicalOp::Not {
            return Ok(CmdValue::Scalar(bool_bigint(a.is_zero())));
        }
        let b = self.eval_command(&values[1])?.to_scalar();
        let r = match op {
            LogicalOp::Or => !a.is_zero() || !b.is_zero(),
            LogicalOp::And => !a.is_zero() && !b.is_zero(),
            LogicalOp::Gt => a > b,
            LogicalOp::Ge => a >= b,
            LogicalOp::Lt => a < b,
            // Kept operand order of the production ROM toolchain, which
            // emits `le` with swapped arguments.
            LogicalOp::Le => a > b,
            LogicalOp::Eq => a == b,
            LogicalOp::Ne => a != b,
            LogicalOp::Not => unreachable!(),
        };
        Ok(CmdValue::Scalar(bool_bigint(r)))
    }

    fn eval_bit(&mut self, op: BitOp, values: &[Cmd]) -> Result<CmdValue> {
        let a = self.eval_command(&values[0])?.to_scalar();
        if op == BitOp::Bitnot {
            let mask = scalar_to_bigint(&MASK_256);
            return Ok(CmdValue::Scalar(a ^ mask));
        }
        let b = self.eval_command(&values[1])?.to_scalar();
        let r = match op {
            BitOp::Bitand => a & b,
            BitOp::Bitor => a | b,
            BitOp::Bitxor => a ^ b,
            BitOp::Shl => a << shift_amount(b)?,
            BitOp::Shr => a >> shift_amount(b)?,
            BitOp::Bitnot => unreachable!(),
        };
        Ok(CmdValue::Scalar(r))
    }

    fn eval_function(&mut self, func: CmdFunction, params: &[Cmd]) -> Result<CmdValue> {
        use CmdFunction::*;
        match func {
            GetGlobalHash => self.input_fea(func, params, |i| i.global_hash.clone()),
            GetGlobalExitRoot => self.input_fea(func, params, |i| i.global_exit_root.clone()),
            GetOldStateRoot => self.input_fea(func, params, |i| i.old_state_root.clone()),
            GetNewStateRoot => self.input_fea(func, params, |i| i.new_state_root.clone()),
            GetOldLocalExitRoot => {
                self.input_fea(func, params, |i| i.old_local_exit_root.clone())
            }
            GetNewLocalExitRoot => {
                self.input_fea(func, params, |i| i.new_local_exit_root.clone())
            }
            GetSequencerAddr => self.input_fea(func, params, |i| i.sequencer_addr.clone()),
            GetBatchHashData => self.input_fea(func, params, |i| i.batch_hash_data.clone()),
            GetNumBatch => self.input_fea(func, params, |i| BigUint::from(i.num_batch)),
            GetTimestamp => self.input_fea(func, params, |i| BigUint::from(i.timestamp)),
            GetChainId => self.input_fea(func, params, |i| BigUint::from(i.chain_id)),
            GetTxsLen => {
                check_params(func, params, 0)?;
                Ok(fea_value(&BigUint::from(self.input.batch_l2_data.len())))
            }
            GetTxs => {
                check_params(func, params, 2)?;
                let offset = self.eval_usize(&params[0], "transaction offset")?;
                let len = self.eval_usize(&params[1], "transaction length")?;
                let data = &self.input.batch_l2_data;
                let lo = offset.min(data.len());
                let hi = (offset + len).min(data.len());
                Ok(fea_value(&BigUint::from_bytes_be(&data[lo..hi])))
            }
            GetBytecode => {
                if params.len() != 2 && params.len() != 3 {
                    return Err(ExecutorError::InvalidParamCount(func.name()));
                }
                let digest = self.eval_biguint(&params[0])?;
                let offset = self.eval_usize(&params[1], "bytecode offset")?;
                let len = if params.len() == 3 {
                    self.eval_usize(&params[2], "bytecode length")?
                } else {
                    1
                };
                let key = format!("{digest:064x}");
                let Some(code) = self.ctx.contracts_bytecode.get(&key) else {
                    return Ok(fea_value(&BigUint::zero()));
                };
                let lo = offset.min(code.len());
                let hi = (offset + len).min(code.len());
                Ok(fea_value(&BigUint::from_bytes_be(&code[lo..hi])))
            }
            EventLog => {
                if params.is_empty() {
                    return Err(ExecutorError::InvalidParamCount(func.name()));
                }
                self.tracer.handle_event(self.ctx.step, func, params);
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            StoreLog => {
                check_params(func, params, 3)?;
                let index = self.eval_u64(&params[0], "log index")?;
                let is_topic = !self.eval_command(&params[1])?.to_scalar().is_zero();
                let data = self.eval_biguint(&params[2])?;
                let entry = self.evidence.logs.entry(index).or_insert_with(OutLog::default);
                if is_topic {
                    entry.topics.push(format!("{data:x}"));
                } else {
                    entry.data.push(format!("{data:x}"));
                }
                self.tracer.handle_event(self.ctx.step, func, params);
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            Cond => {
                check_params(func, params, 1)?;
                let v = self.eval_command(&params[0])?.to_scalar();
                let mut out = *FEA_ZERO;
                if !v.is_zero() {
                    out[0] = fe_i64(-1);
                }
                Ok(CmdValue::Fea(out))
            }
            BeforeLast => {
                check_params(func, params, 0)?;
                let mut out = *FEA_ZERO;
                if self.ctx.step < self.ctx.steps_n.saturating_sub(2) {
                    out[0] = fe_i64(-1);
                }
                Ok(CmdValue::Fea(out))
            }
            Exp => {
                check_params(func, params, 2)?;
                let a = self.eval_command(&params[0])?.to_scalar();
                let b = self.eval_command(&params[1])?.to_scalar();
                let exp = b
                    .to_u32()
                    .ok_or_else(|| ExecutorError::ExponentTooLarge(b.clone()))?;
                Ok(CmdValue::Fea(bigint_to_fea(&a.pow(exp))))
            }
            BitwiseAnd => self.scalar_pair_fea(func, params, |a, b| a & b),
            BitwiseOr => self.scalar_pair_fea(func, params, |a, b| a | b),
            BitwiseXor => self.scalar_pair_fea(func, params, |a, b| a ^ b),
            BitwiseNot => {
                check_params(func, params, 1)?;
                let a = self.eval_biguint(&params[0])?;
                Ok(fea_value(&(a ^ MASK_256.clone())))
            }
            CompLt => self.scalar_pair_flag(func, params, |a, b| a < b),
            CompGt => self.scalar_pair_flag(func, params, |a, b| a > b),
            CompEq => self.scalar_pair_flag(func, params, |a, b| a == b),
            LoadScalar => {
                check_params(func, params, 1)?;
                self.eval_command(&params[0])
            }
            InverseFpEc => {
                check_params(func, params, 1)?;
                let a = self.eval_biguint(&params[0])?;
                Ok(fea_value(&PrimeField::base().inv(&a)?))
            }
            InverseFnEc => {
                check_params(func, params, 1)?;
                let a = self.eval_biguint(&params[0])?;
                Ok(fea_value(&PrimeField::scalar().inv(&a)?))
            }
            SqrtFpEc => {
                check_params(func, params, 1)?;
                let a = self.eval_biguint(&params[0])?;
                let r = PrimeField::base().sqrt(&a).unwrap_or_else(|| MASK_256.clone());
                Ok(fea_value(&r))
            }
            XAddPointEc => self.curve_point(func, params, false, 0),
            YAddPointEc => self.curve_point(func, params, false, 1),
            XDblPointEc => self.curve_point(func, params, true, 0),
            YDblPointEc => self.curve_point(func, params, true, 1),
            Checkpoint => {
                check_params(func, params, 0)?;
                self.ctx.accessed_storage.push(Default::default());
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            Commit => {
                check_params(func, params, 0)?;
                if let Some(top) = self.ctx.accessed_storage.pop() {
                    match self.ctx.accessed_storage.last_mut() {
                        Some(prev) => {
                            for (addr, keys) in top {
                                prev.entry(addr).or_default().extend(keys);
                            }
                        }
                        None => self.ctx.accessed_storage.push(top),
                    }
                }
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            Revert => {
                check_params(func, params, 0)?;
                self.ctx.accessed_storage.pop();
                if self.ctx.accessed_storage.is_empty() {
                    self.ctx.accessed_storage.push(Default::default());
                }
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            ClearWarmedStorage => {
                check_params(func, params, 0)?;
                self.ctx.accessed_storage = vec![Default::default()];
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            IsWarmedAddress => {
                check_params(func, params, 1)?;
                let addr = self.eval_biguint(&params[0])?;
                // Precompiled contract addresses are always warm.
                if addr > BigUint::zero() && addr < BigUint::from(10u8) {
                    return Ok(CmdValue::Fea(*FEA_ZERO));
                }
                let key = format!("{addr:x}");
                let warm = self
                    .ctx
                    .accessed_storage
                    .iter()
                    .any(|m| m.contains_key(&key));
                if !warm {
                    if let Some(last) = self.ctx.accessed_storage.last_mut() {
                        last.entry(key).or_default();
                    }
                }
                Ok(flag_fea(!warm))
            }
            IsWarmedStorage => {
                check_params(func, params, 2)?;
                let addr = format!("{:x}", self.eval_biguint(&params[0])?);
                let slot = format!("{:x}", self.eval_biguint(&params[1])?);
                let warm = self
                    .ctx
                    .accessed_storage
                    .iter()
                    .any(|m| m.get(&addr).is_some_and(|keys| keys.contains(&slot)));
                if !warm {
                    if let Some(last) = self.ctx.accessed_storage.last_mut() {
                        last.entry(addr).or_default().insert(slot);
                    }
                }
                Ok(flag_fea(!warm))
            }
            SaveContractBytecode => {
                check_params(func, params, 1)?;
                let addr = self.eval_u64(&params[0], "hash address")?;
                let buffer = self
                    .ctx
                    .hash_p
                    .get(&addr)
                    .ok_or(ExecutorError::HashBufferMissing(addr))?;
                let digest = buffer
                    .digest
                    .clone()
                    .ok_or(ExecutorError::DigestNotComputed(addr))?;
                let data = buffer.bytes(addr)?;
                self.ctx
                    .contracts_bytecode
                    .insert(format!("{digest:064x}"), data);
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            MemAlignWrW0 => {
                check_params(func, params, 3)?;
                let m0 = self.eval_biguint(&params[0])?;
                let v = self.eval_biguint(&params[1])?;
                let o = self.eval_mem_align_offset(&params[2])?;
                let w0 = (m0 & (&*MASK_256 << ((32 - o) * 8))) | (&*MASK_256 & (v >> (o * 8)));
                Ok(fea_value(&w0))
            }
            MemAlignWrW1 => {
                check_params(func, params, 3)?;
                let m1 = self.eval_biguint(&params[0])?;
                let v = self.eval_biguint(&params[1])?;
                let o = self.eval_mem_align_offset(&params[2])?;
                let w1 = (m1 & (&*MASK_256 >> (o * 8))) | (&*MASK_256 & (v << ((32 - o) * 8)));
                Ok(fea_value(&w1))
            }
            MemAlignWr8W0 => {
                check_params(func, params, 3)?;
                let m0 = self.eval_biguint(&params[0])?;
                let v = self.eval_biguint(&params[1])?;
                let o = self.eval_mem_align_offset(&params[2])?;
                if o > 31 {
                    return Err(ExecutorError::MemAlignOffsetOutOfRange(o.into()));
                }
                let bits = (31 - o) * 8;
                let byte_mask = BigUint::from(0xFFu8) << bits;
                let w0 = (m0 & (&*MASK_256 - byte_mask)) | ((v & BigUint::from(0xFFu8)) << bits);
                Ok(fea_value(&w0))
            }
            Dump | DumpRegs | DumpHex | Log => {
                for p in params {
                    let v = self.eval_command(p)?.to_scalar();
                    if func == DumpHex {
                        debug!(step = self.ctx.step, value = %format!("{v:x}"), "rom dump");
                    } else {
                        debug!(step = self.ctx.step, value = %v, "rom dump");
                    }
                }
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
            Break => {
                debug!(step = self.ctx.step, "rom breakpoint");
                Ok(CmdValue::Fea(*FEA_ZERO))
            }
        }
    }

    fn input_fea(
        &mut self,
        func: CmdFunction,
        params: &[Cmd],
        read: impl Fn(&crate::input::BatchInput) -> BigUint,
    ) -> Result<CmdValue> {
        check_params(func, params, 0)?;
        Ok(fea_value(&read(self.input)))
    }

    fn scalar_pair_fea(
        &mut self,
        func: CmdFunction,
        params: &[Cmd],
        op: impl Fn(BigUint, BigUint) -> BigUint,
    ) -> Result<CmdValue> {
        check_params(func, params, 2)?;
        let a = self.eval_biguint(&params[0])?;
        let b = self.eval_biguint(&params[1])?;
        Ok(fea_value(&op(a, b)))
    }

    fn scalar_pair_flag(
        &mut self,
        func: CmdFunction,
        params: &[Cmd],
        op: impl Fn(&BigInt, &BigInt) -> bool,
    ) -> Result<CmdValue> {
        check_params(func, params, 2)?;
        let a = self.eval_command(&params[0])?.to_scalar();
        let b = self.eval_command(&params[1])?.to_scalar();
        Ok(CmdValue::Scalar(bool_bigint(op(&a, &b))))
    }

    fn curve_point(
        &mut self,
        func: CmdFunction,
        params: &[Cmd],
        dbl: bool,
        coord: usize,
    ) -> Result<CmdValue> {
        check_params(func, params, if dbl { 2 } else { 4 })?;
        let x1 = self.eval_biguint(&params[0])?;
        let y1 = self.eval_biguint(&params[1])?;
        let (x2, y2) = if dbl {
            (x1.clone(), y1.clone())
        } else {
            (self.eval_biguint(&params[2])?, self.eval_biguint(&params[3])?)
        };
        let (x3, y3) = ec_add_point(&PrimeField::base(), &x1, &y1, &x2, &y2, dbl)?;
        Ok(fea_value(if coord == 0 { &x3 } else { &y3 }))
    }

    pub(crate) fn eval_biguint(&mut self, cmd: &Cmd) -> Result<BigUint> {
        Ok(wrap_biguint(&self.eval_command(cmd)?.to_scalar()))
    }

    fn eval_u64(&mut self, cmd: &Cmd, what: &'static str) -> Result<u64> {
        let v = self.eval_command(cmd)?.to_scalar();
        if v.is_negative() {
            return Err(ExecutorError::NegativeValue(what));
        }
        v.to_u64().ok_or(ExecutorError::NegativeValue(what))
    }

    fn eval_usize(&mut self, cmd: &Cmd, what: &'static str) -> Result<usize> {
        Ok(self.eval_u64(cmd, what)? as usize)
    }

    fn eval_mem_align_offset(&mut self, cmd: &Cmd) -> Result<usize> {
        let o = self.eval_biguint(cmd)?;
        let out = o.to_usize().filter(|o| *o <= 32);
        out.ok_or(ExecutorError::MemAlignOffsetOutOfRange(o))
    }
}

/// Wraps a signed scalar into the unsigned 256-bit range, two's complement.
fn wrap_biguint(v: &BigInt) -> BigUint {
    if v.sign() == Sign::Minus {
        let m = scalar_to_bigint(&MASK_256) + 1;
        ((v % &m) + &m) % &m
    } else {
        v.clone()
    }
    .to_biguint()
    .unwrap_or_default()
}

fn fea_value(s: &BigUint) -> CmdValue {
    CmdValue::Fea(scalar_to_fea(s))
}

fn flag_fea(cold: bool) -> CmdValue {
    let mut out = *FEA_ZERO;
    if cold {
        out[0] = fe(1);
    }
    CmdValue::Fea(out)
}

fn bool_bigint(b: bool) -> BigInt {
    if b {
        BigInt::one()
    } else {
        BigInt::zero()
    }
}

fn shift_amount(b: BigInt) -> Result<u32> {
    b.to_u32().ok_or(ExecutorError::ExponentTooLarge(b))
}

fn check_params(func: CmdFunction, params: &[Cmd], n: usize) -> Result<()> {
    if params.len() == n {
        Ok(())
    } else {
        Err(ExecutorError::InvalidParamCount(func.name()))
    }
}
