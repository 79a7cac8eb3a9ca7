//! The main machine step loop.
//!
//! Each step reads the ROM line at the current program counter and performs
//! four phases in order: the line's pre-hooks, operand composition
//! (resolving a free input when the line requests one), the consistency
//! checks of whatever operation the line claims, and the register commit
//! that decides the next row. Any inconsistency aborts the run; a trace
//! with a single bad step cannot be proven, so nothing is recoverable.

use num_bigint::{BigInt, BigUint};
use num_traits::{ToPrimitive, Zero};
use p3_field::AbstractField;
use tracing::{debug, info};

use crate::arith::{ec_add_point, PrimeField};
use crate::columns::{InSelectors, MainColumns, StepFlags};
use crate::config::ExecutorConfig;
use crate::context::{
    Counters, ExecutionContext, HashBuffer, LastStorageWrite, Registers,
};
use crate::errors::{ExecutorError, Result};
use crate::eval::Tracer;
use crate::evidence::{
    ArithAction, BinaryAction, Evidence, HashReads, MemAccess, MemAlignAction, StorageAction,
};
use crate::field::{
    fe, fe_i64, fe_to_i64, fea_to_scalar, h4_to_scalar, scalar_to_fea, scalar_to_h4, sr4to8,
    sr8to4, Fe, Fea, H4, FEA_ZERO,
};
use crate::input::{keccak_scalar, BatchInput};
use crate::mem_align;
use crate::rom::{FreeInTag, Instruction, Rom};
use crate::storage::{StateStore, TreeHasher};

/// Relative addresses live below this bound.
const ADDR_LIMIT: i64 = 0x10000;
/// Address-space segment bases.
const CODE_BASE: i64 = 0x10000;
const STACK_BASE: i64 = 0x20000;
const MEM_BASE: i64 = 0x30000;
const CTX_STRIDE: i64 = 0x40000;
/// Sponge rates, in bytes, for the keccak and poseidon padding counters.
const KECCAK_RATE: u64 = 136;
const POSEIDON_RATE: u64 = 56;

/// Output of a full run: the committed trace plus the evidence queues for
/// the secondary machines.
#[derive(Debug)]
pub struct ExecutionResult {
    pub cols: MainColumns,
    pub evidence: Evidence,
    pub counters: Counters,
    /// Steps actually executed; smaller than the trace length only on a
    /// debug early exit.
    pub steps: usize,
}

pub struct Executor<'a> {
    pub(crate) rom: &'a Rom,
    pub(crate) input: &'a BatchInput,
    pub(crate) store: &'a mut dyn StateStore,
    pub(crate) hasher: &'a dyn TreeHasher,
    pub(crate) tracer: &'a mut dyn Tracer,
    pub(crate) config: ExecutorConfig,
    pub(crate) ctx: ExecutionContext,
    pub(crate) cols: MainColumns,
    pub(crate) evidence: Evidence,
    pub(crate) regs: Registers,
}

impl<'a> Executor<'a> {
    pub fn new(
        rom: &'a Rom,
        input: &'a BatchInput,
        store: &'a mut dyn StateStore,
        hasher: &'a dyn TreeHasher,
        tracer: &'a mut dyn Tracer,
        config: ExecutorConfig,
    ) -> Result<Executor<'a>> {
        if config.unsigned && input.from.is_none() {
            return Err(ExecutorError::UnsignedWithoutFrom);
        }
        let n = config.steps();
        let mut regs = Registers::default();
        regs.sr = scalar_to_fea(&input.old_state_root);
        let mut ctx = ExecutionContext::new(n);
        ctx.contracts_bytecode = input.contracts_bytecode.clone();
        Ok(Executor {
            rom,
            input,
            store,
            hasher,
            tracer,
            config,
            ctx,
            cols: MainColumns::new(n),
            evidence: Evidence::default(),
            regs,
        })
    }

    pub fn run(mut self) -> Result<ExecutionResult> {
        let n = self.cols.n;
        let rom = self.rom;
        let mut exited_early = false;
        let mut steps = self.ctx.steps_n;

        for step in 0..self.ctx.steps_n {
            self.ctx.step = step;
            let i = step % n;
            self.cols.write_registers(i, &self.regs);

            let zk_pc = self.regs.zk_pc;
            let l = rom.program.get(zk_pc as usize).ok_or_else(|| {
                ExecutorError::RomDecode(format!("zkPC {zk_pc} outside the program"))
            })?;
            if self.config.debug && Some(zk_pc) == rom.labels.finalize_execution {
                debug!(step, "reached finalize label, stopping early");
                exited_early = true;
                steps = step;
                break;
            }

            self.exec_step(step, i, l).map_err(|e| ExecutorError::AtStep {
                step,
                zk_pc,
                location: format!("{}:{}", l.file_name, l.line),
                source: Box::new(e),
            })?;
        }

        if !exited_early {
            // The wrap-around row: boundary constraints read the final
            // state at index 0.
            let wrap = self.ctx.steps_n % n;
            self.cols.write_registers(wrap, &self.regs);
        }
        let skip_final_check =
            self.config.debug && self.config.steps_n.is_some() && exited_early;
        if !skip_final_check {
            self.cols.check_final_state()?;
        }
        self.finalize(steps)
    }

    fn exec_step(&mut self, step: usize, i: usize, l: &'a Instruction) -> Result<()> {
        for cmd in &l.cmd_before {
            self.eval_command(cmd)?;
        }

        let mut flags = StepFlags::default();
        let mut op = self.compose_op(i, l);
        let (addr, addr_rel) = self.resolve_addr(i, l, &mut flags)?;

        if l.in_free != Fe::zero() {
            let tag = l
                .free_in_tag
                .as_ref()
                .ok_or(ExecutorError::MissingFreeInputTag)?;
            let fi = match tag {
                FreeInTag::Hardware => self.hardware_free_input(l, addr)?,
                FreeInTag::Expr(cmd) => self.eval_command(cmd)?.to_fea(),
            };
            self.cols.free[i] = fi;
            for k in 0..8 {
                op[k] += l.in_free * fi[k];
            }
        }

        let mut inc_hash_pos: i64 = 0;
        let mut inc_counter: u64 = 0;

        self.check_assert(l, &op, &mut flags)?;
        self.check_memory(l, &op, addr, step, &mut flags)?;
        self.check_storage(l, &op, i, step, &mut inc_counter, &mut flags)?;
        self.absorb_hashes(l, &op, addr, &mut inc_hash_pos, &mut flags)?;
        self.seal_hashes(l, &op, addr, &mut inc_counter, &mut flags)?;
        if l.hash_p_digest || l.s_wr {
            // The digest scalar must be range-checked as a 256-bit value.
            let v = fea_to_scalar(&op);
            self.evidence.binary.push(BinaryAction {
                a: BigInt::from(v.clone()),
                b: BigInt::zero(),
                c: v,
                opcode: 1,
            });
        }
        self.check_arith(l, &op, &mut flags)?;
        let carry = self.check_binary(l, &op, i, &mut flags)?;
        self.check_mem_align(l, &op, &mut flags)?;

        self.commit(l, &op, addr, addr_rel, inc_hash_pos, inc_counter, carry, i, &mut flags)?;
        self.cols.flags[i] = flags;

        for cmd in &l.cmd_after {
            self.eval_command(cmd)?;
        }
        Ok(())
    }

    /// Weighted sum of every selected operand source except the free input.
    fn compose_op(&mut self, i: usize, l: &Instruction) -> Fea {
        let regs = &self.regs;
        let mut op = *FEA_ZERO;
        add_weighted(&mut op, l.in_a, &regs.a);
        add_weighted(&mut op, l.in_b, &regs.b);
        add_weighted(&mut op, l.in_c, &regs.c);
        add_weighted(&mut op, l.in_d, &regs.d);
        add_weighted(&mut op, l.in_e, &regs.e);
        add_weighted(&mut op, l.in_sr, &regs.sr);
        if l.in_rotl_c != Fe::zero() {
            // C rotated left by one limb.
            for k in 0..8 {
                op[k] += l.in_rotl_c * regs.c[(k + 7) % 8];
            }
        }
        op[0] += l.in_ctx * fe_i64(regs.ctx);
        op[0] += l.in_sp * fe_i64(regs.sp);
        op[0] += l.in_pc * fe_i64(regs.pc);
        op[0] += l.in_gas * fe_i64(regs.gas);
        op[0] += l.in_maxmem * fe_i64(regs.max_mem);
        op[0] += l.in_step * fe(i as u64);
        op[0] += l.in_rr * fe_i64(regs.rr);
        op[0] += l.in_hashpos * fe_i64(regs.hash_pos);
        op[0] += l.in_cnt_arith * fe(regs.counters.arith);
        op[0] += l.in_cnt_binary * fe(regs.counters.binary);
        op[0] += l.in_cnt_keccak_f * fe(regs.counters.keccak_f);
        op[0] += l.in_cnt_mem_align * fe(regs.counters.mem_align);
        op[0] += l.in_cnt_padding_pg * fe(regs.counters.padding_pg);
        op[0] += l.in_cnt_poseidon_g * fe(regs.counters.poseidon_g);

        self.cols.in_sel[i] = InSelectors {
            in_a: l.in_a,
            in_b: l.in_b,
            in_c: l.in_c,
            in_d: l.in_d,
            in_e: l.in_e,
            in_sr: l.in_sr,
            in_ctx: l.in_ctx,
            in_sp: l.in_sp,
            in_pc: l.in_pc,
            in_gas: l.in_gas,
            in_max_mem: l.in_maxmem,
            in_step: l.in_step,
            in_rr: l.in_rr,
            in_hash_pos: l.in_hashpos,
            in_rotl_c: l.in_rotl_c,
            in_free: l.in_free,
            in_cnt_arith: l.in_cnt_arith,
            in_cnt_binary: l.in_cnt_binary,
            in_cnt_keccak_f: l.in_cnt_keccak_f,
            in_cnt_mem_align: l.in_cnt_mem_align,
            in_cnt_padding_pg: l.in_cnt_padding_pg,
            in_cnt_poseidon_g: l.in_cnt_poseidon_g,
        };

        if let Some(c) = l.constant {
            self.cols.constant[i] = c;
            for k in 0..8 {
                op[k] += c[k];
            }
        }
        op
    }

    /// Effective address of the line. The relative part is range-checked
    /// only when the line actually addresses something; the segment bases
    /// apply unconditionally.
    fn resolve_addr(
        &mut self,
        i: usize,
        l: &Instruction,
        flags: &mut StepFlags,
    ) -> Result<(u64, i64)> {
        let regs = &self.regs;
        let mut addr_rel: i64 = 0;
        if l.uses_addr() {
            if l.ind {
                addr_rel = fe_to_i64(regs.e[0])?;
            }
            if l.ind_rr {
                addr_rel += regs.rr;
            }
            addr_rel += l.offset;
            if addr_rel >= ADDR_LIMIT {
                return Err(ExecutorError::AddressTooBig(addr_rel));
            }
            if addr_rel < 0 {
                return Err(ExecutorError::AddressNegative(addr_rel));
            }
        }
        let mut addr = if l.uses_addr() { addr_rel } else { 0 };
        if l.use_ctx {
            addr += regs.ctx * CTX_STRIDE;
            flags.use_ctx = true;
        }
        if l.is_code {
            addr += CODE_BASE;
            flags.is_code = true;
        }
        if l.is_stack {
            addr += STACK_BASE + regs.sp;
            flags.is_stack = true;
        }
        if l.is_mem {
            addr += MEM_BASE;
            flags.is_mem = true;
        }
        if addr < 0 {
            return Err(ExecutorError::AddressNegative(addr));
        }
        flags.ind = l.ind;
        flags.ind_rr = l.ind_rr;
        self.cols.offset[i] = l.offset;
        self.cols.inc_stack[i] = l.inc_stack;
        self.cols.inc_code[i] = l.inc_code;
        Ok((addr as u64, addr_rel))
    }

    /// Resolves an empty free-input tag from the line's operation flags.
    /// Exactly one source must claim it.
    fn hardware_free_input(&mut self, l: &'a Instruction, addr: u64) -> Result<Fea> {
        let mut hits: u32 = 0;
        let mut fi = *FEA_ZERO;

        if l.m_op && !l.m_wr {
            fi = self.ctx.mem.get(&addr).copied().unwrap_or(*FEA_ZERO);
            hits += 1;
        }
        if l.s_rd {
            let (_, key) = self.storage_keys(true);
            let root = sr8to4(&self.regs.sr);
            let res = self.store.get(&root, &key)?;
            fi = scalar_to_fea(&res.value);
            hits += 1;
        }
        if l.s_wr {
            let (key_i, key) = self.storage_keys(true);
            let root = sr8to4(&self.regs.sr);
            let value = fea_to_scalar(&self.regs.d);
            let res = self.store.set(&root, &key, &value)?;
            let new_root = res.new_root;
            self.ctx.last_s_write = Some(LastStorageWrite {
                key_i,
                key,
                new_root,
                res,
                step: self.ctx.step,
            });
            fi = sr4to8(&new_root);
            hits += 1;
        }
        if l.hash_k {
            let size = hash_size(fe_to_i64(self.regs.d[0])?)?;
            let pos = hash_pos(self.regs.hash_pos)?;
            let buf = self.ctx.hash_k.entry(addr).or_default();
            fi = scalar_to_fea(&read_hash_bytes(buf, addr, pos, size)?);
            hits += 1;
        }
        if l.hash_k_digest {
            let buf = self
                .ctx
                .hash_k
                .get(&addr)
                .ok_or(ExecutorError::HashBufferMissing(addr))?;
            let dg = buf
                .digest
                .as_ref()
                .ok_or(ExecutorError::DigestNotComputed(addr))?;
            fi = scalar_to_fea(dg);
            hits += 1;
        }
        if l.hash_p {
            let size = hash_size(fe_to_i64(self.regs.d[0])?)?;
            let pos = hash_pos(self.regs.hash_pos)?;
            let buf = self.ctx.hash_p.entry(addr).or_default();
            fi = scalar_to_fea(&read_hash_bytes(buf, addr, pos, size)?);
            hits += 1;
        }
        if l.hash_p_digest {
            let buf = self
                .ctx
                .hash_p
                .get(&addr)
                .ok_or(ExecutorError::HashBufferMissing(addr))?;
            let dg = buf
                .digest
                .as_ref()
                .ok_or(ExecutorError::DigestNotComputed(addr))?;
            fi = scalar_to_fea(dg);
            hits += 1;
        }
        if l.bin {
            let a = fea_to_scalar(&self.regs.a);
            let b = fea_to_scalar(&self.regs.b);
            fi = scalar_to_fea(&l.bin_opcode.apply(&a, &b));
            hits += 1;
        }
        if l.mem_align && !l.mem_align_wr {
            let m0 = fea_to_scalar(&self.regs.a);
            let m1 = fea_to_scalar(&self.regs.b);
            let offset = fea_to_scalar(&self.regs.c);
            let o = offset
                .to_u32()
                .filter(|o| *o <= 32)
                .ok_or(ExecutorError::MemAlignOffsetOutOfRange(offset))?;
            fi = scalar_to_fea(&mem_align::read_value(&m0, &m1, o));
            hits += 1;
        }

        match hits {
            0 => Err(ExecutorError::FreeInputNoSource),
            1 => Ok(fi),
            n => Err(ExecutorError::FreeInputAmbiguous(n)),
        }
    }

    /// Derives the storage key pair from C (slot material) and A/B (address
    /// material). When `record` is set, both sponge invocations land in the
    /// poseidon evidence queue.
    fn storage_keys(&mut self, record: bool) -> (H4, H4) {
        let regs = &self.regs;
        let kin0 = regs.c;
        let mut kin1 = *FEA_ZERO;
        kin1[..6].copy_from_slice(&regs.a[..6]);
        kin1[6] = regs.b[0];
        kin1[7] = regs.b[1];
        let zero_cap = [Fe::zero(); 4];
        let key_i = self.hasher.hash(&kin0, &zero_cap);
        let key = self.hasher.hash(&kin1, &key_i);
        if record {
            let mut ev0 = [Fe::zero(); 16];
            ev0[..8].copy_from_slice(&kin0);
            ev0[12..].copy_from_slice(&key_i);
            self.evidence.poseidon_g.push(ev0);
            let mut ev1 = [Fe::zero(); 16];
            ev1[..8].copy_from_slice(&kin1);
            ev1[8..12].copy_from_slice(&key_i);
            ev1[12..].copy_from_slice(&key);
            self.evidence.poseidon_g.push(ev1);
        }
        (key_i, key)
    }

    fn check_assert(&self, l: &Instruction, op: &Fea, flags: &mut StepFlags) -> Result<()> {
        if !l.assert {
            return Ok(());
        }
        flags.assert = true;
        let labels = &self.rom.labels;
        let at_root_assert = Some(self.regs.zk_pc) == labels.assert_new_state_root
            || Some(self.regs.zk_pc) == labels.assert_new_local_exit_root;
        if at_root_assert && self.config.skip_asserts() {
            debug!(zk_pc = self.regs.zk_pc, "skipping root assert");
            return Ok(());
        }
        if *op != self.regs.a {
            return Err(ExecutorError::AssertMismatch {
                op: format!("{:#x}", fea_to_scalar(op)),
                a: format!("{:#x}", fea_to_scalar(&self.regs.a)),
            });
        }
        Ok(())
    }

    fn check_memory(
        &mut self,
        l: &Instruction,
        op: &Fea,
        addr: u64,
        step: usize,
        flags: &mut StepFlags,
    ) -> Result<()> {
        if !l.m_op {
            return Ok(());
        }
        flags.m_op = true;
        self.evidence.mem.push(MemAccess {
            is_write: l.m_wr,
            address: addr,
            step,
            value: *op,
        });
        if l.m_wr {
            flags.m_wr = true;
            self.ctx.mem.insert(addr, *op);
        } else {
            let have = self.ctx.mem.get(&addr).copied().unwrap_or(*FEA_ZERO);
            if have != *op {
                return Err(ExecutorError::MemoryReadMismatch(addr));
            }
        }
        Ok(())
    }

    fn check_storage(
        &mut self,
        l: &Instruction,
        op: &Fea,
        i: usize,
        step: usize,
        inc_counter: &mut u64,
        flags: &mut StepFlags,
    ) -> Result<()> {
        if l.s_rd {
            flags.s_rd = true;
            let (key_i, key) = self.storage_keys(false);
            let root = sr8to4(&self.regs.sr);
            let res = self.store.get(&root, &key)?;
            *inc_counter = res.proof_hash_counter + 2;
            let value = res.value.clone();
            self.evidence.storage.push(StorageAction::Read(res));
            if fea_to_scalar(op) != value {
                return Err(ExecutorError::StorageReadMismatch);
            }
            self.cols.s_key_i[i] = key_i;
            self.cols.s_key[i] = key;
        }
        if l.s_wr {
            flags.s_wr = true;
            let w = match self.ctx.last_s_write.take() {
                Some(w) if w.step == step => w,
                _ => {
                    let (key_i, key) = self.storage_keys(false);
                    let root = sr8to4(&self.regs.sr);
                    let value = fea_to_scalar(&self.regs.d);
                    let res = self.store.set(&root, &key, &value)?;
                    LastStorageWrite {
                        key_i,
                        key,
                        new_root: res.new_root,
                        res,
                        step,
                    }
                }
            };
            *inc_counter = w.res.proof_hash_counter + 2;
            self.evidence.storage.push(StorageAction::Write(w.res.clone()));
            if sr8to4(op) != w.new_root {
                return Err(ExecutorError::StorageWriteMismatch);
            }
            self.cols.s_key_i[i] = w.key_i;
            self.cols.s_key[i] = w.key;
            self.ctx.last_s_write = Some(w);
        }
        Ok(())
    }

    /// Absorb forms: write `D[0]` bytes of the operand into the buffer at
    /// the current hash position. Re-absorbing the same bytes is legal as
    /// long as they match.
    fn absorb_hashes(
        &mut self,
        l: &Instruction,
        op: &Fea,
        addr: u64,
        inc_hash_pos: &mut i64,
        flags: &mut StepFlags,
    ) -> Result<()> {
        if l.hash_k {
            flags.hash_k = true;
            let size = hash_size(fe_to_i64(self.regs.d[0])?)?;
            let pos = hash_pos(self.regs.hash_pos)?;
            let buf = self.ctx.hash_k.entry(addr).or_default();
            absorb_bytes(buf, addr, pos, size, &fea_to_scalar(op))?;
            *inc_hash_pos = size as i64;
        }
        if l.hash_p {
            flags.hash_p = true;
            let size = hash_size(fe_to_i64(self.regs.d[0])?)?;
            let pos = hash_pos(self.regs.hash_pos)?;
            let buf = self.ctx.hash_p.entry(addr).or_default();
            absorb_bytes(buf, addr, pos, size, &fea_to_scalar(op))?;
            *inc_hash_pos = size as i64;
        }
        Ok(())
    }

    /// Length and digest forms. Sealing a keccak buffer that was never
    /// touched is legal for the empty string; a poseidon buffer must exist.
    fn seal_hashes(
        &mut self,
        l: &Instruction,
        op: &Fea,
        addr: u64,
        inc_counter: &mut u64,
        flags: &mut StepFlags,
    ) -> Result<()> {
        if l.hash_k_len {
            flags.hash_k_len = true;
            let lm = fe_to_i64(op[0])?;
            if !self.ctx.hash_k.contains_key(&addr) {
                if lm != 0 {
                    return Err(ExecutorError::HashLenMismatch {
                        addr,
                        claimed: lm,
                        actual: 0,
                    });
                }
                self.ctx.hash_k.insert(addr, HashBuffer::default());
            }
            let buf = self.ctx.hash_k.entry(addr).or_default();
            if lm != buf.data.len() as i64 {
                return Err(ExecutorError::HashLenMismatch {
                    addr,
                    claimed: lm,
                    actual: buf.data.len(),
                });
            }
            if buf.digest.is_none() {
                let bytes = buf.bytes(addr)?;
                buf.digest = Some(keccak_scalar(&bytes));
            }
        }
        if l.hash_k_digest {
            flags.hash_k_digest = true;
            let buf = self
                .ctx
                .hash_k
                .get(&addr)
                .ok_or(ExecutorError::HashBufferMissing(addr))?;
            let dg = buf
                .digest
                .as_ref()
                .ok_or(ExecutorError::DigestNotComputed(addr))?;
            if fea_to_scalar(op) != *dg {
                return Err(ExecutorError::DigestMismatch(addr));
            }
            *inc_counter = (buf.data.len() as u64 + 1).div_ceil(KECCAK_RATE);
        }
        if l.hash_p_len {
            flags.hash_p_len = true;
            let lm = fe_to_i64(op[0])?;
            let hasher = self.hasher;
            let buf = self
                .ctx
                .hash_p
                .get_mut(&addr)
                .ok_or(ExecutorError::HashBufferMissing(addr))?;
            if lm != buf.data.len() as i64 {
                return Err(ExecutorError::HashLenMismatch {
                    addr,
                    claimed: lm,
                    actual: buf.data.len(),
                });
            }
            if buf.digest.is_none() {
                let bytes = buf.bytes(addr)?;
                let dg = poseidon_linear(hasher, &bytes);
                buf.digest = Some(dg.clone());
                self.store.set_program(&scalar_to_h4(&dg), &bytes)?;
            }
        }
        if l.hash_p_digest {
            flags.hash_p_digest = true;
            let dg = fea_to_scalar(op);
            if !self.ctx.hash_p.contains_key(&addr) {
                // A digest may be claimed before its preimage was ever
                // absorbed; the program space must then know it.
                let data = self.store.get_program(&scalar_to_h4(&dg))?;
                let buf = HashBuffer {
                    data: data.into_iter().map(Some).collect(),
                    reads: Default::default(),
                    digest: Some(dg.clone()),
                };
                self.ctx.hash_p.insert(addr, buf);
            }
            let buf = self
                .ctx
                .hash_p
                .get(&addr)
                .ok_or(ExecutorError::HashBufferMissing(addr))?;
            *inc_counter = (buf.data.len() as u64 + 1).div_ceil(POSEIDON_RATE);
            let have = buf
                .digest
                .as_ref()
                .ok_or(ExecutorError::DigestNotComputed(addr))?;
            if *have != dg {
                return Err(ExecutorError::DigestMismatch(addr));
            }
        }
        Ok(())
    }

    fn check_arith(&mut self, l: &Instruction, op: &Fea, flags: &mut StepFlags) -> Result<()> {
        if !l.arith {
            return Ok(());
        }
        flags.arith = true;
        [flags.arith_eq0, flags.arith_eq1, flags.arith_eq2, flags.arith_eq3] = l.arith_eq;

        let a = fea_to_scalar(&self.regs.a);
        let b = fea_to_scalar(&self.regs.b);
        let c = fea_to_scalar(&self.regs.c);
        let d = fea_to_scalar(&self.regs.d);
        let o = fea_to_scalar(op);
        match l.arith_eq {
            [true, false, false, false] => {
                // A * B + C == D * 2^256 + op
                if &a * &b + &c != (&d << 256u32) + &o {
                    return Err(ExecutorError::ArithMismatch);
                }
                self.evidence.arith.push(ArithAction {
                    x1: a,
                    y1: b,
                    x2: c,
                    y2: d,
                    x3: BigUint::zero(),
                    y3: o,
                    sel_eq: [true, false, false, false],
                });
            }
            [false, true, false, true] | [false, false, true, true] => {
                let dbl = l.arith_eq[2];
                let (x1, y1, x2, y2) = (a, b, c, d);
                let x3 = fea_to_scalar(&self.regs.e);
                let y3 = o;
                let fec = PrimeField::base();
                let (ex3, ey3) = if dbl {
                    ec_add_point(&fec, &x1, &y1, &x1, &y1, true)?
                } else {
                    ec_add_point(&fec, &x1, &y1, &x2, &y2, false)?
                };
                // The claimed coordinates must be canonical; a value offset
                // by the modulus is rejected, not reduced.
                if x3 != ex3 {
                    return Err(ExecutorError::CurvePointMismatch { op: "x3" });
                }
                if y3 != ey3 {
                    return Err(ExecutorError::CurvePointMismatch { op: "y3" });
                }
                self.evidence.arith.push(ArithAction {
                    x2: if dbl { x1.clone() } else { x2 },
                    y2: if dbl { y1.clone() } else { y2 },
                    x1,
                    y1,
                    x3,
                    y3,
                    sel_eq: [false, !dbl, dbl, true],
                });
            }
            _ => return Err(ExecutorError::InvalidArithSelectors),
        }
        Ok(())
    }

    fn check_binary(
        &mut self,
        l: &Instruction,
        op: &Fea,
        i: usize,
        flags: &mut StepFlags,
    ) -> Result<bool> {
        if !l.bin {
            return Ok(false);
        }
        flags.bin = true;
        let opcode = l.bin_opcode;
        let a = fea_to_scalar(&self.regs.a);
        let b = fea_to_scalar(&self.regs.b);
        let c = fea_to_scalar(op);
        if opcode.apply(&a, &b) != c {
            return Err(ExecutorError::BinaryMismatch(opcode.name()));
        }
        let carry = opcode.carry(&a, &b);
        self.cols.bin_opcode[i] = opcode.into();
        self.cols.carry[i] = carry;
        let (ea, eb) = opcode.evidence_operands(&a, &b);
        self.evidence.binary.push(BinaryAction {
            a: ea,
            b: eb,
            c,
            opcode: opcode.into(),
        });
        Ok(carry)
    }

    fn check_mem_align(&mut self, l: &Instruction, op: &Fea, flags: &mut StepFlags) -> Result<()> {
        if !l.mem_align {
            return Ok(());
        }
        flags.mem_align = true;
        if l.mem_align_wr && l.mem_align_wr8 {
            return Err(ExecutorError::InvalidMemAlignSelectors);
        }
        let m0 = fea_to_scalar(&self.regs.a);
        let m1 = fea_to_scalar(&self.regs.b);
        let offset = fea_to_scalar(&self.regs.c);
        let o = offset
            .to_u32()
            .filter(|o| *o < 32)
            .ok_or(ExecutorError::MemAlignOffsetOutOfRange(offset))?;

        if l.mem_align_wr {
            flags.mem_align_wr = true;
            // The written value travels in the operand; D and E claim the
            // two rewritten words.
            let v = fea_to_scalar(op);
            let w0 = fea_to_scalar(&self.regs.d);
            let w1 = fea_to_scalar(&self.regs.e);
            let (ew0, ew1) = mem_align::write_word(&m0, &m1, &v, o);
            if w0 != ew0 {
                return Err(ExecutorError::MemAlignMismatch("w0"));
            }
            if w1 != ew1 {
                return Err(ExecutorError::MemAlignMismatch("w1"));
            }
            self.evidence.mem_align.push(MemAlignAction {
                m0,
                m1,
                v,
                w0,
                w1,
                offset: o,
                wr256: true,
                wr8: false,
            });
        } else if l.mem_align_wr8 {
            flags.mem_align_wr8 = true;
            let v = fea_to_scalar(op);
            let w0 = fea_to_scalar(&self.regs.d);
            if w0 != mem_align::write_byte(&m0, &v, o) {
                return Err(ExecutorError::MemAlignMismatch("w0"));
            }
            self.evidence.mem_align.push(MemAlignAction {
                m0,
                m1: BigUint::zero(),
                v,
                w0,
                w1: BigUint::zero(),
                offset: o,
                wr256: false,
                wr8: true,
            });
        } else {
            let v = fea_to_scalar(op);
            if v != mem_align::read_value(&m0, &m1, o) {
                return Err(ExecutorError::MemAlignMismatch("value"));
            }
            self.evidence.mem_align.push(MemAlignAction {
                m0,
                m1,
                v,
                w0: BigUint::zero(),
                w1: BigUint::zero(),
                offset: o,
                wr256: false,
                wr8: false,
            });
        }
        Ok(())
    }

    /// Decides the register state entering the next row.
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &mut self,
        l: &Instruction,
        op: &Fea,
        addr: u64,
        addr_rel: i64,
        inc_hash_pos: i64,
        inc_counter: u64,
        carry: bool,
        i: usize,
        flags: &mut StepFlags,
    ) -> Result<()> {
        let regs = self.regs.clone();
        let mut next = regs.clone();

        next.a = if l.set_a {
            flags.set_a = true;
            *op
        } else if self.config.unsigned
            && Some(regs.zk_pc) == self.rom.labels.check_and_save_from
        {
            // In unsigned mode the sender is injected instead of being
            // recovered from a signature.
            match &self.input.from {
                Some(from) => scalar_to_fea(from),
                None => regs.a,
            }
        } else {
            regs.a
        };
        next.b = set_or_keep(l.set_b, &mut flags.set_b, op, &regs.b);
        next.c = set_or_keep(l.set_c, &mut flags.set_c, op, &regs.c);
        next.d = set_or_keep(l.set_d, &mut flags.set_d, op, &regs.d);
        next.e = set_or_keep(l.set_e, &mut flags.set_e, op, &regs.e);
        next.sr = set_or_keep(l.set_sr, &mut flags.set_sr, op, &regs.sr);

        next.ctx = if l.set_ctx {
            flags.set_ctx = true;
            fe_to_i64(op[0])?
        } else {
            regs.ctx
        };
        next.sp = if l.set_sp {
            flags.set_sp = true;
            fe_to_i64(op[0])?
        } else {
            regs.sp + l.inc_stack
        };
        next.pc = if l.set_pc {
            flags.set_pc = true;
            fe_to_i64(op[0])?
        } else {
            regs.pc + l.inc_code
        };
        next.rr = if l.set_rr {
            flags.set_rr = true;
            fe_to_i64(op[0])?
        } else {
            regs.rr
        };
        next.gas = if l.set_gas {
            flags.set_gas = true;
            fe_to_i64(op[0])?
        } else {
            regs.gas
        };
        next.hash_pos = if l.set_hashpos {
            flags.set_hash_pos = true;
            fe_to_i64(op[0])? + inc_hash_pos
        } else {
            regs.hash_pos + inc_hash_pos
        };
        let max_mem_calculated = if l.is_mem && addr_rel > regs.max_mem {
            flags.is_max_mem = true;
            addr_rel
        } else {
            regs.max_mem
        };
        next.max_mem = if l.set_maxmem {
            flags.set_max_mem = true;
            fe_to_i64(op[0])?
        } else {
            max_mem_calculated
        };

        if flags.arith {
            next.counters.arith += 1;
        }
        if flags.bin {
            next.counters.binary += 1;
        }
        if flags.mem_align {
            next.counters.mem_align += 1;
        }
        if l.hash_k_digest {
            next.counters.keccak_f += inc_counter;
        }
        if l.hash_p_digest {
            next.counters.padding_pg += inc_counter;
        }
        if l.s_rd || l.s_wr || l.hash_p_digest {
            next.counters.poseidon_g += inc_counter;
        }
        self.cols.inc_counter[i] =
            if l.s_rd || l.s_wr || l.hash_k_digest || l.hash_p_digest {
                inc_counter
            } else {
                0
            };

        if l.jmpn {
            flags.jmpn = true;
            let o = fe_to_i64(op[0])?;
            if o < 0 {
                flags.is_neg = true;
                next.zk_pc = addr;
                self.evidence.byte4.insert(((1i64 << 32) + o) as u64);
            } else {
                next.zk_pc = regs.zk_pc + 1;
                self.evidence.byte4.insert(o as u64);
            }
        } else if l.jmpc {
            flags.jmpc = true;
            next.zk_pc = if carry { addr } else { regs.zk_pc + 1 };
        } else if l.jmp {
            flags.jmp = true;
            next.zk_pc = addr;
        } else {
            next.zk_pc = regs.zk_pc + 1;
        }

        self.regs = next;
        Ok(())
    }

    /// Turns every surviving hash buffer into padding-machine input.
    fn finalize(mut self, steps: usize) -> Result<ExecutionResult> {
        let hash_k = std::mem::take(&mut self.ctx.hash_k);
        for (addr, buf) in hash_k {
            self.evidence.padding_kk.push(partition_reads(addr, &buf)?);
        }
        let hash_p = std::mem::take(&mut self.ctx.hash_p);
        for (addr, buf) in hash_p {
            self.evidence.padding_pg.push(partition_reads(addr, &buf)?);
        }
        info!(
            steps,
            cnt_arith = self.regs.counters.arith,
            cnt_binary = self.regs.counters.binary,
            cnt_keccak_f = self.regs.counters.keccak_f,
            cnt_mem_align = self.regs.counters.mem_align,
            cnt_padding_pg = self.regs.counters.padding_pg,
            cnt_poseidon_g = self.regs.counters.poseidon_g,
            "execution complete"
        );
        Ok(ExecutionResult {
            counters: self.regs.counters,
            cols: self.cols,
            evidence: self.evidence,
            steps,
        })
    }
}

fn add_weighted(op: &mut Fea, w: Fe, src: &Fea) {
    if w != Fe::zero() {
        for k in 0..8 {
            op[k] += w * src[k];
        }
    }
}

fn set_or_keep(set: bool, flag: &mut bool, op: &Fea, keep: &Fea) -> Fea {
    if set {
        *flag = true;
        *op
    } else {
        *keep
    }
}

fn hash_size(v: i64) -> Result<usize> {
    if (0..=32).contains(&v) {
        Ok(v as usize)
    } else {
        Err(ExecutorError::InvalidHashSize(v))
    }
}

fn hash_pos(v: i64) -> Result<usize> {
    usize::try_from(v).map_err(|_| ExecutorError::NegativeValue("hash position"))
}

/// Big-endian read of `size` defined bytes starting at `pos`.
fn read_hash_bytes(buf: &HashBuffer, addr: u64, pos: usize, size: usize) -> Result<BigUint> {
    if pos + size > buf.data.len() {
        return Err(ExecutorError::HashReadOutOfBounds {
            addr,
            pos,
            size,
            len: buf.data.len(),
        });
    }
    let mut s = BigUint::zero();
    for k in 0..size {
        let b = buf.data[pos + k].ok_or(ExecutorError::HashByteUndefined {
            addr,
            pos: pos + k,
        })?;
        s = (s << 8u32) + BigUint::from(b);
    }
    Ok(s)
}

/// Big-endian write of the low `size` bytes of `a` starting at `pos`.
/// Bytes already present must match; the part of `a` above `size` bytes
/// must be zero.
fn absorb_bytes(
    buf: &mut HashBuffer,
    addr: u64,
    pos: usize,
    size: usize,
    a: &BigUint,
) -> Result<()> {
    if buf.data.len() < pos + size {
        buf.data.resize(pos + size, None);
    }
    for k in 0..size {
        let bm = ((a >> ((size - 1 - k) * 8)) & BigUint::from(0xFFu8))
            .to_u8()
            .unwrap_or(0);
        match buf.data[pos + k] {
            Some(b) if b != bm => {
                return Err(ExecutorError::HashByteMismatch {
                    addr,
                    pos: pos + k,
                    got: bm,
                    want: b,
                })
            }
            Some(_) => {}
            None => buf.data[pos + k] = Some(bm),
        }
    }
    if !(a >> (size * 8)).is_zero() {
        return Err(ExecutorError::HashPaddingNotZero {
            size,
            value: a.clone(),
        });
    }
    match buf.reads.get(&pos) {
        Some(&prev) if prev != size => Err(ExecutorError::HashReadSizeConflict {
            addr,
            pos,
            prev,
            new: size,
        }),
        _ => {
            buf.reads.insert(pos, size);
            Ok(())
        }
    }
}

/// Sponge over 56-byte blocks, 7 bytes per input limb, with the usual
/// 0x01/0x80 domain padding. Used for program (bytecode) digests.
fn poseidon_linear(hasher: &dyn TreeHasher, data: &[u8]) -> BigUint {
    let mut padded = data.to_vec();
    padded.push(0x01);
    while padded.len() % 56 != 0 {
        padded.push(0);
    }
    let last = padded.len() - 1;
    padded[last] |= 0x80;

    let mut st = [Fe::zero(); 4];
    for chunk in padded.chunks(56) {
        let mut a = *FEA_ZERO;
        for (k, byte) in chunk.iter().enumerate() {
            a[k / 7] += fe((*byte as u64) << (8 * (k % 7)));
        }
        st = hasher.hash(&a, &st);
    }
    h4_to_scalar(&st)
}

/// Splits a buffer's bytes into the chunk sizes it was absorbed in. Bytes
/// never covered by an absorb position count as single-byte chunks; a chunk
/// overrunning the data is a partition error.
fn partition_reads(addr: u64, buf: &HashBuffer) -> Result<HashReads> {
    let data = buf.bytes(addr)?;
    let mut reads = Vec::new();
    let mut p = 0usize;
    while p < data.len() {
        match buf.reads.get(&p) {
            Some(&size) => {
                reads.push(size);
                p += size;
            }
            None => {
                reads.push(1);
                p += 1;
            }
        }
    }
    if p != data.len() {
        return Err(ExecutorError::HashReadPartition(addr));
    }
    Ok(HashReads { data, reads })
}
