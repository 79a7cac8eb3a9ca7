//! Committed columns of the main machine trace.
//!
//! One row per step. Register columns hold the state *entering* the step;
//! the value committed for the next row is the state leaving it, so after a
//! full pass of `n` steps the wrap-around writes the final state into row 0,
//! where the boundary constraints read it.

use p3_field::AbstractField;

use crate::context::{Counters, Registers};
use crate::errors::{ExecutorError, Result};
use crate::field::{fea_is_zero, Fe, Fea, H4, FEA_ZERO};

/// Weights applied to each operand source for the current row.
#[derive(Debug, Clone, Copy, Default)]
pub struct InSelectors {
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
    pub in_max_mem: Fe,
    pub in_step: Fe,
    pub in_rr: Fe,
    pub in_hash_pos: Fe,
    pub in_rotl_c: Fe,
    pub in_free: Fe,
    pub in_cnt_arith: Fe,
    pub in_cnt_binary: Fe,
    pub in_cnt_keccak_f: Fe,
    pub in_cnt_mem_align: Fe,
    pub in_cnt_padding_pg: Fe,
    pub in_cnt_poseidon_g: Fe,
}

/// Binary instruction flags for the current row.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepFlags {
    pub assert: bool,
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
    pub arith_eq0: bool,
    pub arith_eq1: bool,
    pub arith_eq2: bool,
    pub arith_eq3: bool,
    pub bin: bool,
    pub mem_align: bool,
    pub mem_align_wr: bool,
    pub mem_align_wr8: bool,
    pub jmp: bool,
    pub jmpn: bool,
    pub jmpc: bool,
    pub is_neg: bool,
    pub use_ctx: bool,
    pub is_code: bool,
    pub is_stack: bool,
    pub is_mem: bool,
    pub is_max_mem: bool,
    pub ind: bool,
    pub ind_rr: bool,
    pub set_a: bool,
    pub set_b: bool,
    pub set_c: bool,
    pub set_d: bool,
    pub set_e: bool,
    pub set_sr: bool,
    pub set_ctx: bool,
    pub set_sp: bool,
    pub set_pc: bool,
    pub set_gas: bool,
    pub set_rr: bool,
    pub set_max_mem: bool,
    pub set_hash_pos: bool,
}

/// Column-major trace of the main machine, `n` rows.
#[derive(Debug)]
pub struct MainColumns {
    pub n: usize,
    pub a: Vec<Fea>,
    pub b: Vec<Fea>,
    pub c: Vec<Fea>,
    pub d: Vec<Fea>,
    pub e: Vec<Fea>,
    pub sr: Vec<Fea>,
    pub ctx: Vec<i64>,
    pub sp: Vec<i64>,
    pub pc: Vec<i64>,
    pub gas: Vec<i64>,
    pub rr: Vec<i64>,
    pub hash_pos: Vec<i64>,
    pub max_mem: Vec<i64>,
    pub zk_pc: Vec<u64>,
    pub counters: Vec<Counters>,
    pub in_sel: Vec<InSelectors>,
    pub flags: Vec<StepFlags>,
    pub constant: Vec<Fea>,
    pub free: Vec<Fea>,
    pub bin_opcode: Vec<u8>,
    pub carry: Vec<bool>,
    pub offset: Vec<i64>,
    pub inc_stack: Vec<i64>,
    pub inc_code: Vec<i64>,
    pub inc_counter: Vec<u64>,
    pub s_key_i: Vec<H4>,
    pub s_key: Vec<H4>,
}

impl MainColumns {
    pub fn new(n: usize) -> Self {
        MainColumns {
            n,
            a: vec![(*FEA_ZERO); n],
            b: vec![(*FEA_ZERO); n],
            c: vec![(*FEA_ZERO); n],
            d: vec![(*FEA_ZERO); n],
            e: vec![(*FEA_ZERO); n],
            sr: vec![(*FEA_ZERO); n],
            ctx: vec![0; n],
            sp: vec![0; n],
            pc: vec![0; n],
            gas: vec![0; n],
            rr: vec![0; n],
            hash_pos: vec![0; n],
            max_mem: vec![0; n],
            zk_pc: vec![0; n],
            counters: vec![Counters::default(); n],
            in_sel: vec![InSelectors::default(); n],
            flags: vec![StepFlags::default(); n],
            constant: vec![(*FEA_ZERO); n],
            free: vec![(*FEA_ZERO); n],
            bin_opcode: vec![0; n],
            carry: vec![false; n],
            offset: vec![0; n],
            inc_stack: vec![0; n],
            inc_code: vec![0; n],
            inc_counter: vec![0; n],
            s_key_i: vec![[Fe::zero(); 4]; n],
            s_key: vec![[Fe::zero(); 4]; n],
        }
    }

    /// Writes the register state entering row `i`.
    pub fn write_registers(&mut self, i: usize, regs: &Registers) {
        self.a[i] = regs.a;
        self.b[i] = regs.b;
        self.c[i] = regs.c;
        self.d[i] = regs.d;
        self.e[i] = regs.e;
        self.sr[i] = regs.sr;
        self.ctx[i] = regs.ctx;
        self.sp[i] = regs.sp;
        self.pc[i] = regs.pc;
        self.gas[i] = regs.gas;
        self.rr[i] = regs.rr;
        self.hash_pos[i] = regs.hash_pos;
        self.max_mem[i] = regs.max_mem;
        self.zk_pc[i] = regs.zk_pc;
        self.counters[i] = regs.counters;
    }

    /// Boundary check: the wrap-around state in row 0 must be all zero so
    /// the trace closes. Return-address, hash-position and counter columns
    /// are exempt; they carry over run totals.
    pub fn check_final_state(&self) -> Result<()> {
        let closed = fea_is_zero(&self.a[0])
            && fea_is_zero(&self.b[0])
            && fea_is_zero(&self.c[0])
            && fea_is_zero(&self.d[0])
            && fea_is_zero(&self.e[0])
            && fea_is_zero(&self.sr[0])
            && self.ctx[0] == 0
            && self.sp[0] == 0
            && self.pc[0] == 0
            && self.gas[0] == 0
            && self.max_mem[0] == 0
            && self.zk_pc[0] == 0;
        if closed {
            Ok(())
        } else {
            Err(ExecutorError::OpenTrace)
        }
    }
}
