use thiserror::Error;

/// Errors surfaced by the executor.
///
/// Every failure here is fatal for the run: a trace with a single
/// inconsistent step cannot be proven, so nothing is ever downgraded to a
/// default value. The step loop wraps inner errors with [`ExecutorError::AtStep`]
/// so the failing step and ROM source location are always reported.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step {step} (zkPC {zk_pc}) at {location}: {source}")]
    AtStep {
        step: usize,
        zk_pc: u64,
        location: String,
        #[source]
        source: Box<ExecutorError>,
    },

    // Field / conversion errors
    #[error("field element {0} is not a 32-bit value")]
    NotA32BitValue(u64),

    // Address resolution
    #[error("relative address too big: {0}")]
    AddressTooBig(i64),
    #[error("relative address cannot be negative: {0}")]
    AddressNegative(i64),

    // Free input resolution
    #[error("free input requested without a tag")]
    MissingFreeInputTag,
    #[error("empty free input tag without a matching source instruction")]
    FreeInputNoSource,
    #[error("only one source instruction may feed a free input, found {0}")]
    FreeInputAmbiguous(u32),

    // Per-step checks
    #[error("assert does not match (op: {op}, A: {a})")]
    AssertMismatch { op: String, a: String },
    #[error("memory read does not match at address {0:#x}")]
    MemoryReadMismatch(u64),
    #[error("storage read does not match")]
    StorageReadMismatch,
    #[error("storage write does not match")]
    StorageWriteMismatch,

    // Hash buffers
    #[error("invalid size for hash: {0}")]
    InvalidHashSize(i64),
    #[error("hash buffer {addr:#x} read out of bounds (pos {pos}, size {size}, len {len})")]
    HashReadOutOfBounds {
        addr: u64,
        pos: usize,
        size: usize,
        len: usize,
    },
    #[error("hash buffer {addr:#x} byte {pos} not defined")]
    HashByteUndefined { addr: u64, pos: usize },
    #[error("hash buffer {addr:#x} byte {pos} is {got:#04x} and should be {want:#04x}")]
    HashByteMismatch {
        addr: u64,
        pos: usize,
        got: u8,
        want: u8,
    },
    #[error("incoherent size {size} for hash payload {value:#x}")]
    HashPaddingNotZero { size: usize, value: num_bigint::BigUint },
    #[error("hash buffer {addr:#x} has different read sizes at position {pos} ({prev} and {new})")]
    HashReadSizeConflict {
        addr: u64,
        pos: usize,
        prev: usize,
        new: usize,
    },
    #[error("hash length does not match for buffer {addr:#x}: is {claimed} and should be {actual}")]
    HashLenMismatch {
        addr: u64,
        claimed: i64,
        actual: usize,
    },
    #[error("hash buffer {0:#x} not defined")]
    HashBufferMissing(u64),
    #[error("digest not calculated for buffer {0:#x}, call the length instruction first")]
    DigestNotComputed(u64),
    #[error("digest does not match for buffer {0:#x}")]
    DigestMismatch(u64),
    #[error("hash buffer {0:#x} reads do not cover its data")]
    HashReadPartition(u64),

    // Arith / binary / mem-align
    #[error("arithmetic does not match")]
    ArithMismatch,
    #[error("invalid arithmetic equation selectors")]
    InvalidArithSelectors,
    #[error("arithmetic curve {op} point does not match")]
    CurvePointMismatch { op: &'static str },
    #[error("invalid binary opcode {0}")]
    InvalidBinaryOpcode(u8),
    #[error("binary {0} does not match")]
    BinaryMismatch(&'static str),
    #[error("mem-align offset out of range: {0}")]
    MemAlignOffsetOutOfRange(num_bigint::BigUint),
    #[error("mem-align {0} does not match")]
    MemAlignMismatch(&'static str),
    #[error("invalid mem-align write selectors")]
    InvalidMemAlignSelectors,

    // Expression evaluation
    #[error("variable already declared: {0}")]
    VariableAlreadyDeclared(String),
    #[error("variable not defined: {0}")]
    VariableNotDefined(String),
    #[error("invalid left expression in assignment")]
    InvalidLeftExpression,
    #[error("invalid number of parameters for function {0}")]
    InvalidParamCount(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("exponent too large: {0}")]
    ExponentTooLarge(num_bigint::BigInt),
    #[error("negative value cannot be used as {0}")]
    NegativeValue(&'static str),

    // ROM / input decoding
    #[error("ROM decode error: {0}")]
    RomDecode(String),
    #[error("input decode error: {0}")]
    InputDecode(String),
    #[error("unsigned mode requires a `from` address in the input")]
    UnsignedWithoutFrom,
    #[error("program not found in state store for the requested digest")]
    ProgramNotFound,

    // Final state
    #[error("program terminated with registers not set to zero")]
    OpenTrace,
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
