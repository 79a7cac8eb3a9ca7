//! Reference executor for the rollup's main state machine.
//!
//! The executor runs a batch of L2 transactions through a zkASM ROM and
//! produces two things: the committed columns of the main trace and the
//! evidence queues that feed every secondary machine (arithmetic, binary,
//! memory, memory alignment, storage, the hash padders and the 32-bit
//! range checker). It is the arbiter of batch semantics; the proving
//! pipeline downstream only re-checks what is recorded here.
//!
//! Machine words are 256-bit values carried as 8 Goldilocks limbs of 32
//! bits each; state roots and storage keys travel as 4 limbs of 64 bits.
//! The [`executor::Executor`] drives the step loop, with the tree store,
//! sponge hasher and transaction tracer injected at the seams.

pub mod arith;
pub mod binary;
pub mod columns;
pub mod command;
pub mod config;
pub mod context;
pub mod errors;
pub mod eval;
pub mod evidence;
pub mod executor;
pub mod field;
pub mod input;
pub mod mem_align;
pub mod rom;
pub mod storage;

pub use config::ExecutorConfig;
pub use errors::{ExecutorError, Result};
pub use eval::{NoopTracer, Tracer};
pub use executor::{ExecutionResult, Executor};
pub use input::BatchInput;
pub use rom::Rom;
pub use storage::{KeccakTreeHasher, MemTreeStore, StateStore, TreeHasher};
