//! Execution mode switches.

/// Run-mode configuration.
///
/// `unsigned` runs a batch whose transactions carry no signatures, taking
/// the sender from the input instead of recovering it; `execute` skips the
/// final state-root asserts so a batch can be replayed against a different
/// expected state. Both relax asserts only, never the trace checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    pub unsigned: bool,
    pub execute: bool,
    /// Debug runs may stop at the finalize label before the trace is padded
    /// to full length.
    pub debug: bool,
    /// Override of the trace length. `None` uses [`DEFAULT_STEPS`].
    pub steps_n: Option<usize>,
}

/// Default number of rows in the main trace.
pub const DEFAULT_STEPS: usize = 1 << 23;

impl ExecutorConfig {
    pub fn skip_asserts(&self) -> bool {
        self.unsigned || self.execute
    }

    pub fn steps(&self) -> usize {
        self.steps_n.unwrap_or(DEFAULT_STEPS)
    }
}
