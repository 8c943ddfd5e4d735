//! Witness-script spend verification.
//!
//! A spend supplies a witness stack and a script. Unlike a [`Covenant`], the
//! spend is accepted when the *top* element of the final stack is true; other
//! elements may remain below it. Transaction parsing and sighash computation
//! happen outside this crate, which only ever sees the witness stack.
//!
//! [`Covenant`]: crate::Covenant

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

use tracing::debug;

use crate::{
    checker::{SignatureChecker, DEFAULT_CHECKER},
    num::cast_to_bool,
    script::{ExecutionLimits, Interpreter, ScriptError, ScriptStack},
    sha256::{sha256, DIGEST_LEN},
};

/// Verdict for a single witness-script spend.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The script ran and left a true top element.
    Success,
    /// The script ran but left a false top element or an empty stack.
    ScriptFailed,
    /// The interpreter stopped with an error.
    VmError(ScriptError),
}

impl VerifyResult {
    pub fn is_success(self) -> bool {
        self == VerifyResult::Success
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyResult::Success => f.write_str("success"),
            VerifyResult::ScriptFailed => f.write_str("script evaluated to false"),
            VerifyResult::VmError(err) => write!(f, "interpreter error: {err}"),
        }
    }
}

/// Errors in the shape of a witness before any script runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WitnessError {
    /// The witness has no elements, so there is no witness script.
    WitnessEmpty,
    /// The witness script does not hash to the committed program.
    WitnessProgramMismatch,
}

impl fmt::Display for WitnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use WitnessError::*;

        let description = match *self {
            WitnessEmpty => "witness program witness empty",
            WitnessProgramMismatch => "witness script hash does not match program",
        };

        f.write_str(description)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WitnessError {}

/// Runs witness-script spends under a fixed checker and instruction budget.
#[derive(Clone, Copy)]
pub struct TransactionVerifier<'a> {
    checker: &'a dyn SignatureChecker,
    limits: ExecutionLimits,
}

impl Default for TransactionVerifier<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> TransactionVerifier<'a> {
    pub fn new() -> Self {
        Self {
            checker: &DEFAULT_CHECKER,
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_checker(mut self, checker: &'a dyn SignatureChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Runs `script` over `witness_stack` (bottom to top) and judges the top
    /// element of the final stack.
    pub fn verify_input(&self, script: &[u8], witness_stack: &[Vec<u8>]) -> VerifyResult {
        let verdict = match self.execute(script, witness_stack) {
            Ok(stack) => match stack.last() {
                Some(top) if cast_to_bool(top) => VerifyResult::Success,
                _ => VerifyResult::ScriptFailed,
            },
            Err(err) => VerifyResult::VmError(err),
        };
        debug!(verdict = %verdict, script_len = script.len(), "witness script verified");
        verdict
    }

    /// Verifies a script-path spend against a 32-byte witness program.
    ///
    /// The last witness element is the witness script and must hash to
    /// `program`; the remaining elements form the initial stack.
    pub fn verify_witness_spend(
        &self,
        witness: &[Vec<u8>],
        program: &[u8; DIGEST_LEN],
    ) -> Result<VerifyResult, WitnessError> {
        let (script, stack) = witness.split_last().ok_or(WitnessError::WitnessEmpty)?;
        if sha256(script) != *program {
            debug!(script_len = script.len(), "witness script does not match program");
            return Err(WitnessError::WitnessProgramMismatch);
        }
        Ok(self.verify_input(script, stack))
    }

    fn execute(&self, script: &[u8], witness_stack: &[Vec<u8>]) -> Result<ScriptStack, ScriptError> {
        let stack = ScriptStack::from_items(witness_stack.to_vec())?;
        Interpreter::new(script)
            .with_stack(stack)
            .with_checker(self.checker)
            .with_limits(self.limits)
            .run()
    }
}
