//! Covenant acceptance: a script consumes input data when it runs cleanly and
//! leaves exactly one true element.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use tracing::debug;

use crate::{
    checker::{SignatureChecker, DEFAULT_CHECKER},
    num::cast_to_bool,
    script::{ExecutionLimits, Interpreter, ScriptError, ScriptStack},
    sha256::{sha256, DIGEST_LEN},
};

/// A script whose single-true-result execution accepts its input stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Covenant {
    script: Vec<u8>,
    limits: ExecutionLimits,
}

impl Covenant {
    pub fn new(script: impl Into<Vec<u8>>) -> Self {
        Self {
            script: script.into(),
            limits: ExecutionLimits::default(),
        }
    }

    /// Bounds every verification run of this covenant.
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    /// SHA-256 commitment to the covenant script.
    pub fn script_hash(&self) -> [u8; DIGEST_LEN] {
        sha256(&self.script)
    }

    /// Returns whether `input_stack` (bottom to top) satisfies the covenant.
    pub fn verify(&self, input_stack: &[Vec<u8>]) -> bool {
        self.verify_detailed(input_stack).is_ok()
    }

    /// Same as [`Covenant::verify`] but reports why the covenant rejected.
    ///
    /// Interpreter errors are returned as they occurred; a final stack that is
    /// not exactly one true element yields [`ScriptError::ScriptFailed`].
    pub fn verify_detailed(&self, input_stack: &[Vec<u8>]) -> Result<(), ScriptError> {
        self.verify_with_checker(input_stack, &DEFAULT_CHECKER)
    }

    pub fn verify_with_checker(
        &self,
        input_stack: &[Vec<u8>],
        checker: &dyn SignatureChecker,
    ) -> Result<(), ScriptError> {
        let stack = ScriptStack::from_items(input_stack.to_vec())?;
        let result = Interpreter::new(&self.script)
            .with_stack(stack)
            .with_checker(checker)
            .with_limits(self.limits)
            .run()
            .and_then(|stack| match stack.as_slice() {
                [only] if cast_to_bool(only) => Ok(()),
                _ => Err(ScriptError::ScriptFailed),
            });
        if let Err(err) = result {
            debug!(error = %err, "covenant rejected input");
        }
        result
    }
}
