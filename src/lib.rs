#![cfg_attr(not(feature = "std"), no_std)]
//! Script interpreter with `OP_CAT` and Tapscript-era opcodes.
//!
//! The crate executes a Bitcoin-Script-like bytecode over a bounded stack and
//! layers two acceptance rules on top of the result: [`Covenant`] (exactly one
//! true element left) and [`TransactionVerifier`] (true top element). A
//! recursive [`Vault`] uses those rules to authorize state transitions.
//!
//! Signature and timelock checks are delegated to a [`SignatureChecker`]; the
//! default accepts any non-empty signature without cryptography.

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

mod checker;
mod covenant;
mod num;
mod script;
mod sha256;
mod tx;
mod vault;

pub use checker::{NonEmptySignatureChecker, SchnorrSignatureChecker, SignatureChecker};
pub use covenant::Covenant;
pub use num::{cast_to_bool, decode_num, encode_num};
pub use script::{
    ExecutionFailure, ExecutionLimits, Interpreter, ScriptError, ScriptStack, MAX_SCRIPT_ELEMENT_SIZE,
    MAX_STACK_SIZE,
};
pub use sha256::{sha256, DIGEST_LEN};
pub use tx::{TransactionVerifier, VerifyResult, WitnessError};
pub use vault::{
    build_witness_script, generate_script, Vault, VaultCommitments, VaultConfig, VaultError,
    VaultState, VaultWitness, PUBKEY_LEN,
};

/// Runs `script` on an empty stack with the default checker.
pub fn execute(script: &[u8]) -> Result<ScriptStack, ScriptError> {
    Interpreter::new(script).run()
}

/// Runs `script` with `initial_stack` (bottom to top) as the main stack.
pub fn execute_with_stack(
    script: &[u8],
    initial_stack: Vec<Vec<u8>>,
) -> Result<ScriptStack, ScriptError> {
    let stack = ScriptStack::from_items(initial_stack)?;
    Interpreter::new(script).with_stack(stack).run()
}

/// Same as [`TransactionVerifier::verify_input`] with the default verifier.
pub fn verify_input(script: &[u8], witness_stack: &[Vec<u8>]) -> VerifyResult {
    TransactionVerifier::new().verify_input(script, witness_stack)
}

/// Runs each script on an empty stack and records its final stack depth, or
/// `-1` if execution failed.
///
/// The output depends only on the scripts, so it can be hashed and handed to
/// an external proof system.
pub fn execution_outputs<'s>(scripts: impl IntoIterator<Item = &'s [u8]>) -> Vec<i64> {
    scripts
        .into_iter()
        .map(|script| match execute(script) {
            Ok(stack) => stack.len() as i64,
            Err(_) => -1,
        })
        .collect()
}
