//! Recursive vault.
//!
//! Funds move Cold → Pending → Hot after a timelock, or Pending → Cancelled
//! with the recovery key. Each transition is authorized by a script built from
//! the [`VaultConfig`], and the spending output must re-commit to the vault's
//! own script, which is what makes the covenant recursive.
//!
//! Persisting the current state is the caller's responsibility; every check
//! here is a pure function of its inputs.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

use bitcoin::{opcodes::all::*, Amount};
use tracing::debug;

use crate::{
    num::encode_num,
    sha256::{sha256, DIGEST_LEN},
    tx::{TransactionVerifier, VerifyResult},
};

/// Length of the x-only public keys embedded in vault scripts.
pub const PUBKEY_LEN: usize = 32;

/// Parameters of a vault. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultConfig {
    /// Blocks that must pass between entering Pending and moving to Hot.
    pub timelock_blocks: u32,
    pub cold_pubkey: [u8; PUBKEY_LEN],
    pub hot_pubkey: [u8; PUBKEY_LEN],
    pub recovery_pubkey: [u8; PUBKEY_LEN],
    pub amount_sats: u64,
}

impl VaultConfig {
    pub fn amount(&self) -> Amount {
        Amount::from_sat(self.amount_sats)
    }
}

/// Commitment bytes embedded in the vault scripts.
///
/// The script concatenates `state_prefix` with the spender-supplied output
/// data and requires the SHA-256 of the result to equal `output_hash`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VaultCommitments {
    pub state_prefix: [u8; DIGEST_LEN],
    pub output_hash: [u8; DIGEST_LEN],
}

impl VaultCommitments {
    /// All-zero commitments, for building scripts before real values exist.
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// Commitments that accept exactly `output_data` as the spender's
    /// output data.
    pub fn for_output(state_prefix: [u8; DIGEST_LEN], output_data: &[u8]) -> Self {
        let mut preimage = Vec::with_capacity(DIGEST_LEN + output_data.len());
        preimage.extend_from_slice(&state_prefix);
        preimage.extend_from_slice(output_data);
        Self {
            state_prefix,
            output_hash: sha256(&preimage),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VaultState {
    Cold,
    Pending,
    Hot,
    Cancelled,
}

impl VaultState {
    pub fn can_transition_to(self, next: VaultState) -> bool {
        use VaultState::*;

        matches!(
            (self, next),
            (Cold, Pending) | (Pending, Hot) | (Pending, Cancelled)
        )
    }

    /// Hot and Cancelled have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, VaultState::Hot | VaultState::Cancelled)
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VaultState::Cold => "cold",
            VaultState::Pending => "pending",
            VaultState::Hot => "hot",
            VaultState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Data supplied with one proposed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultWitness {
    pub signature: Vec<u8>,
    pub current_height: u32,
    /// Height at which the vault entered Pending.
    pub pending_since: u32,
    pub next_state: VaultState,
    /// Script of the spending transaction's output.
    pub output_script: Vec<u8>,
}

/// Policy rejections of a proposed transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VaultError {
    InvalidTransition { from: VaultState, to: VaultState },
    TimelockNotExpired { elapsed: u32, required: u32 },
    /// The output script does not re-commit to the vault script.
    NotRecursive,
    MissingSignature,
    /// The transition's witness script did not accept the witness stack.
    Script(VerifyResult),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::InvalidTransition { from, to } => {
                write!(f, "invalid vault transition from {from} to {to}")
            }
            VaultError::TimelockNotExpired { elapsed, required } => write!(
                f,
                "timelock not expired: {elapsed} of {required} blocks elapsed"
            ),
            VaultError::NotRecursive => f.write_str("output does not re-commit to the vault script"),
            VaultError::MissingSignature => f.write_str("missing signature"),
            VaultError::Script(verdict) => write!(f, "witness script rejected: {verdict}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VaultError {}

/// Builds the vault's base script, locked to the cold key.
///
/// Expects the stack `sig output_data` and leaves a single `1`.
pub fn generate_script(config: &VaultConfig, commitments: &VaultCommitments) -> Vec<u8> {
    let mut script = Vec::with_capacity(3 * (2 + DIGEST_LEN) + 8);
    push_commitment_check(&mut script, commitments);
    push_signature_check(&mut script, &config.cold_pubkey);
    script
}

/// Builds the script that authorizes the `from` → `to` transition.
///
/// Cold → Pending uses the cold key, Pending → Hot the hot key behind
/// `<timelock_blocks> OP_CHECKLOCKTIMEVERIFY OP_DROP`, and Pending →
/// Cancelled the recovery key.
pub fn build_witness_script(
    config: &VaultConfig,
    commitments: &VaultCommitments,
    from: VaultState,
    to: VaultState,
) -> Result<Vec<u8>, VaultError> {
    use VaultState::*;

    let mut script = Vec::with_capacity(3 * (2 + DIGEST_LEN) + 16);
    let pubkey = match (from, to) {
        (Cold, Pending) => &config.cold_pubkey,
        (Pending, Hot) => {
            push_num(&mut script, i64::from(config.timelock_blocks));
            script.push(OP_CLTV.to_u8());
            script.push(OP_DROP.to_u8());
            &config.hot_pubkey
        }
        (Pending, Cancelled) => &config.recovery_pubkey,
        _ => return Err(VaultError::InvalidTransition { from, to }),
    };
    push_commitment_check(&mut script, commitments);
    push_signature_check(&mut script, pubkey);
    Ok(script)
}

/// `<prefix> SWAP CAT SHA256 <output_hash> EQUALVERIFY`
fn push_commitment_check(script: &mut Vec<u8>, commitments: &VaultCommitments) {
    push_data1(script, &commitments.state_prefix);
    script.push(OP_SWAP.to_u8());
    script.push(OP_CAT.to_u8());
    script.push(OP_SHA256.to_u8());
    push_data1(script, &commitments.output_hash);
    script.push(OP_EQUALVERIFY.to_u8());
}

/// `<pubkey> CHECKSIGVERIFY 1`. The result does not depend on the signature
/// bytes, so any signature the checker accepts leaves a true stack.
fn push_signature_check(script: &mut Vec<u8>, pubkey: &[u8; PUBKEY_LEN]) {
    push_data1(script, pubkey);
    script.push(OP_CHECKSIGVERIFY.to_u8());
    script.push(OP_PUSHNUM_1.to_u8());
}

fn push_data1(script: &mut Vec<u8>, data: &[u8; 32]) {
    script.push(OP_PUSHDATA1.to_u8());
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

fn push_num(script: &mut Vec<u8>, value: i64) {
    let encoded = encode_num(value);
    // A script number from a u32 is at most five bytes, always a direct push.
    script.push(encoded.len() as u8);
    script.extend_from_slice(&encoded);
}

/// A vault bound to its configuration and script commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    config: VaultConfig,
    commitments: VaultCommitments,
}

impl Vault {
    /// Creates a vault whose scripts carry placeholder commitments.
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            commitments: VaultCommitments::placeholder(),
        }
    }

    pub fn with_commitments(mut self, commitments: VaultCommitments) -> Self {
        self.commitments = commitments;
        self
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn commitments(&self) -> &VaultCommitments {
        &self.commitments
    }

    pub fn generate_script(&self) -> Vec<u8> {
        generate_script(&self.config, &self.commitments)
    }

    pub fn script_hash(&self) -> [u8; DIGEST_LEN] {
        sha256(&self.generate_script())
    }

    pub fn witness_script(&self, from: VaultState, to: VaultState) -> Result<Vec<u8>, VaultError> {
        build_witness_script(&self.config, &self.commitments, from, to)
    }

    /// Validates `witness` as a transition out of `current` and returns the
    /// next state.
    ///
    /// Checks run in order: transition legality, signature presence, the
    /// Pending → Hot timelock, then the recursive output commitment.
    pub fn transition(
        &self,
        current: VaultState,
        witness: &VaultWitness,
    ) -> Result<VaultState, VaultError> {
        let next = witness.next_state;
        if !current.can_transition_to(next) {
            return Err(self.reject(VaultError::InvalidTransition {
                from: current,
                to: next,
            }));
        }
        if witness.signature.is_empty() {
            return Err(self.reject(VaultError::MissingSignature));
        }
        if (current, next) == (VaultState::Pending, VaultState::Hot) {
            // A height below `pending_since` counts as no time elapsed.
            let elapsed = witness.current_height.saturating_sub(witness.pending_since);
            if elapsed < self.config.timelock_blocks {
                return Err(self.reject(VaultError::TimelockNotExpired {
                    elapsed,
                    required: self.config.timelock_blocks,
                }));
            }
        }
        if sha256(&witness.output_script) != self.script_hash() {
            return Err(self.reject(VaultError::NotRecursive));
        }

        debug!(from = %current, to = %next, height = witness.current_height, "vault transition accepted");
        Ok(next)
    }

    /// Runs the transition's witness script over `witness.signature
    /// output_data` and, if it succeeds, applies the same policy as
    /// [`Vault::transition`].
    pub fn authorize_spend(
        &self,
        current: VaultState,
        witness: &VaultWitness,
        output_data: &[u8],
        verifier: &TransactionVerifier<'_>,
    ) -> Result<VaultState, VaultError> {
        let script = self
            .witness_script(current, witness.next_state)
            .map_err(|err| self.reject(err))?;
        let witness_stack = [witness.signature.clone(), output_data.to_vec()];
        match verifier.verify_input(&script, &witness_stack) {
            VerifyResult::Success => self.transition(current, witness),
            verdict => Err(self.reject(VaultError::Script(verdict))),
        }
    }

    fn reject(&self, error: VaultError) -> VaultError {
        debug!(error = %error, "vault transition rejected");
        error
    }
}
