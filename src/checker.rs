//! Signature and timelock checks the interpreter delegates to its caller.
//!
//! The opcodes only define how stack elements are consumed and produced; the
//! question of whether a signature or a lock time is acceptable is answered by
//! a [`SignatureChecker`]. The default checker accepts every non-empty
//! signature and every non-negative lock time.

#[cfg(feature = "std")]
use std::sync::OnceLock;

use bitcoin::secp256k1::{
    self, schnorr::Signature as SchnorrSignature, Message, Secp256k1, XOnlyPublicKey,
};

/// BIP340 signature length without a sighash byte.
const SCHNORR_SIG_LEN: usize = 64;
/// BIP340 x-only public key length.
const XONLY_PUBKEY_LEN: usize = 32;

type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

#[cfg(feature = "std")]
static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    #[cfg(feature = "std")]
    {
        f(SECP256K1.get_or_init(Secp256k1::verification_only))
    }
    #[cfg(not(feature = "std"))]
    {
        let ctx = Secp256k1::verification_only();
        f(&ctx)
    }
}

/// Capability consulted by `OP_CHECKSIG`, `OP_CHECKSIGVERIFY`,
/// `OP_CHECKSIGADD`, `OP_CHECKLOCKTIMEVERIFY` and `OP_CHECKSEQUENCEVERIFY`.
pub trait SignatureChecker {
    /// Returns whether `sig` is an acceptable signature for `pubkey`.
    fn check_signature(&self, sig: &[u8], pubkey: &[u8]) -> bool;

    /// Returns whether the spending context satisfies an absolute lock time.
    ///
    /// Only called with non-negative values.
    fn check_lock_time(&self, _lock_time: i64) -> bool {
        true
    }

    /// Returns whether the spending context satisfies a relative lock time.
    ///
    /// Only called with non-negative values.
    fn check_sequence(&self, _sequence: i64) -> bool {
        true
    }
}

/// Treats any non-empty signature as valid. No cryptography is performed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NonEmptySignatureChecker;

impl SignatureChecker for NonEmptySignatureChecker {
    fn check_signature(&self, sig: &[u8], _pubkey: &[u8]) -> bool {
        !sig.is_empty()
    }
}

pub(crate) static DEFAULT_CHECKER: NonEmptySignatureChecker = NonEmptySignatureChecker;

/// Verifies BIP340 Schnorr signatures against a fixed message digest.
///
/// Computing the digest (a sighash) is the caller's job. A 65-byte signature
/// must end in a defined Taproot sighash type (`0x01..=0x03` or
/// `0x81..=0x83`); the digest is not recomputed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchnorrSignatureChecker {
    message: Message,
}

impl SchnorrSignatureChecker {
    pub fn new(digest: [u8; 32]) -> Self {
        Self {
            message: Message::from_digest(digest),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
}

impl SignatureChecker for SchnorrSignatureChecker {
    fn check_signature(&self, sig: &[u8], pubkey: &[u8]) -> bool {
        let sig_bytes = match sig.len() {
            SCHNORR_SIG_LEN => sig,
            len if len == SCHNORR_SIG_LEN + 1
                && matches!(sig[SCHNORR_SIG_LEN], 0x01..=0x03 | 0x81..=0x83) =>
            {
                &sig[..SCHNORR_SIG_LEN]
            }
            _ => return false,
        };
        if pubkey.len() != XONLY_PUBKEY_LEN {
            return false;
        }

        let Ok(signature) = SchnorrSignature::from_slice(sig_bytes) else {
            return false;
        };
        let Ok(pubkey) = XOnlyPublicKey::from_slice(pubkey) else {
            return false;
        };

        with_secp256k1_verification_ctx(|secp| {
            secp.verify_schnorr(&signature, &self.message, &pubkey).is_ok()
        })
    }
}
