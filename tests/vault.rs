use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use cato::{
    build_witness_script, generate_script, SchnorrSignatureChecker, ScriptError,
    TransactionVerifier, Vault, VaultCommitments, VaultConfig, VaultError, VaultState,
    VaultWitness, VerifyResult,
};

const SIGHASH: [u8; 32] = [0x5c; 32];
const STATE_PREFIX: [u8; 32] = [0x07; 32];
const OUTPUT_DATA: &[u8] = b"vault output commitment";

struct Keys {
    cold: Keypair,
    hot: Keypair,
    recovery: Keypair,
}

fn keypair(seed: u8) -> Keypair {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[seed; 32]).expect("valid secret key");
    Keypair::from_secret_key(&secp, &sk)
}

fn keys() -> Keys {
    Keys {
        cold: keypair(0x01),
        hot: keypair(0x02),
        recovery: keypair(0x03),
    }
}

fn xonly(keypair: &Keypair) -> [u8; 32] {
    keypair.x_only_public_key().0.serialize()
}

fn sign(keypair: &Keypair) -> Vec<u8> {
    let secp = Secp256k1::new();
    secp.sign_schnorr_no_aux_rand(&Message::from_digest(SIGHASH), keypair)
        .serialize()
        .to_vec()
}

fn vault(keys: &Keys) -> Vault {
    Vault::new(VaultConfig {
        timelock_blocks: 144,
        cold_pubkey: xonly(&keys.cold),
        hot_pubkey: xonly(&keys.hot),
        recovery_pubkey: xonly(&keys.recovery),
        amount_sats: 50_000,
    })
    .with_commitments(VaultCommitments::for_output(STATE_PREFIX, OUTPUT_DATA))
}

fn witness(vault: &Vault, signature: Vec<u8>, next_state: VaultState, height: u32) -> VaultWitness {
    VaultWitness {
        signature,
        current_height: height,
        pending_since: 100,
        next_state,
        output_script: vault.generate_script(),
    }
}

#[test]
fn full_lifecycle_with_schnorr_signatures() {
    let keys = keys();
    let vault = vault(&keys);
    let checker = SchnorrSignatureChecker::new(SIGHASH);
    let verifier = TransactionVerifier::new().with_checker(&checker);

    let cold_sig = sign(&keys.cold);
    let unvault = witness(&vault, cold_sig, VaultState::Pending, 90);
    let state = vault
        .authorize_spend(
            VaultState::Cold,
            &unvault,
            OUTPUT_DATA,
            &verifier,
        )
        .expect("cold key unvaults");
    assert_eq!(state, VaultState::Pending);

    let hot_sig = sign(&keys.hot);
    let withdraw = witness(&vault, hot_sig, VaultState::Hot, 250);
    let state = vault
        .authorize_spend(state, &withdraw, OUTPUT_DATA, &verifier)
        .expect("hot key withdraws after timelock");
    assert_eq!(state, VaultState::Hot);
    assert!(state.is_terminal());
}

#[test]
fn wrong_key_is_rejected_by_the_witness_script() {
    let keys = keys();
    let vault = vault(&keys);
    let checker = SchnorrSignatureChecker::new(SIGHASH);
    let verifier = TransactionVerifier::new().with_checker(&checker);

    // The hot key cannot authorize the cancel path.
    let hot_sig = sign(&keys.hot);
    let cancel = witness(&vault, hot_sig, VaultState::Cancelled, 120);
    assert_eq!(
        vault.authorize_spend(
            VaultState::Pending,
            &cancel,
            OUTPUT_DATA,
            &verifier
        ),
        Err(VaultError::Script(VerifyResult::VmError(
            ScriptError::ScriptFailed
        )))
    );

    let recovery_sig = sign(&keys.recovery);
    let cancel = witness(&vault, recovery_sig, VaultState::Cancelled, 120);
    assert_eq!(
        vault.authorize_spend(
            VaultState::Pending,
            &cancel,
            OUTPUT_DATA,
            &verifier
        ),
        Ok(VaultState::Cancelled)
    );
}

#[test]
fn timelock_scenarios() {
    let keys = keys();
    let vault = vault(&keys);
    let sig = sign(&keys.hot);

    assert_eq!(
        vault.transition(
            VaultState::Pending,
            &witness(&vault, sig.clone(), VaultState::Hot, 250)
        ),
        Ok(VaultState::Hot)
    );
    assert_eq!(
        vault.transition(
            VaultState::Pending,
            &witness(&vault, sig, VaultState::Hot, 200)
        ),
        Err(VaultError::TimelockNotExpired {
            elapsed: 100,
            required: 144
        })
    );
}

#[test]
fn policy_rejections() {
    let keys = keys();
    let vault = vault(&keys);
    let sig = sign(&keys.cold);

    assert_eq!(
        vault.transition(
            VaultState::Hot,
            &witness(&vault, sig.clone(), VaultState::Cold, 500)
        ),
        Err(VaultError::InvalidTransition {
            from: VaultState::Hot,
            to: VaultState::Cold
        })
    );
    assert_eq!(
        vault.transition(
            VaultState::Cold,
            &witness(&vault, Vec::new(), VaultState::Pending, 500)
        ),
        Err(VaultError::MissingSignature)
    );

    let mut escape = witness(&vault, sig, VaultState::Pending, 500);
    escape.output_script = generate_script(vault.config(), &VaultCommitments::placeholder());
    assert_eq!(
        vault.transition(VaultState::Cold, &escape),
        Err(VaultError::NotRecursive)
    );
}

#[test]
fn script_hash_commits_to_configuration() {
    let keys = keys();
    let vault = vault(&keys);
    assert_eq!(vault.script_hash(), cato::sha256(&vault.generate_script()));

    let other = Vault::new(*vault.config());
    assert_ne!(other.script_hash(), vault.script_hash());

    let cold = build_witness_script(
        vault.config(),
        vault.commitments(),
        VaultState::Cold,
        VaultState::Pending,
    )
    .unwrap();
    assert_eq!(cold, vault.generate_script());
}

#[test]
fn errors_render_for_operators() {
    let err = VaultError::TimelockNotExpired {
        elapsed: 100,
        required: 144,
    };
    assert_eq!(
        err.to_string(),
        "timelock not expired: 100 of 144 blocks elapsed"
    );
    assert_eq!(
        VaultError::InvalidTransition {
            from: VaultState::Hot,
            to: VaultState::Cold
        }
        .to_string(),
        "invalid vault transition from hot to cold"
    );
}
