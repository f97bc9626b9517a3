use crate::constants::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use txledger_core::{SignatureVerifier, Transaction};

/// Ed25519 over the canonical JSON of the transaction. Key and signature are
/// lowercase or uppercase hex.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

/// Bytes a client signs: the transaction as canonical (key-sorted) JSON.
pub fn signing_bytes(tx: &Transaction) -> Result<Vec<u8>> {
    let value = serde_json::to_value(tx)?;
    Ok(serde_json::to_vec(&value)?)
}

fn decode_fixed<const N: usize>(what: &str, hex_str: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(hex_str.trim()).with_context(|| format!("{what} is not hex"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("{what} must be {N} bytes, got {}", b.len()))
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, payload: &Transaction, signature: &str, public_key: &str) -> Result<bool> {
        let key_bytes = decode_fixed::<PUBLIC_KEY_SIZE>("public key", public_key)?;
        let key = VerifyingKey::from_bytes(&key_bytes).context("invalid public key")?;
        let sig_bytes = decode_fixed::<SIGNATURE_SIZE>("signature", signature)?;
        let sig = Signature::from_bytes(&sig_bytes);
        Ok(key.verify(&signing_bytes(payload)?, &sig).is_ok())
    }
}
