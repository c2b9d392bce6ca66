use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};
use thiserror::Error;

use sotto_core::types::{Signature, SignerPublicKey};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid secret key")]
    InvalidSecretKey,
}

/// Sign `message` with a Dilithium2 secret key, producing a detached
/// signature.
pub fn sign(secret_key_bytes: &[u8], message: &[u8]) -> Result<Signature, SignatureError> {
    let sk = dilithium2::SecretKey::from_bytes(secret_key_bytes)
        .map_err(|_| SignatureError::InvalidSecretKey)?;
    let sig = dilithium2::detached_sign(message, &sk);
    Ok(Signature(sig.as_bytes().to_vec()))
}

/// Verify a detached Dilithium2 signature. Total: malformed keys or
/// signatures verify as `false`, never as an error.
pub fn verify_signature(
    public_key: &SignerPublicKey,
    message: &[u8],
    signature: &Signature,
) -> bool {
    let Ok(pk) = dilithium2::PublicKey::from_bytes(&public_key.0) else {
        return false;
    };
    let Ok(sig) = dilithium2::DetachedSignature::from_bytes(&signature.0) else {
        return false;
    };
    dilithium2::verify_detached_signature(&sig, message, &pk).is_ok()
}
