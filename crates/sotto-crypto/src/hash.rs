use sha2::{Digest, Sha256};

use sotto_core::types::{Address, SignerPublicKey};

/// SHA-256 of arbitrary bytes → 32-byte digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// The address rule: the first 32 hex characters of SHA-256 over the signing
/// public key, i.e. the first 16 digest bytes.
pub fn address_from_public_key(public_key: &SignerPublicKey) -> Address {
    let digest = sha256(&public_key.0);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Address::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_truncated_hex_digest() {
        let pk = SignerPublicKey(vec![1, 2, 3, 4]);
        let addr = address_from_public_key(&pk);
        let full = sha256_hex(&pk.0);
        assert_eq!(addr.to_hex(), full[..32]);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc"), FIPS 180-2 appendix B.1.
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
