use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

/// Context string fed to the KDF. Both sides must agree on it.
const KDF_INFO: &[u8] = b"sotto message key v1";

/// X25519 key-agreement identity used for sealing message content. Distinct
/// from the signing keypair; only its 32-byte public half ever leaves the
/// process.
pub struct ExchangeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ExchangeKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Agree with a peer's public key and run the result through the KDF.
    /// Symmetric: both parties derive the same 32-byte cipher key.
    pub fn shared_key(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(*peer_public));
        derive_key(shared.as_bytes())
    }
}

/// HKDF-SHA256 with no salt and a fixed info string, so the derivation is a
/// pure function of the shared secret.
pub fn derive_key(shared: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = [0u8; 32];
    hk.expand(KDF_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}
