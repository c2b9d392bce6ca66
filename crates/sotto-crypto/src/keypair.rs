use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey, SecretKey};

use sotto_core::transaction::Transaction;
use sotto_core::types::{Address, Signature, SignerPublicKey};

use crate::dilithium;
use crate::hash::address_from_public_key;

/// A node identity: Dilithium2 public + secret keys and the derived address.
///
/// The secret key is zeroized on drop. Identities are ephemeral — nothing in
/// the protocol persists, so a keypair lives exactly as long as its node.
pub struct KeyPair {
    pub address: Address,
    pub public_key: SignerPublicKey,
    secret_key: Vec<u8>,
}

impl KeyPair {
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        let public_key = SignerPublicKey(pk.as_bytes().to_vec());
        let address = address_from_public_key(&public_key);
        Self {
            address,
            public_key,
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    /// Sign `message` with this identity's secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        dilithium::sign(&self.secret_key, message)
            .expect("secret key generated by this process is well-formed")
    }

    /// Fill in `signature` over the transaction hash. The signed bytes are
    /// the ASCII hex digest, matching what the validator verifies.
    pub fn sign_transaction(&self, tx: &mut Transaction) {
        let digest = tx.hash();
        tx.signature = Some(self.sign(digest.as_bytes()));
    }

    /// Build a ready-to-gossip transfer/message transaction from this
    /// identity.
    pub fn build_transaction(&self, recipient: Address, amount: u64, content: String) -> Transaction {
        let mut tx = Transaction::new(
            self.address,
            recipient,
            amount,
            content,
            self.public_key.clone(),
        );
        self.sign_transaction(&mut tx);
        tx
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {} }}", self.address)
    }
}
