use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical;
use crate::constants::MINING_REWARD;
use crate::error::SottoError;
use crate::types::{Address, Amount, Signature, SignerPublicKey};

/// A signed ledger record: a value transfer, an opaque (possibly sealed)
/// message from sender to recipient, or both at once.
///
/// The transaction hash is SHA-256 over the canonical preimage of every field
/// except `signature` (see `canonical`). A coinbase transaction has no
/// sender, no signer key and no signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Option<Address>,
    pub recipient: Address,
    pub amount: Amount,
    pub content: String,
    pub signer_public_key: Option<SignerPublicKey>,
    pub signature: Option<Signature>,
}

impl Transaction {
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: Amount,
        content: String,
        signer_public_key: SignerPublicKey,
    ) -> Self {
        Self {
            sender: Some(sender),
            recipient,
            amount,
            content,
            signer_public_key: Some(signer_public_key),
            signature: None,
        }
    }

    /// The miner reward record: no sender, amount fixed at `MINING_REWARD`.
    pub fn coinbase(recipient: Address) -> Self {
        Self {
            sender: None,
            recipient,
            amount: MINING_REWARD,
            content: String::new(),
            signer_public_key: None,
            signature: None,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender.is_none()
    }

    /// Lowercase hex SHA-256 of the canonical signing preimage. This is both
    /// the transaction's identity and the message its signature covers.
    pub fn hash(&self) -> String {
        let preimage = canonical::transaction_preimage(self);
        hex::encode(Sha256::digest(preimage.as_bytes()))
    }

    /// Wire encoding (§6 transaction shape).
    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, SottoError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SottoError::MalformedTransaction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 16])
    }

    #[test]
    fn hash_changes_with_any_signed_field() {
        let base = Transaction::new(
            addr(1),
            addr(2),
            10,
            "m".into(),
            SignerPublicKey(vec![1, 2, 3]),
        );
        let mut other = base.clone();
        other.amount = 11;
        assert_ne!(base.hash(), other.hash());

        let mut other = base.clone();
        other.content = "n".into();
        assert_ne!(base.hash(), other.hash());

        let mut other = base.clone();
        other.signature = Some(Signature(vec![9]));
        assert_eq!(base.hash(), other.hash());
    }

    #[test]
    fn coinbase_has_reward_amount_and_no_sender() {
        let cb = Transaction::coinbase(addr(7));
        assert!(cb.is_coinbase());
        assert_eq!(cb.amount, MINING_REWARD);
        assert!(cb.signature.is_none());
    }

    #[test]
    fn wire_round_trip() {
        let mut tx = Transaction::new(
            addr(3),
            addr(4),
            5,
            "sealed?".into(),
            SignerPublicKey(vec![0xde, 0xad]),
        );
        tx.signature = Some(Signature(vec![0xbe, 0xef]));
        let parsed = Transaction::from_json_bytes(&tx.to_json_bytes()).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(parsed.hash(), tx.hash());
    }

    #[test]
    fn parse_rejects_wrong_field_types() {
        let bad = br#"{"sender":null,"recipient":"00000000000000000000000000000000","amount":"ten","content":"","signer_public_key":null,"signature":null}"#;
        assert!(matches!(
            Transaction::from_json_bytes(bad),
            Err(SottoError::MalformedTransaction(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_address_length() {
        let bad = br#"{"sender":null,"recipient":"abcd","amount":1,"content":"","signer_public_key":null,"signature":null}"#;
        assert!(Transaction::from_json_bytes(bad).is_err());
    }
}
