//! Canonical serialization — the byte form every protocol hash is computed
//! over. Independent of the wire encoding: two implementations that agree on
//! this module agree on every transaction and block hash.
//!
//! Rules:
//! - compact JSON (no whitespace), object keys in ascending lexicographic
//!   order;
//! - byte strings (addresses, keys, signatures) as lowercase hex strings;
//! - amounts, indices, nonces and timestamps as decimal integers;
//! - absent optional fields as `null`.
//!
//! The transaction *signing* preimage omits the `signature` field. The block
//! preimage embeds each transaction in full, signature included.

use serde_json::{json, Value};

use crate::transaction::Transaction;

fn tx_value(tx: &Transaction, include_signature: bool) -> Value {
    // `serde_json::Map` is backed by a BTreeMap, so the emitted key order is
    // lexicographic regardless of insertion order here.
    let mut value = json!({
        "amount": tx.amount,
        "content": tx.content,
        "recipient": tx.recipient.to_hex(),
        "sender": tx.sender.as_ref().map(|a| a.to_hex()),
        "signer_public_key": tx.signer_public_key.as_ref().map(|k| k.to_hex()),
    });
    if include_signature {
        value["signature"] = json!(tx.signature.as_ref().map(|s| s.to_hex()));
    }
    value
}

/// Preimage hashed to obtain the transaction hash (and therefore the bytes a
/// sender signs). The signature itself is excluded.
pub fn transaction_preimage(tx: &Transaction) -> String {
    tx_value(tx, false).to_string()
}

/// Preimage hashed to obtain a block hash. Transactions appear in block
/// order, serialized in full.
pub fn block_preimage(
    index: u64,
    previous_hash: &str,
    timestamp: u64,
    transactions: &[Transaction],
    nonce: u64,
) -> String {
    let txs: Vec<Value> = transactions.iter().map(|tx| tx_value(tx, true)).collect();
    json!({
        "index": index,
        "nonce": nonce,
        "previous_hash": previous_hash,
        "timestamp": timestamp,
        "transactions": txs,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Signature, SignerPublicKey};

    fn sample_tx() -> Transaction {
        Transaction {
            sender: Some(Address::from_bytes([0x11; 16])),
            recipient: Address::from_bytes([0x22; 16]),
            amount: 7,
            content: "hi".into(),
            signer_public_key: Some(SignerPublicKey(vec![0xaa, 0xbb])),
            signature: Some(Signature(vec![0xcc])),
        }
    }

    #[test]
    fn transaction_preimage_is_stable() {
        let expected = concat!(
            "{\"amount\":7,\"content\":\"hi\",",
            "\"recipient\":\"22222222222222222222222222222222\",",
            "\"sender\":\"11111111111111111111111111111111\",",
            "\"signer_public_key\":\"aabb\"}",
        );
        assert_eq!(transaction_preimage(&sample_tx()), expected);
    }

    #[test]
    fn signature_never_reaches_the_signing_preimage() {
        let mut tx = sample_tx();
        let before = transaction_preimage(&tx);
        tx.signature = Some(Signature(vec![0xde, 0xad]));
        assert_eq!(transaction_preimage(&tx), before);
    }

    #[test]
    fn coinbase_fields_serialize_as_null() {
        let tx = Transaction::coinbase(Address::from_bytes([0x33; 16]));
        let preimage = transaction_preimage(&tx);
        assert!(preimage.contains("\"sender\":null"));
        assert!(preimage.contains("\"signer_public_key\":null"));
    }

    #[test]
    fn block_preimage_is_stable() {
        let expected = concat!(
            "{\"index\":1,\"nonce\":42,\"previous_hash\":\"0\",\"timestamp\":9,",
            "\"transactions\":[{\"amount\":7,\"content\":\"hi\",",
            "\"recipient\":\"22222222222222222222222222222222\",",
            "\"sender\":\"11111111111111111111111111111111\",",
            "\"signature\":\"cc\",\"signer_public_key\":\"aabb\"}]}",
        );
        assert_eq!(block_preimage(1, "0", 9, &[sample_tx()], 42), expected);
    }
}
