//! Tagged wire messages carried inside frames.
//!
//! A payload begins with one of the ASCII tags below followed by a
//! tag-specific body: JSON for chain/block/transaction bodies, decimal ASCII
//! for ports, nothing for pure requests. A payload starting with no known
//! tag is an opaque raw message, forwarded unchanged by gossip. Tags are
//! matched longest-first so `REQUEST_CHAIN_LENGTH` never classifies as
//! `REQUEST_CHAIN`.

use sotto_core::{Block, Transaction};

use crate::error::P2pError;

pub const TAG_INCOME_PORT: &[u8] = b"INCOME_PORT";
pub const TAG_REQUEST_CHAIN_LENGTH: &[u8] = b"REQUEST_CHAIN_LENGTH";
pub const TAG_REQUEST_CHAIN: &[u8] = b"REQUEST_CHAIN";
pub const TAG_BLOCKCHAIN: &[u8] = b"BLOCKCHAIN";
pub const TAG_NEW_BLOCK: &[u8] = b"NEW_BLOCK";
pub const TAG_NEW_TRANSACTION: &[u8] = b"NEW_TRANSACTION";
pub const TAG_REQUEST_PUBLIC_KEY: &[u8] = b"REQUEST_PUBLIC_KEY";

#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// The dialing peer announces the port it listens on, so the acceptor
    /// can gossip back to it later.
    IncomePort(u16),
    /// Ask for the peer's full chain; answered with `Blockchain`.
    RequestChain,
    /// Ask for the peer's chain length; answered with a raw decimal body.
    RequestChainLength,
    /// A full serialized chain.
    Blockchain(Vec<Block>),
    /// Gossip of a freshly mined or accepted block.
    NewBlock(Block),
    /// Gossip of a pending transaction.
    NewTransaction(Transaction),
    /// Ask for the peer's signing public key; answered with a raw PEM body.
    RequestPublicKey,
    /// Anything without a known tag. Forwarded as-is.
    Raw(Vec<u8>),
}

impl WireMessage {
    pub fn encode(&self) -> Vec<u8> {
        fn tagged(tag: &[u8], body: &[u8]) -> Vec<u8> {
            let mut out = Vec::with_capacity(tag.len() + body.len());
            out.extend_from_slice(tag);
            out.extend_from_slice(body);
            out
        }

        match self {
            WireMessage::IncomePort(port) => tagged(TAG_INCOME_PORT, port.to_string().as_bytes()),
            WireMessage::RequestChain => TAG_REQUEST_CHAIN.to_vec(),
            WireMessage::RequestChainLength => TAG_REQUEST_CHAIN_LENGTH.to_vec(),
            WireMessage::Blockchain(blocks) => tagged(
                TAG_BLOCKCHAIN,
                &serde_json::to_vec(blocks).unwrap_or_default(),
            ),
            WireMessage::NewBlock(block) => tagged(TAG_NEW_BLOCK, &block.to_json_bytes()),
            WireMessage::NewTransaction(tx) => tagged(TAG_NEW_TRANSACTION, &tx.to_json_bytes()),
            WireMessage::RequestPublicKey => TAG_REQUEST_PUBLIC_KEY.to_vec(),
            WireMessage::Raw(bytes) => bytes.clone(),
        }
    }

    /// Classify a frame payload. Unknown tags become `Raw`; a known tag with
    /// an undecodable body is an error (the frame is dropped, the peer
    /// kept).
    pub fn decode(payload: &[u8]) -> Result<Self, P2pError> {
        fn body<'a>(payload: &'a [u8], tag: &[u8]) -> &'a [u8] {
            &payload[tag.len()..]
        }

        if payload.starts_with(TAG_INCOME_PORT) {
            let text = std::str::from_utf8(body(payload, TAG_INCOME_PORT)).map_err(|e| {
                P2pError::MalformedPayload {
                    tag: "INCOME_PORT",
                    reason: e.to_string(),
                }
            })?;
            let port = text
                .trim()
                .parse::<u16>()
                .map_err(|e| P2pError::MalformedPayload {
                    tag: "INCOME_PORT",
                    reason: e.to_string(),
                })?;
            Ok(WireMessage::IncomePort(port))
        } else if payload.starts_with(TAG_REQUEST_CHAIN_LENGTH) {
            Ok(WireMessage::RequestChainLength)
        } else if payload.starts_with(TAG_REQUEST_PUBLIC_KEY) {
            Ok(WireMessage::RequestPublicKey)
        } else if payload.starts_with(TAG_REQUEST_CHAIN) {
            Ok(WireMessage::RequestChain)
        } else if payload.starts_with(TAG_BLOCKCHAIN) {
            let blocks = serde_json::from_slice(body(payload, TAG_BLOCKCHAIN)).map_err(|e| {
                P2pError::MalformedPayload {
                    tag: "BLOCKCHAIN",
                    reason: e.to_string(),
                }
            })?;
            Ok(WireMessage::Blockchain(blocks))
        } else if payload.starts_with(TAG_NEW_BLOCK) {
            let block = Block::from_json_bytes(body(payload, TAG_NEW_BLOCK)).map_err(|e| {
                P2pError::MalformedPayload {
                    tag: "NEW_BLOCK",
                    reason: e.to_string(),
                }
            })?;
            Ok(WireMessage::NewBlock(block))
        } else if payload.starts_with(TAG_NEW_TRANSACTION) {
            let tx = Transaction::from_json_bytes(body(payload, TAG_NEW_TRANSACTION)).map_err(
                |e| P2pError::MalformedPayload {
                    tag: "NEW_TRANSACTION",
                    reason: e.to_string(),
                },
            )?;
            Ok(WireMessage::NewTransaction(tx))
        } else {
            Ok(WireMessage::Raw(payload.to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sotto_core::types::Address;

    fn round_trip(msg: WireMessage) {
        let decoded = WireMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn every_variant_round_trips() {
        round_trip(WireMessage::IncomePort(12345));
        round_trip(WireMessage::RequestChain);
        round_trip(WireMessage::RequestChainLength);
        round_trip(WireMessage::RequestPublicKey);
        round_trip(WireMessage::Blockchain(vec![Block::genesis()]));
        round_trip(WireMessage::NewBlock(Block::genesis()));
        round_trip(WireMessage::NewTransaction(Transaction::coinbase(
            Address::from_bytes([1; 16]),
        )));
        round_trip(WireMessage::Raw(b"hello everyone".to_vec()));
    }

    #[test]
    fn chain_length_request_wins_over_its_prefix() {
        let msg = WireMessage::decode(b"REQUEST_CHAIN_LENGTH").unwrap();
        assert_eq!(msg, WireMessage::RequestChainLength);
        let msg = WireMessage::decode(b"REQUEST_CHAIN").unwrap();
        assert_eq!(msg, WireMessage::RequestChain);
    }

    #[test]
    fn unknown_tag_is_raw() {
        let msg = WireMessage::decode(b"HELLO world").unwrap();
        assert_eq!(msg, WireMessage::Raw(b"HELLO world".to_vec()));
    }

    #[test]
    fn known_tag_with_bad_body_is_an_error() {
        assert!(WireMessage::decode(b"NEW_BLOCK{not json").is_err());
        assert!(WireMessage::decode(b"NEW_TRANSACTION[]").is_err());
        assert!(WireMessage::decode(b"INCOME_PORT99999999").is_err());
        assert!(WireMessage::decode(b"INCOME_PORTabc").is_err());
    }
}
