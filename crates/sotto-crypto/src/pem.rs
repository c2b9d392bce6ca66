//! Minimal PEM framing for public keys crossing the wire in
//! `REQUEST_PUBLIC_KEY` replies.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const BEGIN: &str = "-----BEGIN PUBLIC KEY-----";
const END: &str = "-----END PUBLIC KEY-----";

/// Wrap raw key bytes in a PEM PUBLIC KEY envelope, base64 body folded at 64
/// columns.
pub fn encode_public_key(bytes: &[u8]) -> String {
    let body = STANDARD.encode(bytes);
    let mut out = String::with_capacity(body.len() + 64);
    out.push_str(BEGIN);
    out.push('\n');
    for chunk in body.as_bytes().chunks(64) {
        // base64 output is ASCII.
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(END);
    out.push('\n');
    out
}

/// Extract the raw key bytes from a PEM PUBLIC KEY envelope. `None` when the
/// markers or the base64 body are malformed.
pub fn decode_public_key(pem: &str) -> Option<Vec<u8>> {
    let start = pem.find(BEGIN)? + BEGIN.len();
    let end = pem.find(END)?;
    let body: String = pem
        .get(start..end)?
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD.decode(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = vec![0u8, 1, 2, 250, 251, 252];
        let pem = encode_public_key(&key);
        assert!(pem.starts_with(BEGIN));
        assert!(pem.trim_end().ends_with(END));
        assert_eq!(decode_public_key(&pem).unwrap(), key);
    }

    #[test]
    fn long_keys_fold_and_still_decode() {
        let key = vec![0xabu8; 1312];
        let pem = encode_public_key(&key);
        assert!(pem.lines().all(|l| l.len() <= 64));
        assert_eq!(decode_public_key(&pem).unwrap(), key);
    }

    #[test]
    fn garbage_decodes_to_none() {
        assert!(decode_public_key("no markers here").is_none());
        assert!(decode_public_key("-----BEGIN PUBLIC KEY-----\n!!!\n-----END PUBLIC KEY-----").is_none());
    }
}
