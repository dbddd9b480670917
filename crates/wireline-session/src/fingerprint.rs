//! Certificate fingerprint helper.
//!
//! Produces the canonical fingerprint string used for out-of-band trust
//! pinning: transports present it on connect, clients pin it in
//! [`ClientConfig::fingerprint`](crate::config::ClientConfig).

use sha2::{Digest, Sha256};

/// Canonical SHA-256 fingerprint of a DER-encoded certificate: uppercase
/// hex byte pairs joined by colons, e.g. `AB:0D:…`.
pub fn sha256_fingerprint(der: &[u8]) -> String {
    let hex = hex::encode_upper(Sha256::digest(der));
    let mut out = String::with_capacity(hex.len() + hex.len() / 2);
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push(chunk[0] as char);
        out.push(chunk[1] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_colon_separated_uppercase() {
        let fp = sha256_fingerprint(b"not a real certificate");
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert_eq!(fp.split(':').count(), 32);
        assert!(fp
            .chars()
            .all(|c| c == ':' || c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(sha256_fingerprint(b"cert"), sha256_fingerprint(b"cert"));
        assert_ne!(sha256_fingerprint(b"cert"), sha256_fingerprint(b"trec"));
    }
}
