//! SHA-256 verification of fetched blobs.

use sha2::{Digest, Sha256};

use crate::search::vector_store::StoreError;

const SHA256_PREFIX: &str = "sha256:";

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Normalize a declared checksum to 64 lowercase hex digits.
///
/// Accepts bare hex or `sha256:`-prefixed hex, in any case.
pub fn parse_checksum(declared: &str) -> Result<String, StoreError> {
    let trimmed = declared.trim();
    let digest = match trimmed.get(..SHA256_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SHA256_PREFIX) => {
            &trimmed[SHA256_PREFIX.len()..]
        }
        _ => trimmed,
    };
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidChecksum(declared.to_string()));
    }
    Ok(digest.to_ascii_lowercase())
}

pub fn verify_sha256(bytes: &[u8], declared: &str) -> Result<(), StoreError> {
    let expected = parse_checksum(declared)?;
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(StoreError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("abc")
    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn known_digest() {
        assert_eq!(sha256_hex(b"abc"), ABC);
    }

    #[test]
    fn accepts_prefixed_and_uppercase() -> Result<(), StoreError> {
        verify_sha256(b"abc", ABC)?;
        verify_sha256(b"abc", &format!("sha256:{ABC}"))?;
        verify_sha256(b"abc", &format!("  SHA256:{}  ", ABC.to_uppercase()))?;
        Ok(())
    }

    #[test]
    fn mismatch_reports_both_digests() {
        let err = verify_sha256(b"abd", ABC).unwrap_err();
        match err {
            StoreError::ChecksumMismatch { expected, actual } => {
                assert_eq!(expected, ABC);
                assert_eq!(actual, sha256_hex(b"abd"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_checksum_is_rejected() {
        let too_long = format!("{ABC}00");
        for bad in ["", "sha256:", "md5:abc", &ABC[..63], too_long.as_str()] {
            assert!(
                matches!(parse_checksum(bad), Err(StoreError::InvalidChecksum(_))),
                "accepted {bad:?}"
            );
        }
    }
}
