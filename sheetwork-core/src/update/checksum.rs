//! SHA-256 integrity checks for downloaded packages and install scripts.
//!
//! Comparisons fail closed: a missing digest on either side never matches.

use sha2::{Digest, Sha256};

use super::error::UpdateError;

/// Computes the lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    format_sha256_hex(&Sha256::digest(data))
}

/// Formats a SHA256 hash as lowercase hex.
fn format_sha256_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compares two hex digests, ignoring case.
///
/// Returns false if either side is missing or blank.
pub fn digests_match(computed: Option<&str>, expected: Option<&str>) -> bool {
    match (computed.map(str::trim), expected.map(str::trim)) {
        (Some(computed), Some(expected)) if !computed.is_empty() && !expected.is_empty() => {
            computed.to_lowercase() == expected.to_lowercase()
        }
        _ => false,
    }
}

/// Hashes `data` off the calling thread and checks it against `expected`.
///
/// A failed hashing task counts as a mismatch.
pub async fn verify_sha256(
    data: std::sync::Arc<[u8]>,
    expected: Option<&str>,
    subject: &str,
) -> Result<(), UpdateError> {
    let computed = tokio::task::spawn_blocking(move || sha256_hex(&data))
        .await
        .ok();

    if digests_match(computed.as_deref(), expected) {
        tracing::debug!(subject, "SHA256 verified");
        Ok(())
    } else {
        tracing::warn!(
            subject,
            expected = expected.unwrap_or("<none>"),
            actual = computed.as_deref().unwrap_or("<none>"),
            "SHA256 checksum mismatch"
        );
        Err(UpdateError::ChecksumMismatch {
            subject: subject.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_sha256_hex_known_values() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digests_match_ignores_case() {
        assert!(digests_match(
            Some(EMPTY_SHA256),
            Some(&EMPTY_SHA256.to_uppercase())
        ));
    }

    #[test]
    fn test_digests_single_character_difference() {
        let mut altered = EMPTY_SHA256.to_string();
        altered.replace_range(0..1, "f");
        assert!(!digests_match(Some(EMPTY_SHA256), Some(&altered)));
    }

    #[test]
    fn test_digests_missing_values_fail_closed() {
        assert!(!digests_match(None, Some(EMPTY_SHA256)));
        assert!(!digests_match(Some(EMPTY_SHA256), None));
        assert!(!digests_match(Some(""), Some("")));
        assert!(!digests_match(Some("  "), Some(EMPTY_SHA256)));
        assert!(!digests_match(None, None));
    }

    #[tokio::test]
    async fn test_verify_sha256() {
        let data: Arc<[u8]> = Arc::from(&b"abc"[..]);
        let good = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";

        assert!(verify_sha256(data.clone(), Some(good), "package")
            .await
            .is_ok());

        let err = verify_sha256(data, Some(EMPTY_SHA256), "package")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_verify_sha256_without_expected_value() {
        let data: Arc<[u8]> = Arc::from(&b"abc"[..]);
        let result = tokio_test::block_on(verify_sha256(data, None, "install script"));
        assert!(matches!(
            result,
            Err(UpdateError::ChecksumMismatch { ref subject }) if subject == "install script"
        ));
    }
}
