use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Bytes of leading content fed into the fingerprint.
pub const FINGERPRINT_WINDOW: usize = 1024 * 1024;

/// Hex characters of the SHA-256 prefix kept: 8 bytes of digest, which
/// bounds the collision risk of two distinct files at the same path.
const PREFIX_HEX_LEN: usize = 16;

/// Derive the stable upload id for `(path, size, first-MiB content)`.
///
/// Base64 of `"<path>|<size>|<sha256-prefix>"` with `+/=` folded to `_`, so
/// the id survives query strings and doubles as a staging directory name.
/// The same source yields the same id on every machine; that determinism is
/// what makes chunk re-submission idempotent.
pub fn upload_fingerprint(path: &str, size: u64, first_window: &[u8]) -> String {
    let digest = Sha256::digest(first_window);
    let hex_digest = hex::encode(digest);
    let raw = format!("{path}|{size}|{}", &hex_digest[..PREFIX_HEX_LEN]);
    STANDARD
        .encode(raw)
        .chars()
        .map(|c| match c {
            '+' | '/' | '=' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let window = vec![0xCDu8; 4096];
        let a = upload_fingerprint("/videos/raw.mkv", 1_000_000, &window);
        let b = upload_fingerprint("/videos/raw.mkv", 1_000_000, &window);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn fingerprint_depends_on_all_inputs() {
        let window = vec![1u8; 128];
        let base = upload_fingerprint("/a", 100, &window);
        assert_ne!(base, upload_fingerprint("/b", 100, &window));
        assert_ne!(base, upload_fingerprint("/a", 101, &window));
        assert_ne!(base, upload_fingerprint("/a", 100, &[2u8; 128]));
    }

    #[test]
    fn fingerprint_alphabet_is_query_and_path_safe() {
        // Enough input to exercise every base64 output character class.
        let window: Vec<u8> = (0..=255u8).collect();
        let id = upload_fingerprint("/some/deep/path.bin", u64::MAX, &window);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
