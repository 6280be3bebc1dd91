use std::io::{ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::StoreError;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Computes SHA-256 of `data` and returns the lowercase hex digest.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Computes SHA-256 over everything `reader` yields.
///
/// Fails if the reader errors before EOF; a partial digest is never returned.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes SHA-256 of an entire file.
pub fn hash_file(path: &Path) -> Result<String, StoreError> {
    let file = std::fs::File::open(path)?;
    Ok(hash_reader(file)?)
}

/// Returns `true` for a 64-character hex string.
pub fn is_valid_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    /// Reader that fails after yielding some bytes.
    struct Failing {
        sent: bool,
    }

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::other("disk on fire"));
            }
            self.sent = true;
            buf[..3].copy_from_slice(b"abc");
            Ok(3)
        }
    }

    #[test]
    fn known_digests() {
        assert_eq!(hash_bytes(b""), EMPTY);
        assert_eq!(hash_bytes(b"abc"), ABC);
    }

    #[test]
    fn reader_matches_bytes() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let from_reader = hash_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(from_reader, hash_bytes(&data));
    }

    #[test]
    fn reader_error_is_surfaced() {
        assert!(hash_reader(Failing { sent: false }).is_err());
    }

    #[test]
    fn file_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("photo.jpg");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(hash_file(&path).unwrap(), ABC);
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = hash_file(&tmp.path().join("nope.jpg")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn digest_validation() {
        assert!(is_valid_digest(ABC));
        assert!(is_valid_digest(&ABC.to_uppercase()));
        assert!(!is_valid_digest(""));
        assert!(!is_valid_digest("abc123"));
        assert!(!is_valid_digest(&format!("{}zz", &ABC[..62])));
    }
}
