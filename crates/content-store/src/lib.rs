//! Content-addressed storage for wallpaper images.
//!
//! Files are keyed by the SHA-256 hex digest of their contents and laid out
//! as `<root>/<hash[0:2]>/<hash[2:4]>/<hash>.<ext>`. An entry is written once;
//! saving the same key again returns the existing path untouched.

mod hash;
mod store;

pub use hash::{DIGEST_HEX_LEN, hash_bytes, hash_file, hash_reader, is_valid_digest};
pub use store::{ContentStore, default_root};

/// Errors produced by the content store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error("cache directory not available")]
    NoCacheDir,
}
