use std::path::{Path, PathBuf};

use tracing::debug;

use crate::StoreError;

/// Content-addressed file cache rooted at a directory.
///
/// The store trusts the caller-supplied hash as the key; it never rehashes
/// on save. Concurrent writers racing on the same key are harmless because
/// entries are immutable and land through a rename.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Opens the store at the platform cache directory, creating it.
    pub fn open_default() -> Result<Self, StoreError> {
        let root = default_root().ok_or(StoreError::NoCacheDir)?;
        std::fs::create_dir_all(&root)?;
        Ok(Self::new(root))
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the deterministic path for `(hash, ext)` without touching disk.
    pub fn entry_path(&self, hash: &str, ext: &str) -> Result<PathBuf, StoreError> {
        validate_key(hash, ext)?;
        Ok(self
            .root
            .join(&hash[..2])
            .join(&hash[2..4])
            .join(format!("{hash}.{ext}")))
    }

    /// Returns the path for `(hash, ext)`, creating the fan-out directories.
    ///
    /// The data file itself is never created or modified.
    pub fn path_for(&self, hash: &str, ext: &str) -> Result<PathBuf, StoreError> {
        let path = self.entry_path(hash, ext)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Returns `true` if a regular file exists at `path`.
    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Stores `data` under `(hash, ext)`.
    ///
    /// If the entry already exists its path is returned and nothing is written.
    pub fn save(&self, data: &[u8], hash: &str, ext: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(hash, ext)?;
        if self.exists(&path) {
            debug!(path = %path.display(), "cache hit, skipping write");
            return Ok(path);
        }

        write_once(&path, data)?;
        debug!(path = %path.display(), bytes = data.len(), "cached file");
        Ok(path)
    }

    /// Reads `src` fully and stores it under `(hash, ext)`.
    pub fn save_from_path(&self, src: &Path, hash: &str, ext: &str) -> Result<PathBuf, StoreError> {
        let data = std::fs::read(src)?;
        self.save(&data, hash, ext)
    }

    /// Returns the total size of all cached entries in bytes.
    ///
    /// Only the fan-out directories are counted; other files kept in the
    /// root (such as the agent's state file) are not cache content.
    pub fn size_bytes(&self) -> u64 {
        let mut size = 0u64;
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && is_fanout_dir(&entry.file_name().to_string_lossy()) {
                walk_dir(&path, &mut size);
            }
        }
        size
    }
}

/// Writes `data` next to `path` and renames it into place.
///
/// Losing the rename race to another writer of the same entry is fine: the
/// entry is content-addressed, so whatever landed first is kept.
fn write_once(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.tmp",
        uuid::Uuid::new_v4().simple()
    ));

    if let Err(e) = std::fs::write(&tmp, data) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            if path.is_file() {
                Ok(())
            } else {
                Err(e.into())
            }
        }
    }
}

/// Rejects keys that would not map to a fan-out path inside the root.
fn validate_key(hash: &str, ext: &str) -> Result<(), StoreError> {
    if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidKey(format!("bad hash: {hash:?}")));
    }
    if ext.is_empty() || ext.len() > 8 || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(StoreError::InvalidKey(format!("bad extension: {ext:?}")));
    }
    Ok(())
}

fn is_fanout_dir(name: &str) -> bool {
    name.len() == 2 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Recursively sums file sizes, skipping in-flight temporary files.
fn walk_dir(dir: &Path, size: &mut u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, size);
        } else if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        } else if let Ok(meta) = entry.metadata() {
            *size += meta.len();
        }
    }
}

/// Returns the platform-specific cache directory for the agent.
pub fn default_root() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("Wallstream").join("cache"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library").join("Caches").join("Wallstream"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|p| PathBuf::from(p).join("wallstream"))
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".cache").join("wallstream"))
            })
    }
}
