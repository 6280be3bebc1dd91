use std::path::{Path, PathBuf};

/// Errors reported by a wallpaper backend.
#[derive(Debug, thiserror::Error)]
pub enum WallpaperError {
    /// The platform (or desktop environment) cannot do this operation.
    #[error("wallpaper operation not supported on this platform")]
    NotSupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("platform error: {0}")]
    Platform(String),
}

/// Desktop wallpaper access, implemented per OS.
pub trait WallpaperPort: Send + Sync {
    /// Returns the absolute path of the current wallpaper.
    fn current(&self) -> Result<PathBuf, WallpaperError>;

    /// Sets the wallpaper from an absolute local file path.
    fn set(&self, path: &Path) -> Result<(), WallpaperError>;
}
