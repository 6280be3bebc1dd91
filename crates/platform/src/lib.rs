//! Desktop wallpaper backends.
//!
//! [`detect`] picks the backend for the running OS and session; anything
//! without a backend gets [`Unsupported`], which reports
//! [`WallpaperError::NotSupported`] for both operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use wallstream_sync::{WallpaperError, WallpaperPort};

#[cfg(target_os = "windows")]
#[path = "windows.rs"]
mod backend;

#[cfg(target_os = "linux")]
#[path = "gnome_linux.rs"]
mod backend;

/// Backend for platforms without wallpaper support.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl WallpaperPort for Unsupported {
    fn current(&self) -> Result<PathBuf, WallpaperError> {
        Err(WallpaperError::NotSupported)
    }

    fn set(&self, _path: &Path) -> Result<(), WallpaperError> {
        Err(WallpaperError::NotSupported)
    }
}

/// Returns the wallpaper backend for this machine.
#[cfg(target_os = "windows")]
pub fn detect() -> Arc<dyn WallpaperPort> {
    info!(backend = "windows", "wallpaper backend selected");
    Arc::new(backend::Windows)
}

/// Returns the wallpaper backend for this machine.
#[cfg(target_os = "linux")]
pub fn detect() -> Arc<dyn WallpaperPort> {
    let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
    if backend::is_gnome_session(&desktop) {
        info!(backend = "gnome", %desktop, "wallpaper backend selected");
        Arc::new(backend::Gnome)
    } else {
        info!(%desktop, "no wallpaper backend for this desktop");
        Arc::new(Unsupported)
    }
}

/// Returns the wallpaper backend for this machine.
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub fn detect() -> Arc<dyn WallpaperPort> {
    info!(os = std::env::consts::OS, "no wallpaper backend for this OS");
    Arc::new(Unsupported)
}
