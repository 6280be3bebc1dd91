//! Windows backend over `SystemParametersInfoW`.

use std::ffi::OsString;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use tracing::debug;
use wallstream_sync::{WallpaperError, WallpaperPort};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    SPI_GETDESKWALLPAPER, SPI_SETDESKWALLPAPER, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE,
    SystemParametersInfoW,
};

/// Wide-char buffer for the current wallpaper path.
const PATH_BUF_LEN: usize = 1024;

pub struct Windows;

impl WallpaperPort for Windows {
    fn current(&self) -> Result<PathBuf, WallpaperError> {
        let mut buf = [0u16; PATH_BUF_LEN];
        // SAFETY: buf is valid for PATH_BUF_LEN u16 writes and outlives the call.
        let ok = unsafe {
            SystemParametersInfoW(
                SPI_GETDESKWALLPAPER,
                PATH_BUF_LEN as u32,
                buf.as_mut_ptr().cast(),
                0,
            )
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
        if len == 0 {
            // Solid color or slideshow without a file.
            return Err(WallpaperError::NotSupported);
        }
        Ok(PathBuf::from(OsString::from_wide(&buf[..len])))
    }

    fn set(&self, path: &Path) -> Result<(), WallpaperError> {
        if !path.is_absolute() {
            return Err(WallpaperError::Platform(format!(
                "wallpaper path must be absolute: {}",
                path.display()
            )));
        }

        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        // SAFETY: wide is NUL-terminated and is not written through by SPI_SETDESKWALLPAPER.
        let ok = unsafe {
            SystemParametersInfoW(
                SPI_SETDESKWALLPAPER,
                0,
                wide.as_ptr() as *mut _,
                SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
            )
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        debug!(path = %path.display(), "desktop wallpaper set");
        Ok(())
    }
}
