//! GNOME backend over `gsettings`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use tracing::debug;
use wallstream_sync::{WallpaperError, WallpaperPort};

const SCHEMA: &str = "org.gnome.desktop.background";
const KEY: &str = "picture-uri";
const KEY_DARK: &str = "picture-uri-dark";

/// Characters escaped in the path part of a `file://` URI.
const PATH_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub struct Gnome;

impl WallpaperPort for Gnome {
    fn current(&self) -> Result<PathBuf, WallpaperError> {
        let raw = gsettings(&["get", SCHEMA, KEY])?;
        parse_picture_uri(&raw).ok_or(WallpaperError::NotSupported)
    }

    fn set(&self, path: &Path) -> Result<(), WallpaperError> {
        let uri = file_uri(path)?;
        let value = format!("'{uri}'");
        gsettings(&["set", SCHEMA, KEY, &value])?;

        // Only present on GNOME 42+.
        if let Err(e) = gsettings(&["set", SCHEMA, KEY_DARK, &value]) {
            debug!(error = %e, "could not set dark-mode wallpaper");
        }

        debug!(%uri, "desktop wallpaper set");
        Ok(())
    }
}

/// Returns `true` if `XDG_CURRENT_DESKTOP` names a GNOME-based session.
pub fn is_gnome_session(desktop: &str) -> bool {
    desktop
        .split(':')
        .any(|d| matches!(d.to_ascii_lowercase().as_str(), "gnome" | "unity" | "ubuntu" | "gnome-classic"))
}

fn gsettings(args: &[&str]) -> Result<String, WallpaperError> {
    let output = Command::new("gsettings").args(args).output().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            WallpaperError::NotSupported
        } else {
            WallpaperError::Io(e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WallpaperError::Platform(format!(
            "gsettings {}: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extracts a local path from `gsettings get` output such as
/// `'file:///home/me/My%20Pictures/a.jpg'`.
fn parse_picture_uri(raw: &str) -> Option<PathBuf> {
    let value = raw.trim();
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);

    let path = match value.strip_prefix("file://") {
        Some(rest) => percent_decode_str(rest).decode_utf8().ok()?.into_owned(),
        None if value.starts_with('/') => value.to_string(),
        None => return None,
    };
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Builds the `file://` URI gsettings expects for an absolute path.
fn file_uri(path: &Path) -> Result<String, WallpaperError> {
    if !path.is_absolute() {
        return Err(WallpaperError::Platform(format!(
            "wallpaper path must be absolute: {}",
            path.display()
        )));
    }
    let s = path
        .to_str()
        .ok_or_else(|| WallpaperError::Platform("wallpaper path is not UTF-8".into()))?;
    Ok(format!("file://{}", utf8_percent_encode(s, PATH_SET)))
}
