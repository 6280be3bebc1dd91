//! Content type and file extension mapping for wallpaper images.
//!
//! Only JPEG, PNG and BMP get a dedicated extension; everything else is
//! cached as `bin`.

/// Extension used for content the cache cannot classify.
pub const FALLBACK_EXT: &str = "bin";

/// Returns `true` if the `Content-Type` header value names an image.
pub fn is_image_content_type(content_type: &str) -> bool {
    essence(content_type).starts_with("image/")
}

/// Maps a `Content-Type` value to the cache file extension.
pub fn ext_for_content_type(content_type: &str) -> &'static str {
    match essence(content_type).as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/bmp" => "bmp",
        _ => FALLBACK_EXT,
    }
}

/// Maps a cache file extension back to a `Content-Type` value.
pub fn content_type_for_ext(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Detects the image format from its leading bytes.
pub fn sniff_ext(head: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if head.starts_with(PNG) {
        Some("png")
    } else if head.starts_with(b"BM") {
        Some("bmp")
    } else {
        None
    }
}

/// Maps a file name extension (as found on disk) to the cache extension.
pub fn normalize_ext(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "jfif" => "jpg",
        "png" => "png",
        "bmp" | "dib" => "bmp",
        _ => FALLBACK_EXT,
    }
}

/// Lowercased media type without parameters (`image/png; q=1` -> `image/png`).
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
