//! Destination filename derivation for downloaded media.
//!
//! aria2 is told exactly what to name every file (`out` option), so the
//! rules live here rather than trusting server-side names. A URL whose last
//! path segment looks like a real filename keeps it; anything else (query
//! strings, signed CDN URLs, extensionless endpoints) gets a deterministic
//! fallback name with an extension guessed from the URL text.

/// Extensions recognized when guessing a type from URL text.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "mp3", "wav", "flac", "aac", "ogg", "m4a", "jpg", "jpeg",
    "png", "gif", "webp", "bmp", "srt", "vtt", "json",
];

/// Extension used when nothing in the URL hints at a type.
pub const DEFAULT_EXTENSION: &str = "bin";

/// Extract a usable filename from a URL's last path segment.
///
/// Returns `None` when the segment is missing, has no stem, or carries an
/// implausible extension (longer than 5 characters or non-alphanumeric),
/// which is typical of signed CDN URLs.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let segment = without_query.rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }

    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(segment.to_string())
}

/// Guess an extension by scanning the URL text for known media extensions.
///
/// Catches URLs like `.../stream?format=mp4&sig=...` where the extension
/// survives only in the query string. Falls back to [`DEFAULT_EXTENSION`].
pub fn guess_extension(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .find(|ext| lower.contains(&format!(".{ext}")))
        .copied()
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Derive the destination filename for a URL.
///
/// Prefers the URL's own filename; otherwise builds one from the caller's
/// fallback stem and a guessed extension.
pub fn derive_filename(url: &str, fallback_stem: &str) -> String {
    filename_from_url(url)
        .unwrap_or_else(|| format!("{fallback_stem}.{}", guess_extension(url)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
