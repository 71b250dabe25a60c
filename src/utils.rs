//! Utility functions for offthread

use sha2::{Digest, Sha256};

/// Length of generated cache keys in hex characters
const CACHE_KEY_LEN: usize = 32;

/// Derive a stable cache key from an identifier and an optional variant label
///
/// The key is the first 32 hex characters of the SHA-256 digest of
/// `"<identifier>:<variant>"`. An empty variant hashes the identifier alone,
/// so `cache_key("abc", "")` and a caller that never uses variants agree.
pub fn cache_key(identifier: &str, variant: &str) -> String {
    let material = if variant.is_empty() {
        identifier.to_string()
    } else {
        format!("{identifier}:{variant}")
    };

    let digest = Sha256::digest(material.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(CACHE_KEY_LEN);
    key
}

/// Pick a file extension for cached content
///
/// Prefers the Content-Type header, then the URL path, then a generic
/// fallback of `bin`.
pub fn file_extension_for(content_type: Option<&str>, url: &str) -> String {
    if let Some(ct) = content_type {
        // Strip any parameters like "; charset=utf-8"
        let essence = ct.split(';').next().unwrap_or(ct).trim();
        let ext = match essence {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            "video/mp4" => Some("mp4"),
            "video/webm" => Some("webm"),
            "application/json" => Some("json"),
            "text/plain" => Some("txt"),
            _ => None,
        };
        if let Some(ext) = ext {
            return ext.to_string();
        }
    }

    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(ext) = std::path::Path::new(parsed.path())
            .extension()
            .and_then(|e| e.to_str())
        {
            if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return ext.to_ascii_lowercase();
            }
        }
    }

    "bin".to_string()
}

/// Format a byte count as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_32_chars() {
        let a = cache_key("photo-12345", "large");
        let b = cache_key("photo-12345", "large");
        assert_eq!(a, b, "same inputs must produce the same key");
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_key_varies_with_identifier_and_variant() {
        let base = cache_key("photo-1", "large");
        assert_ne!(base, cache_key("photo-2", "large"));
        assert_ne!(base, cache_key("photo-1", "small"));
    }

    #[test]
    fn empty_variant_hashes_identifier_alone() {
        // "abc" with no variant must not hash "abc:" by accident
        let plain = cache_key("abc", "");
        let digest = Sha256::digest(b"abc");
        let mut expected = hex::encode(digest);
        expected.truncate(32);
        assert_eq!(plain, expected);
    }

    #[test]
    fn extension_prefers_content_type() {
        assert_eq!(
            file_extension_for(Some("image/jpeg"), "https://example.com/x.png"),
            "jpg"
        );
        assert_eq!(
            file_extension_for(Some("image/png; charset=binary"), "https://example.com/x"),
            "png"
        );
    }

    #[test]
    fn extension_falls_back_to_url_path() {
        assert_eq!(
            file_extension_for(None, "https://example.com/photos/pic.WEBP?w=400"),
            "webp"
        );
        assert_eq!(
            file_extension_for(Some("application/octet-stream"), "https://example.com/a.mp4"),
            "mp4"
        );
    }

    #[test]
    fn extension_defaults_to_bin() {
        assert_eq!(file_extension_for(None, "https://example.com/noext"), "bin");
        assert_eq!(file_extension_for(None, "not a url"), "bin");
        // Suspiciously long path "extension" is not trusted
        assert_eq!(
            file_extension_for(None, "https://example.com/file.verylongext"),
            "bin"
        );
    }

    #[test]
    fn format_bytes_picks_sensible_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
