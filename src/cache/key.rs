//! Cache key and manifest fingerprint generation

use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::error::NetworkError;

/// Canonicalize a resource URL into its cache key.
///
/// Relative inputs resolve against `base`. The fragment is dropped and query
/// pairs are sorted, so `?b=2&a=1#top` and `?a=1&b=2` share one entry.
pub fn canonical_key(base: &Url, input: &str) -> Result<String, NetworkError> {
    let url = base
        .join(input)
        .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", input, e)))?;
    Ok(canonical_url(url).to_string())
}

/// Canonical form of an already-parsed URL
pub fn canonical_url(mut url: Url) -> Url {
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}

/// Fingerprint of the app-shell manifest.
///
/// SHA-256 over the sorted entries, so reordering the config does not
/// invalidate cached shell resources.
pub fn manifest_version(entries: &[String]) -> String {
    let mut sorted: Vec<&String> = entries.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }

    // 16 hex chars is plenty to tell manifests apart
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://learn.example.com/").unwrap()
    }

    #[test]
    fn test_canonical_key_sorts_query() {
        let key1 = canonical_key(&base(), "/content/a?page=2&lang=en").unwrap();
        let key2 = canonical_key(&base(), "/content/a?lang=en&page=2").unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1, "https://learn.example.com/content/a?lang=en&page=2");
    }

    #[test]
    fn test_canonical_key_strips_fragment() {
        let key = canonical_key(&base(), "/training/1#section-3").unwrap();
        assert_eq!(key, "https://learn.example.com/training/1");
    }

    #[test]
    fn test_canonical_key_keeps_absolute_urls() {
        let key = canonical_key(&base(), "https://cdn.example.net/logo.png").unwrap();
        assert_eq!(key, "https://cdn.example.net/logo.png");
    }

    #[test]
    fn test_canonical_key_drops_empty_query() {
        let key = canonical_key(&base(), "/app.js?").unwrap();
        assert_eq!(key, "https://learn.example.com/app.js");
    }

    #[test]
    fn test_canonical_key_rejects_garbage() {
        let result = canonical_key(&base(), "http://[::1");
        assert!(matches!(result, Err(NetworkError::InvalidUrl(_))));
    }

    #[test]
    fn test_manifest_version_ignores_order() {
        let a = manifest_version(&["/".to_string(), "/app.js".to_string()]);
        let b = manifest_version(&["/app.js".to_string(), "/".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_manifest_version_changes_with_entries() {
        let a = manifest_version(&["/app.js".to_string()]);
        let b = manifest_version(&["/app.js".to_string(), "/app.css".to_string()]);
        assert_ne!(a, b);
    }
}
