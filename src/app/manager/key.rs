//! Cache key derivation
//!
//! The base key comes from the URL, optionally rewritten by a
//! [`CacheKeyFilter`]. Thumbnail and transformer qualifiers are spliced in
//! before the file extension so the disk cache keeps the original suffix.

use url::Url;

/// Maps a URL to its base cache key
pub trait CacheKeyFilter: Send + Sync {
    fn cache_key(&self, url: &Url) -> String;
}

impl<F> CacheKeyFilter for F
where
    F: Fn(&Url) -> String + Send + Sync,
{
    fn cache_key(&self, url: &Url) -> String {
        self(url)
    }
}

/// Base key: the filter's output, or the absolute URL
pub fn cache_key_for_url(url: &Url, filter: Option<&dyn CacheKeyFilter>) -> String {
    match filter {
        Some(filter) => filter.cache_key(url),
        None => url.as_str().to_string(),
    }
}

/// Key for a transformed variant of `key`
pub fn transformed_cache_key(key: &str, transformer_key: &str) -> String {
    qualified_key(key, transformer_key)
}

/// Key for a thumbnail decode of `key`
pub fn thumbnailed_cache_key(key: &str, size: (u32, u32), preserve_aspect_ratio: bool) -> String {
    let qualifier = format!(
        "Thumbnail({},{},{})",
        size.0,
        size.1,
        u8::from(preserve_aspect_ratio)
    );
    qualified_key(key, &qualifier)
}

/// Insert `-qualifier` before the path extension, or append it
fn qualified_key(key: &str, qualifier: &str) -> String {
    if let Ok(mut url) = Url::parse(key) {
        if !url.cannot_be_a_base() {
            if let Some(path) = with_qualifier(url.path(), qualifier) {
                url.set_path(&path);
                return url.to_string();
            }
        }
        return format!("{key}-{qualifier}");
    }

    with_qualifier(key, qualifier).unwrap_or_else(|| format!("{key}-{qualifier}"))
}

fn with_qualifier(path: &str, qualifier: &str) -> Option<String> {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let dot = path[name_start..].rfind('.')? + name_start;
    if dot == name_start {
        return None;
    }
    Some(format!("{}-{}{}", &path[..dot], qualifier, &path[dot..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_default_key_is_absolute_url() {
        assert_eq!(
            cache_key_for_url(&url("https://example.com/a.png?v=1"), None),
            "https://example.com/a.png?v=1"
        );
    }

    #[test]
    fn test_filter_rewrites_key() {
        let strip_query = |url: &Url| {
            let mut url = url.clone();
            url.set_query(None);
            url.to_string()
        };
        assert_eq!(
            cache_key_for_url(&url("https://example.com/a.png?token=abc"), Some(&strip_query)),
            "https://example.com/a.png"
        );
    }

    #[test]
    fn test_transformed_key_keeps_extension() {
        assert_eq!(
            transformed_cache_key("https://example.com/img/a.png?v=2", "Grayscale"),
            "https://example.com/img/a-Grayscale.png?v=2"
        );
        assert_eq!(
            transformed_cache_key("https://example.com/img/a", "Grayscale"),
            "https://example.com/img/a-Grayscale"
        );
        assert_eq!(transformed_cache_key("plain.key.jpg", "T"), "plain.key-T.jpg");
        assert_eq!(transformed_cache_key("plain", "T"), "plain-T");
        assert_eq!(transformed_cache_key(".hidden", "T"), ".hidden-T");
    }

    #[test]
    fn test_thumbnail_key() {
        assert_eq!(
            thumbnailed_cache_key("https://example.com/a.jpg", (100, 50), true),
            "https://example.com/a-Thumbnail(100,50,1).jpg"
        );
        assert_ne!(
            thumbnailed_cache_key("k", (100, 50), true),
            thumbnailed_cache_key("k", (100, 50), false)
        );
    }
}
