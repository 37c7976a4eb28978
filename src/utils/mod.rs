//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Last path segment of a URL, without query or fragment.
pub fn file_name(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/readingroom/document/").unwrap();
        assert_eq!(
            resolve_url(&base, "/readingroom/docs/A.PDF"),
            "https://example.com/readingroom/docs/A.PDF"
        );
        assert_eq!(
            resolve_url(&base, "b.pdf"),
            "https://example.com/readingroom/document/b.pdf"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x.pdf"),
            "https://other.com/x.pdf"
        );
    }

    #[test]
    fn test_resolve_rejects_bad_base() {
        assert_eq!(resolve("not a url", "x.pdf"), None);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            file_name("https://example.com/readingroom/docs/CIA-RDP96.PDF?x=1"),
            Some("CIA-RDP96.PDF".to_string())
        );
        assert_eq!(file_name("https://example.com/"), None);
    }
}
