//! URL patterns for request routing.

use url::Url;

/// A single URL test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    /// Path contains the substring.
    PathContains(String),
    /// Host equals the pattern or is a subdomain of it.
    Host(String),
    /// Last path segment ends in one of these extensions (lowercase, no dot).
    Extension(Vec<String>),
    /// Whole URL contains the substring.
    Contains(String),
    /// Matches everything.
    Any,
}

impl UrlPattern {
    /// Create a path substring pattern.
    pub fn path_contains(substring: &str) -> Self {
        Self::PathContains(substring.to_string())
    }

    /// Create a host pattern.
    pub fn host(host: &str) -> Self {
        Self::Host(host.to_ascii_lowercase())
    }

    /// Create an extension pattern.
    pub fn extensions(extensions: &[&str]) -> Self {
        Self::Extension(
            extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        )
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::Contains(substring.to_string())
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            UrlPattern::PathContains(s) => url.path().contains(s.as_str()),
            UrlPattern::Host(h) => url.host_str().is_some_and(|host| host_matches(host, h)),
            UrlPattern::Extension(exts) => {
                path_extension(url).is_some_and(|ext| exts.iter().any(|e| *e == ext))
            }
            UrlPattern::Contains(s) => url.as_str().contains(s.as_str()),
            UrlPattern::Any => true,
        }
    }
}

/// `host` equals `pattern` or is one of its subdomains.
pub fn host_matches(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    host == pattern
        || host
            .strip_suffix(&pattern)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Lowercased extension of the last path segment, if it has one.
pub fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_path_contains() {
        let pattern = UrlPattern::path_contains("/api/");
        assert!(pattern.matches(&url("https://citypulse.example/api/deals")));
        assert!(!pattern.matches(&url("https://citypulse.example/apis")));
        assert!(!pattern.matches(&url("https://citypulse.example/?next=/api/")));
    }

    #[test]
    fn test_host_matches_subdomains() {
        assert!(host_matches("abc.supabase.co", "supabase.co"));
        assert!(host_matches("supabase.co", "supabase.co"));
        assert!(host_matches("FONTS.gstatic.com", "fonts.gstatic.com"));
        assert!(!host_matches("notsupabase.co", "supabase.co"));
        assert!(!host_matches("supabase.co.evil.com", "supabase.co"));
    }

    #[test]
    fn test_extension() {
        let pattern = UrlPattern::extensions(&["jpg", ".PNG"]);
        assert!(pattern.matches(&url("https://cdn.example/a/b/photo.JPG")));
        assert!(pattern.matches(&url("https://cdn.example/img.png?w=200")));
        assert!(!pattern.matches(&url("https://cdn.example/img.png/view")));
        assert!(!pattern.matches(&url("https://cdn.example/")));
    }

    #[test]
    fn test_path_extension_edge_cases() {
        assert_eq!(path_extension(&url("https://x.example/.env")), None);
        assert_eq!(path_extension(&url("https://x.example/archive.")), None);
        assert_eq!(
            path_extension(&url("https://x.example/app.min.js")),
            Some("js".to_string())
        );
    }

    #[test]
    fn test_contains_and_any() {
        assert!(UrlPattern::contains("deal").matches(&url("https://x.example/deals/1.jpg")));
        assert!(UrlPattern::Any.matches(&url("https://x.example/")));
    }
}
