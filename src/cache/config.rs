//! Page cache configuration.

pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_SESSION_COOKIE: &str = "sessionid";

/// Paths that are never cached: the admin, uploaded and static assets,
/// account flows and the service's own internal surface.
pub const DEFAULT_BYPASS_PREFIXES: &[&str] = &[
    "/admin",
    "/static",
    "/media",
    "/stats",
    "/customers",
    "/account",
    "/ckeditor",
    "/silk",
    "/metrics",
    "/messages",
    "/resized-image",
    "/_internal",
];

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global switch; `false` turns every request into a bypass.
    pub enabled: bool,
    pub bypass_prefixes: Vec<String>,
    /// Cookie whose presence marks an authenticated viewer.
    pub session_cookie: String,
    pub minify_html: bool,
    /// Larger rendered bodies are passed through without being stored.
    pub body_limit_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bypass_prefixes: DEFAULT_BYPASS_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            minify_html: true,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            bypass_prefixes: settings.bypass_prefixes.clone(),
            session_cookie: settings.session_cookie.clone(),
            minify_html: settings.minify_html,
            body_limit_bytes: settings.body_limit_bytes,
        }
    }
}

impl CacheConfig {
    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(config.minify_html);
        assert_eq!(config.session_cookie, "sessionid");
        assert_eq!(config.body_limit_bytes, 2 * 1024 * 1024);
        assert_eq!(config.bypass_prefixes.len(), DEFAULT_BYPASS_PREFIXES.len());
    }

    #[test]
    fn bypass_is_a_plain_prefix_match() {
        let config = CacheConfig::default();
        assert!(config.is_bypassed("/admin/tours/tour/1/change/"));
        assert!(config.is_bypassed("/static/css/site.css"));
        assert!(config.is_bypassed("/_internal/health"));
        assert!(!config.is_bypassed("/tours/"));
        assert!(!config.is_bypassed("/"));
    }

    #[test]
    fn empty_bypass_list_caches_everything() {
        let config = CacheConfig {
            bypass_prefixes: Vec::new(),
            ..CacheConfig::default()
        };
        assert!(!config.is_bypassed("/admin/"));
    }
}
