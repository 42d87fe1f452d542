//! Runtime settings read from the environment.

/// Default page size when a request does not set `page[limit]`.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Prefix for generated links; no links are emitted when unset.
    pub base_url: Option<String>,
    pub page_size_default: i64,
    /// Reject client supplied ids on create.
    pub forbid_client_ids: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: None,
            page_size_default: DEFAULT_PAGE_SIZE,
            forbid_client_ids: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let base_url = std::env::var("JSONAPI_BASE_URL")
            .ok()
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());
        let page_size_default = std::env::var("JSONAPI_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let forbid_client_ids = std::env::var("JSONAPI_FORBID_CLIENT_IDS")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Settings {
            base_url,
            page_size_default,
            forbid_client_ids,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }
}
