//! Stream URL construction with cache-busting tokens.

use url::Url;

use crate::error::{Result, WatchdogError};

/// Path prefix of the backend's continuously-updating image resource.
const STREAM_PATH: &str = "api/video/stream/";

/// Backend base URL that every feed's stream hangs off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    base: Url,
}

impl StreamEndpoint {
    /// Parse and validate a backend base URL (`http` or `https` only).
    pub fn new(base: &str) -> Result<Self> {
        let mut url = Url::parse(base)
            .map_err(|e| WatchdogError::invalid_endpoint(base, e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(WatchdogError::invalid_endpoint(
                base,
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }

        // Join semantics drop the last segment unless the path ends with '/'.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { base: url })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve `path` against the base URL.
    pub fn join(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| WatchdogError::invalid_endpoint(path, e.to_string()))
    }

    /// `GET <base>/api/video/stream/<feed_id>?t=<token>`
    pub fn stream_url(&self, feed_id: &str, token: &str) -> Result<Url> {
        let mut url = self.join(STREAM_PATH)?;
        url.path_segments_mut()
            .map_err(|_| WatchdogError::invalid_endpoint(self.base.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .push(feed_id);
        url.query_pairs_mut().append_pair("t", token);
        Ok(url)
    }
}

/// Cache-busting token for one connection attempt.
///
/// The generation is strictly increasing within a session, so two attempts
/// never share a token even inside the same millisecond.
pub fn cache_token(generation: u64) -> String {
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), generation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stream_url_with_token() {
        let endpoint = StreamEndpoint::new("http://127.0.0.1:5000").unwrap();
        let url = endpoint.stream_url("feed_1", "1700000000000-1").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:5000/api/video/stream/feed_1?t=1700000000000-1"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let endpoint = StreamEndpoint::new("https://safety.example.com/backend").unwrap();
        let url = endpoint.stream_url("feed_2", "abc").unwrap();
        assert_eq!(
            url.as_str(),
            "https://safety.example.com/backend/api/video/stream/feed_2?t=abc"
        );
    }

    #[test]
    fn feed_id_is_percent_encoded() {
        let endpoint = StreamEndpoint::new("http://127.0.0.1:5000/").unwrap();
        let url = endpoint.stream_url("gate 3/north", "1").unwrap();
        assert_eq!(url.path(), "/api/video/stream/gate%203%2Fnorth");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            StreamEndpoint::new("ftp://127.0.0.1/"),
            Err(WatchdogError::InvalidEndpoint { .. })
        ));
        assert!(StreamEndpoint::new("not a url").is_err());
    }

    #[test]
    fn tokens_differ_per_generation() {
        assert_ne!(cache_token(1), cache_token(2));
        assert!(cache_token(7).ends_with("-7"));
    }
}
