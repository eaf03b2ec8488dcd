use chunk_transport::FrameKind;
use thiserror::Error;
use url::Url;

/// Configuration for the WebSocket transport
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Full URL or bare `host:port`
    pub url: String,
    /// Optional path appended to the URL (e.g. "/pty")
    pub path: Option<String>,
    /// Whether a bare address gets wss:// rather than ws://
    pub use_tls: bool,
    /// Message type used for outbound chunks
    pub frame: FrameKind,
}

#[derive(Debug, Error)]
pub enum WebSocketConfigError {
    #[error("invalid websocket url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("unsupported url scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        // bare addresses stay on ws:// unless with_tls(true) is called
        let use_tls = url.starts_with("wss://") || url.starts_with("https://");

        Self {
            url,
            path: None,
            use_tls,
            frame: FrameKind::default(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_frame(mut self, frame: FrameKind) -> Self {
        self.frame = frame;
        self
    }

    /// Build and validate the URL to dial.
    pub fn build_url(&self) -> Result<Url, WebSocketConfigError> {
        let trimmed = self.url.trim();
        let mut raw = if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if trimmed.contains("://") {
            trimmed.to_string()
        } else if self.use_tls {
            format!("wss://{trimmed}")
        } else {
            format!("ws://{trimmed}")
        };

        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            match (raw.ends_with('/'), path.starts_with('/')) {
                (true, true) => raw.push_str(&path[1..]),
                (false, false) => {
                    raw.push('/');
                    raw.push_str(path);
                }
                _ => raw.push_str(path),
            }
        }

        let mut url = Url::parse(&raw).map_err(|source| WebSocketConfigError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WebSocketConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        // Avoid resolving localhost to ::1 when the host only listens on IPv4
        if url.host_str() == Some("localhost") {
            let _ = url.set_host(Some("127.0.0.1"));
        }
        Ok(url)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new(super::DEFAULT_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_local_address_uses_plain_ws() {
        let config = WebSocketConfig::new("127.0.0.1:8080");
        assert!(!config.use_tls);
        assert_eq!(config.build_url().unwrap().as_str(), "ws://127.0.0.1:8080/");
    }

    #[test]
    fn bare_remote_address_uses_plain_ws_unless_tls_requested() {
        let config = WebSocketConfig::new("shell.example.com:8080");
        assert!(!config.use_tls);
        assert_eq!(
            config.build_url().unwrap().as_str(),
            "ws://shell.example.com:8080/"
        );
        assert_eq!(
            config.with_tls(true).build_url().unwrap().as_str(),
            "wss://shell.example.com:8080/"
        );
    }

    #[test]
    fn secure_schemes_imply_tls() {
        assert!(WebSocketConfig::new("wss://shell.example.com/").use_tls);
        assert!(WebSocketConfig::new("https://shell.example.com/").use_tls);
        assert!(!WebSocketConfig::new("ws://shell.example.com/").use_tls);
    }

    #[test]
    fn localhost_is_pinned_to_ipv4() {
        let config = WebSocketConfig::new("ws://localhost:8080/");
        assert_eq!(config.build_url().unwrap().as_str(), "ws://127.0.0.1:8080/");
    }

    #[test]
    fn path_is_joined_with_one_slash() {
        let cases = [
            ("ws://host:1", "pty"),
            ("ws://host:1", "/pty"),
            ("ws://host:1/", "pty"),
            ("ws://host:1/", "/pty"),
        ];
        for (base, path) in cases {
            let url = WebSocketConfig::new(base).with_path(path).build_url().unwrap();
            assert_eq!(url.as_str(), "ws://host:1/pty", "{base} + {path}");
        }
    }

    #[test]
    fn http_schemes_map_to_websocket_schemes() {
        assert_eq!(
            WebSocketConfig::new("https://shell.example.com/ws")
                .build_url()
                .unwrap()
                .as_str(),
            "wss://shell.example.com/ws"
        );
    }

    #[test]
    fn rejects_foreign_schemes_and_garbage() {
        assert!(matches!(
            WebSocketConfig::new("ftp://host/").build_url(),
            Err(WebSocketConfigError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            WebSocketConfig::new("ws://").build_url(),
            Err(WebSocketConfigError::InvalidUrl { .. })
        ));
    }
}
