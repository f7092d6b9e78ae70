//! Listener settings for `serve`
//!
//! The gateway path (`invoke`) never opens a socket, so nothing here
//! applies to it.

use std::net::{AddrParseError, SocketAddr};

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use tower_http::cors::AllowOrigin;

/// Where the tool API listens and which browser origins may call it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Literal IP to listen on; every interface unless set
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Browser origins allowed to call the API. Left empty, any origin may.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl HttpServerConfig {
    /// Listen on every interface at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Host names are not resolved; `host` must be an IP literal.
    pub fn bind_addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.socket_addr().parse()
    }

    /// Rejects an unusable listen address or an origin that is not a
    /// valid header value.
    pub fn validate(&self) -> Result<(), String> {
        self.bind_addr()
            .map_err(|e| format!("http listen address '{}': {}", self.socket_addr(), e))?;
        for origin in &self.cors_origins {
            HeaderValue::from_str(origin)
                .map_err(|_| format!("http.cors_origins entry '{}' is not a valid origin", origin))?;
        }
        Ok(())
    }

    /// CORS origin rule for the router.
    pub fn allow_origin(&self) -> AllowOrigin {
        if self.cors_origins.is_empty() {
            return AllowOrigin::any();
        }
        AllowOrigin::list(
            self.cors_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    }
}
