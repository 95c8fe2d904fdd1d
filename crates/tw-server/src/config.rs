//! Server option binding.
//!
//! TOML is the sole config source; hosts may also build [`ServerOptions`]
//! programmatically.  Every field has a default, so an empty document is a
//! valid configuration.
//!
//! # Sections
//! - `[security]`: principal attachment and the WS upgrade gate
//! - `[web_socket]`: served URL patterns, buffer size, keep-alive cadence
//! - `[tcp_stream]`: port, buffer size, connection cap
//! - `[kcp]`: UDP port

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Validated option types
// ---------------------------------------------------------------------------

/// Top-level server options, one field per transport plus security.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub security: SecurityOptions,
    pub web_socket: WebSocketOptions,
    pub tcp_stream: TcpStreamOptions,
    pub kcp: KcpOptions,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityOptions {
    /// Run the host-supplied authenticator on connect and attach the
    /// resulting principal to the connection context.
    pub enable_authentication: bool,
    /// Refuse the WebSocket upgrade with 401 when the principal is absent
    /// or not authenticated.  TCP and KCP cannot enforce this; their
    /// gateways log a warning at start instead.
    pub require_authenticated_user: bool,
}

#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    /// URL paths the WS handler is mounted on.
    pub patterns: Vec<String>,
    /// Socket write-buffer size in bytes.
    pub buffer_size: usize,
    /// Seconds between server-initiated pings; `0` disables them.
    pub keep_alive_interval: u64,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        WebSocketOptions {
            patterns: vec!["/ws".to_owned()],
            buffer_size: 4096,
            keep_alive_interval: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpStreamOptions {
    pub port: u16,
    /// Socket buffer size hint in bytes.
    pub buffer_size: usize,
    /// Maximum concurrent connections; `0` means unlimited.
    pub max_connections: usize,
}

impl Default for TcpStreamOptions {
    fn default() -> Self {
        TcpStreamOptions {
            port: 5003,
            buffer_size: 8192,
            max_connections: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KcpOptions {
    pub port: u16,
}

impl Default for KcpOptions {
    fn default() -> Self {
        KcpOptions { port: 5004 }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawOptions {
    security: Option<RawSecurity>,
    web_socket: Option<RawWebSocket>,
    tcp_stream: Option<RawTcpStream>,
    kcp: Option<RawKcp>,
}

#[derive(Debug, Deserialize)]
struct RawSecurity {
    enable_authentication: Option<bool>,
    require_authenticated_user: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawWebSocket {
    patterns: Option<Vec<String>>,
    buffer_size: Option<usize>,
    keep_alive_interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTcpStream {
    port: Option<u16>,
    buffer_size: Option<usize>,
    max_connections: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawKcp {
    port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading options file: {0}")]
    Io(String),
    #[error("parsing options: {0}")]
    Parse(String),
    #[error("invalid options: {0}")]
    Invalid(String),
}

impl ServerOptions {
    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<ServerOptions, ConfigError> {
        let toml_str = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("'{}': {}", path.display(), e)))?;
        ServerOptions::from_toml_str(&toml_str)
    }

    /// Parse options from a TOML string, applying defaults and validating.
    pub fn from_toml_str(toml_str: &str) -> Result<ServerOptions, ConfigError> {
        let raw: RawOptions =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let security_defaults = SecurityOptions::default();
        let security = match raw.security {
            Some(s) => SecurityOptions {
                enable_authentication: s
                    .enable_authentication
                    .unwrap_or(security_defaults.enable_authentication),
                require_authenticated_user: s
                    .require_authenticated_user
                    .unwrap_or(security_defaults.require_authenticated_user),
            },
            None => security_defaults,
        };

        let ws_defaults = WebSocketOptions::default();
        let web_socket = match raw.web_socket {
            Some(w) => WebSocketOptions {
                patterns: w.patterns.unwrap_or(ws_defaults.patterns),
                buffer_size: w.buffer_size.unwrap_or(ws_defaults.buffer_size),
                keep_alive_interval: w
                    .keep_alive_interval
                    .unwrap_or(ws_defaults.keep_alive_interval),
            },
            None => ws_defaults,
        };

        let tcp_defaults = TcpStreamOptions::default();
        let tcp_stream = match raw.tcp_stream {
            Some(t) => TcpStreamOptions {
                port: t.port.unwrap_or(tcp_defaults.port),
                buffer_size: t.buffer_size.unwrap_or(tcp_defaults.buffer_size),
                max_connections: t.max_connections.unwrap_or(tcp_defaults.max_connections),
            },
            None => tcp_defaults,
        };

        let kcp_defaults = KcpOptions::default();
        let kcp = match raw.kcp {
            Some(k) => KcpOptions {
                port: k.port.unwrap_or(kcp_defaults.port),
            },
            None => kcp_defaults,
        };

        let options = ServerOptions {
            security,
            web_socket,
            tcp_stream,
            kcp,
        };
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.web_socket.patterns.is_empty() {
            return Err(ConfigError::Invalid(
                "web_socket.patterns must name at least one path".to_owned(),
            ));
        }
        for pattern in &self.web_socket.patterns {
            if !pattern.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "web_socket pattern '{}' must start with '/'",
                    pattern
                )));
            }
        }
        if self.web_socket.buffer_size == 0 || self.tcp_stream.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer sizes must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}
