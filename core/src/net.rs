//! Network capability consumed by the sync pipeline
//!
//! The firmware implements [`Network`] on top of Wi-Fi, DHCP, DNS, TCP and TLS.
//! The core only needs association polling, an SNTP reading and a request that
//! fills a body buffer.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

/// Upper bound on a response body kept in memory
pub const MAX_BODY_BYTES: usize = 96 * 1024;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An outgoing request
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: Method,
    pub url: &'a str,
    /// `Authorization: Bearer <token>` when set
    pub bearer: Option<&'a str>,
    /// `application/x-www-form-urlencoded` body for POST
    pub form: Option<&'a str>,
    /// Keep only the first `limit` body bytes instead of failing on large bodies
    pub limit: Option<usize>,
}

impl<'a> Request<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            method: Method::Get,
            url,
            bearer: None,
            form: None,
            limit: None,
        }
    }

    pub fn post_form(url: &'a str, form: &'a str) -> Self {
        Self {
            method: Method::Post,
            url,
            bearer: None,
            form: Some(form),
            limit: None,
        }
    }

    pub fn with_bearer(mut self, token: &'a str) -> Self {
        self.bearer = Some(token);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Transient I/O failure below the HTTP status layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network not connected")]
    NotConnected,
    #[error("dns lookup failed")]
    Dns,
    #[error("connect failed")]
    Connect,
    #[error("tls handshake failed")]
    Tls,
    #[error("timed out")]
    Timeout,
    #[error("read/write failed")]
    Io,
    #[error("invalid url")]
    InvalidUrl,
    #[error("response too large")]
    TooLarge,
    #[error("server certificate not verified")]
    Unverified,
}

impl TransportError {
    /// Short machine-readable code for status lines
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "NOT_CONNECTED",
            TransportError::Dns => "DNS",
            TransportError::Connect => "CONNECT",
            TransportError::Tls => "TLS",
            TransportError::Timeout => "TIMEOUT",
            TransportError::Io => "IO",
            TransportError::InvalidUrl => "INVALID_URL",
            TransportError::TooLarge => "TOO_LARGE",
            TransportError::Unverified => "UNVERIFIED_TLS",
        }
    }
}

/// Radio + IP stack + HTTP client.
///
/// All methods are bounded by their own timeouts; a timeout is reported as
/// [`TransportError::Timeout`].
#[allow(async_fn_in_trait)]
pub trait Network {
    /// Start associating with the access point. Returns once the attempt is
    /// underway; completion is observed through [`Network::is_connected`].
    async fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), TransportError>;

    /// Associated and holding an IP address
    fn is_connected(&mut self) -> bool;

    /// TLS sessions authenticate the server certificate
    fn verifies_peers(&self) -> bool;

    /// Current UTC time from a network time server
    async fn network_time(&mut self) -> Result<u64, TransportError>;

    /// Perform `request`, replacing `body` with the response body.
    ///
    /// Any HTTP status is returned as `Ok(status)`; only failures below HTTP are
    /// errors. Bodies over [`MAX_BODY_BYTES`] fail with
    /// [`TransportError::TooLarge`] unless the request sets a limit.
    async fn request(
        &mut self,
        request: &Request<'_>,
        body: &mut Vec<u8>,
    ) -> Result<u16, TransportError>;

    /// Drop the association and power the radio down
    async fn shutdown(&mut self);
}

/// Percent-encode `value` for a query string or form body
pub fn encode_component(out: &mut String, value: &str) {
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
}

/// Build `key=value&key=value` with each value percent-encoded
pub fn form_encode(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        encode_component(&mut out, value);
    }
    out
}
