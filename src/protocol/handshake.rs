//! WebSocket opening handshake (RFC 6455 Section 4).
//!
//! [`HandshakeRequest`] and [`HandshakeResponse`] parse and write the HTTP
//! upgrade messages. [`Handshake`] drives one side of the exchange: it
//! buffers bytes until the header terminator, then negotiates the
//! sub-protocol and extensions and reports the result.

use crate::config::{Config, Limits};
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::extensions::{ExtensionOffer, ExtensionPipeline, ExtensionRegistry, format_header};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this engine speaks.
pub const WS_VERSION: u8 = 13;

const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Headers that must appear at most once in a request.
const SECURITY_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Parse HTTP header lines into a map keyed by lowercase name.
///
/// Repeated headers are joined with `", "`, except the names in
/// `security_headers`, which must not repeat.
///
/// # Errors
/// Returns `Error::InvalidHandshake` if a security-critical header is duplicated.
fn parse_headers<'a, I>(
    lines: I,
    security_headers: Option<&[&str]>,
) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name_lower = name.trim().to_lowercase();
        let value = value.trim();

        match headers.get_mut(&name_lower) {
            Some(existing) => {
                if security_headers.is_some_and(|sec| sec.contains(&name_lower.as_str())) {
                    return Err(Error::InvalidHandshake(format!(
                        "Duplicate header: {}",
                        name.trim()
                    )));
                }
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                headers.insert(name_lower, value.to_string());
            }
        }
    }

    Ok(headers)
}

/// Split a comma-separated header value into trimmed, non-empty items.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validate that a header value does not contain CR or LF characters.
///
/// # Errors
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn write_header(buf: &mut Vec<u8>, name: &str, value: &str) -> Result<()> {
    validate_header_value(name, value)?;
    buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    Ok(())
}

fn require_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = headers
        .get("upgrade")
        .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header".into()))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Upgrade header: {upgrade}"
        )));
    }

    let connection = headers
        .get("connection")
        .ok_or_else(|| Error::InvalidHandshake("Missing Connection header".into()))?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Connection header: {connection}"
        )));
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsengine::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// Generate a fresh Sec-WebSocket-Key: 16 random bytes, base64 encoded.
///
/// # Errors
/// Returns `Error::Io` if the OS random source fails.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Io(format!("failed to generate handshake key: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Parsed WebSocket handshake request from client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Host header value.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Version (should be 13).
    pub version: u8,
    /// The Origin header value (optional).
    pub origin: Option<String>,
    /// The Sec-WebSocket-Protocol values (optional).
    pub protocols: Vec<String>,
    /// The Sec-WebSocket-Extensions descriptors (optional).
    pub extensions: Vec<String>,
}

impl HandshakeRequest {
    /// Build a client request with a fresh key.
    ///
    /// # Errors
    /// Returns `Error::Io` if no key can be generated.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            host: host.into(),
            key: generate_key()?,
            version: WS_VERSION,
            origin: None,
            protocols: Vec::new(),
            extensions: Vec::new(),
        })
    }

    /// Parse a WebSocket handshake request from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is malformed or missing.
    /// - The HTTP method is not `GET`.
    /// - The HTTP version is not `HTTP/1.1`.
    /// - Any required headers are missing: `Upgrade`, `Connection`, `Host`, `Sec-WebSocket-Key`, `Sec-WebSocket-Version`.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    /// - The `Sec-WebSocket-Version` is not a valid integer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        // "GET /path HTTP/1.1"
        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::InvalidHandshake("Invalid request line".into()));
        }

        if parts[0] != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {}",
                parts[0]
            )));
        }

        if !parts[2].starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {}",
                parts[2]
            )));
        }

        let path = parts[1].to_string();
        let headers = parse_headers(lines, Some(&SECURITY_HEADERS))?;
        require_upgrade_headers(&headers)?;

        let host = headers
            .get("host")
            .ok_or_else(|| Error::InvalidHandshake("Missing Host header".into()))?
            .clone();

        let key = headers
            .get("sec-websocket-key")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?
            .clone();

        let version_str = headers.get("sec-websocket-version").ok_or_else(|| {
            Error::InvalidHandshake("Missing Sec-WebSocket-Version header".into())
        })?;
        let version: u8 = version_str
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {version_str}")))?;

        Ok(Self {
            path,
            host,
            key,
            version,
            origin: headers.get("origin").cloned(),
            protocols: headers
                .get("sec-websocket-protocol")
                .map(|p| split_list(p))
                .unwrap_or_default(),
            extensions: headers
                .get("sec-websocket-extensions")
                .map(|e| split_list(e))
                .unwrap_or_default(),
        })
    }

    /// Validate the handshake request according to RFC 6455.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The WebSocket version is not 13.
    /// - The `Sec-WebSocket-Key` is not valid Base64.
    /// - The decoded `Sec-WebSocket-Key` is not exactly 16 bytes.
    /// - The `Host` header is empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != WS_VERSION {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected 13)",
                self.version
            )));
        }

        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => {}
            Ok(decoded) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Key must be 16 bytes, got {}",
                    decoded.len()
                )));
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Invalid Sec-WebSocket-Key: not valid Base64".into(),
                ));
            }
        }

        if self.host.is_empty() {
            return Err(Error::InvalidHandshake(
                "Host header cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Write the HTTP upgrade request, followed by `extra` headers.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if any value contains CR/LF.
    pub fn write(&self, extra: &[(String, String)], buf: &mut Vec<u8>) -> Result<()> {
        if self.path.contains(char::is_whitespace) {
            return Err(Error::InvalidHeaderValue {
                header: "request-target".into(),
                reason: "contains whitespace".into(),
            });
        }
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        write_header(buf, "Host", &self.host)?;
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        write_header(buf, "Sec-WebSocket-Key", &self.key)?;
        buf.extend_from_slice(format!("Sec-WebSocket-Version: {}\r\n", self.version).as_bytes());

        if let Some(ref origin) = self.origin {
            write_header(buf, "Origin", origin)?;
        }
        if !self.protocols.is_empty() {
            write_header(buf, "Sec-WebSocket-Protocol", &self.protocols.join(", "))?;
        }
        if !self.extensions.is_empty() {
            write_header(buf, "Sec-WebSocket-Extensions", &self.extensions.join(", "))?;
        }
        for (name, value) in extra {
            validate_header_value("header name", name)?;
            write_header(buf, name, value)?;
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// WebSocket handshake response from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The selected Sec-WebSocket-Protocol (optional).
    pub protocol: Option<String>,
    /// The negotiated Sec-WebSocket-Extensions descriptors (optional).
    pub extensions: Vec<String>,
}

impl HandshakeResponse {
    /// Create a response to a validated request.
    ///
    /// Selects the first protocol the client proposed that also appears in
    /// `supported`. Extensions are filled in by the caller.
    pub fn from_request(req: &HandshakeRequest, supported: &[String]) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            protocol: req
                .protocols
                .iter()
                .find(|p| supported.contains(p))
                .cloned(),
            extensions: Vec::new(),
        }
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if protocol or extensions contain CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        write_header(buf, "Sec-WebSocket-Accept", &self.accept)?;

        if let Some(ref proto) = self.protocol {
            write_header(buf, "Sec-WebSocket-Protocol", proto)?;
        }

        if !self.extensions.is_empty() {
            write_header(buf, "Sec-WebSocket-Extensions", &self.extensions.join(", "))?;
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Parse a WebSocket handshake response from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The response is empty or the status line is missing.
    /// - The status code is not `101 Switching Protocols`.
    /// - Any required headers are missing: `Upgrade`, `Connection`, `Sec-WebSocket-Accept`.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        // "HTTP/1.1 101 Switching Protocols"
        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;

        let mut status = status_line.split_whitespace();
        let version = status.next().unwrap_or_default();
        let code = status.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.1") || code != "101" {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines, None)?;
        require_upgrade_headers(&headers)?;

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();

        Ok(Self {
            accept,
            protocol: headers.get("sec-websocket-protocol").cloned(),
            extensions: headers
                .get("sec-websocket-extensions")
                .map(|e| split_list(e))
                .unwrap_or_default(),
        })
    }
}

/// What a completed handshake agreed on.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Negotiated sub-protocol.
    pub protocol: Option<String>,
    /// Negotiated extension instances, in order.
    pub pipeline: ExtensionPipeline,
    /// Response bytes the server must send.
    pub reply: Option<Vec<u8>>,
    /// Bytes of the last `add` input that belonged to the handshake.
    pub consumed: usize,
}

/// One side of the opening handshake.
#[derive(Debug)]
pub struct Handshake {
    role: Role,
    registry: Arc<ExtensionRegistry>,
    protocols: Vec<String>,
    limits: Limits,
    buffer: BytesMut,
    /// Client only: the request as sent.
    request: Option<HandshakeRequest>,
    complete: bool,
}

impl Handshake {
    /// Server side: wait for the client's upgrade request.
    pub fn server(config: &Config, registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            role: Role::Server,
            registry,
            protocols: config.protocols.clone(),
            limits: config.limits.clone(),
            buffer: BytesMut::new(),
            request: None,
            complete: false,
        }
    }

    /// Client side: build the upgrade request.
    ///
    /// Returns the handshake and the request bytes to send.
    ///
    /// # Errors
    /// - `Error::Io` if no key can be generated
    /// - `Error::InvalidHeaderValue` if a header value contains CR/LF
    pub fn client(
        host: &str,
        path: &str,
        config: &Config,
        registry: Arc<ExtensionRegistry>,
    ) -> Result<(Self, Vec<u8>)> {
        let mut request = HandshakeRequest::new(host, path)?;
        request.protocols = config.protocols.clone();
        request.extensions = registry.offers().iter().map(ToString::to_string).collect();

        let mut bytes = Vec::new();
        request.write(&config.headers, &mut bytes)?;

        let handshake = Self {
            role: Role::Client,
            registry,
            protocols: config.protocols.clone(),
            limits: config.limits.clone(),
            buffer: BytesMut::new(),
            request: Some(request),
            complete: false,
        };
        Ok((handshake, bytes))
    }

    /// The side this handshake runs on.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The client key, if this is the client side.
    pub fn key(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.key.as_str())
    }

    /// Feed bytes from the peer.
    ///
    /// Returns `Ok(None)` while the header block is incomplete, in which case
    /// all of `data` was consumed. Once the terminator arrives, returns the
    /// outcome; `consumed` tells how much of `data` belonged to the
    /// handshake, the rest is frame data.
    ///
    /// # Errors
    /// - `Error::HandshakeTooLarge` if the header block exceeds the limit
    /// - `Error::InvalidHandshake` on any malformed or mismatched header
    /// - `Error::ProtocolViolation` if called after completion
    pub fn add(&mut self, data: &[u8]) -> Result<Option<HandshakeOutcome>> {
        if self.complete {
            return Err(Error::ProtocolViolation("handshake already complete".into()));
        }

        let previous = self.buffer.len();
        self.buffer.extend_from_slice(data);

        let search_from = previous.saturating_sub(TERMINATOR.len() - 1);
        let Some(pos) = self.buffer[search_from..]
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
        else {
            self.limits.check_handshake_size(self.buffer.len())?;
            return Ok(None);
        };

        let end = search_from + pos + TERMINATOR.len();
        self.limits.check_handshake_size(end)?;

        let head = self.buffer.split_to(end);
        self.buffer.clear();

        let mut outcome = match self.role {
            Role::Server => self.accept_request(&head)?,
            Role::Client => self.verify_response(&head)?,
        };
        outcome.consumed = end - previous;
        self.complete = true;

        tracing::debug!(
            role = %self.role,
            protocol = ?outcome.protocol,
            extensions = ?outcome.pipeline.names(),
            "handshake complete"
        );
        Ok(Some(outcome))
    }

    fn accept_request(&self, head: &[u8]) -> Result<HandshakeOutcome> {
        let request = HandshakeRequest::parse(head)?;
        request.validate()?;

        let offers = request
            .extensions
            .iter()
            .map(|e| ExtensionOffer::parse(e))
            .collect::<Result<Vec<_>>>()?;
        let (pipeline, accepted) = self.registry.negotiate(&offers)?;

        let mut response = HandshakeResponse::from_request(&request, &self.protocols);
        if !accepted.is_empty() {
            response.extensions = vec![format_header(&accepted)];
        }

        let mut reply = Vec::new();
        response.write(&mut reply)?;

        Ok(HandshakeOutcome {
            protocol: response.protocol,
            pipeline,
            reply: Some(reply),
            consumed: 0,
        })
    }

    fn verify_response(&self, head: &[u8]) -> Result<HandshakeOutcome> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| Error::InvalidHandshake("client handshake without request".into()))?;
        let response = HandshakeResponse::parse(head)?;

        if response.accept != compute_accept_key(&request.key) {
            return Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match the key".into(),
            ));
        }

        if let Some(ref protocol) = response.protocol {
            if !self.protocols.contains(protocol) {
                return Err(Error::InvalidHandshake(format!(
                    "Server selected a protocol that was not proposed: {protocol}"
                )));
            }
        }

        let offered = self.registry.offers();
        let accepted = response
            .extensions
            .iter()
            .map(|e| ExtensionOffer::parse(e))
            .collect::<Result<Vec<_>>>()?;
        if let Some(unexpected) = accepted
            .iter()
            .find(|a| !offered.iter().any(|o| o.name == a.name))
        {
            return Err(Error::InvalidHandshake(format!(
                "Server accepted an extension that was not offered: {}",
                unexpected.name
            )));
        }
        let pipeline = self.registry.configure(&accepted)?;

        Ok(HandshakeOutcome {
            protocol: response.protocol,
            pipeline,
            reply: None,
            consumed: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{Extension, ExtensionParam};
    use crate::protocol::Frame;

    const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[derive(Debug)]
    struct Marker(&'static str);

    impl Extension for Marker {
        fn name(&self) -> &str {
            self.0
        }

        fn negotiate(&self, _params: &[ExtensionParam]) -> Result<Option<Box<dyn Extension>>> {
            Ok(Some(Box::new(Marker(self.0))))
        }

        fn prepare(&mut self, _frame: &mut Frame, data: Vec<u8>) -> Result<Vec<u8>> {
            Ok(data)
        }

        fn restore(&mut self, _frame: &mut Frame, data: Vec<u8>) -> Result<Vec<u8>> {
            Ok(data)
        }
    }

    fn registry(names: &[&'static str]) -> Arc<ExtensionRegistry> {
        let mut registry = ExtensionRegistry::new();
        for name in names {
            registry.add(Box::new(Marker(name))).unwrap();
        }
        Arc::new(registry)
    }

    // Test 1: RFC 6455 example verification
    #[test]
    fn test_compute_accept_key_rfc_example() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let expected = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        assert_eq!(compute_accept_key(key), expected);
    }

    #[test]
    fn test_generate_key_is_16_bytes() {
        let key = generate_key().unwrap();
        assert_eq!(BASE64.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key().unwrap());
    }

    // Test 2: Full client request parsing
    #[test]
    fn test_parse_valid_request() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: keep-alive, Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Origin: http://example.com\r\n\
            Sec-WebSocket-Protocol: chat, superchat\r\n\
            Sec-WebSocket-Extensions: x-a; p=1\r\n\
            Sec-WebSocket-Extensions: x-b\r\n\
            \r\n";

        let req = HandshakeRequest::parse(request).unwrap();
        assert_eq!(req.path, "/chat");
        assert_eq!(req.host, "server.example.com");
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(req.version, 13);
        assert_eq!(req.origin, Some("http://example.com".to_string()));
        assert_eq!(req.protocols, vec!["chat", "superchat"]);
        assert_eq!(req.extensions, vec!["x-a; p=1", "x-b"]);
    }

    // Test 3: Missing Sec-WebSocket-Key
    #[test]
    fn test_parse_request_missing_key() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Sec-WebSocket-Key")));
    }

    // Test 4: Missing Upgrade header
    #[test]
    fn test_parse_request_missing_upgrade() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Upgrade")));
    }

    // Test 5: Wrong WebSocket version
    #[test]
    fn test_parse_request_wrong_version() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 8\r\n\
            \r\n";

        let req = HandshakeRequest::parse(request).unwrap();
        let err = req.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("version")));
    }

    // Test 6: Validation rules
    #[test]
    fn test_validate_request() {
        let valid_req = HandshakeRequest::parse(REQUEST).unwrap();
        assert!(valid_req.validate().is_ok());

        let invalid_key_req = HandshakeRequest {
            key: "c2hvcnQ=".to_string(),
            ..valid_req.clone()
        };
        assert!(invalid_key_req.validate().is_err());

        let empty_host_req = HandshakeRequest {
            host: String::new(),
            ..valid_req
        };
        assert!(empty_host_req.validate().is_err());
    }

    // Test 7: Protocol selection follows the client's order
    #[test]
    fn test_response_from_request_selects_supported_protocol() {
        let mut req = HandshakeRequest::parse(REQUEST).unwrap();
        req.protocols = vec!["chat".into(), "superchat".into()];

        let resp = HandshakeResponse::from_request(&req, &["superchat".into(), "chat".into()]);
        assert_eq!(resp.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(resp.protocol, Some("chat".to_string()));

        let resp = HandshakeResponse::from_request(&req, &["other".into()]);
        assert_eq!(resp.protocol, None);
    }

    // Test 8: Serialize response to bytes
    #[test]
    fn test_response_write() {
        let resp = HandshakeResponse {
            accept: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".to_string(),
            protocol: Some("chat".to_string()),
            extensions: vec![],
        };

        let mut buf = Vec::new();
        resp.write(&mut buf).unwrap();
        let response_str = String::from_utf8(buf).unwrap();

        assert!(response_str.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response_str.contains("Upgrade: websocket"));
        assert!(response_str.contains("Connection: Upgrade"));
        assert!(response_str.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert!(response_str.contains("Sec-WebSocket-Protocol: chat"));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    // Test 9: Parse server response
    #[test]
    fn test_parse_response() {
        let response = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
            Sec-WebSocket-Protocol: chat\r\n\
            \r\n";

        let resp = HandshakeResponse::parse(response).unwrap();
        assert_eq!(resp.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(resp.protocol, Some("chat".to_string()));
    }

    #[test]
    fn test_parse_response_wrong_status() {
        let response = b"HTTP/1.1 200 OK\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
            \r\n";
        let err = HandshakeResponse::parse(response).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("101")));
    }

    #[test]
    fn test_request_write_roundtrip() {
        let mut req = HandshakeRequest::new("example.com:9000", "/ws").unwrap();
        req.protocols = vec!["a".into(), "b".into()];
        req.extensions = vec!["x-a; p=1".into()];

        let mut buf = Vec::new();
        req.write(&[("X-Token".into(), "abc".into())], &mut buf)
            .unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("GET /ws HTTP/1.1\r\n"));
        assert!(text.contains("X-Token: abc\r\n"));

        let parsed = HandshakeRequest::parse(&buf).unwrap();
        assert_eq!(parsed, req);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_request_write_rejects_crlf() {
        let req = HandshakeRequest::new("example.com", "/").unwrap();
        let mut buf = Vec::new();
        let result = req.write(&[("X-Evil".into(), "a\r\nHost: b".into())], &mut buf);
        assert!(matches!(result, Err(Error::InvalidHeaderValue { .. })));
    }

    #[test]
    fn test_case_insensitive_headers() {
        let request = b"GET /chat HTTP/1.1\r\n\
            HOST: server.example.com\r\n\
            UPGRADE: WebSocket\r\n\
            CONNECTION: upgrade\r\n\
            SEC-WEBSOCKET-KEY: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            SEC-WEBSOCKET-VERSION: 13\r\n\
            \r\n";

        let req = HandshakeRequest::parse(request).unwrap();
        assert_eq!(req.host, "server.example.com");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_duplicate_host_header_rejected() {
        let request = b"GET / HTTP/1.1\r\n\
Host: example.com\r\n\
Host: evil.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";

        let result = HandshakeRequest::parse(request);
        assert!(matches!(
            result,
            Err(Error::InvalidHandshake(msg)) if msg.contains("Duplicate")
        ));
    }

    #[test]
    fn test_invalid_http_method() {
        let request = b"POST /chat HTTP/1.1\r\n\
            Host: server.example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("GET")));
    }

    #[test]
    fn test_missing_host_header() {
        let request = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";

        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Host")));
    }

    #[test]
    fn test_crlf_in_protocol_rejected() {
        let response = HandshakeResponse {
            accept: "dGhlIHNhbXBsZSBub25jZQ==".to_string(),
            protocol: Some("chat\r\nX-Injected: evil".to_string()),
            extensions: vec![],
        };
        let mut buf = Vec::new();
        let result = response.write(&mut buf);
        assert!(matches!(result, Err(Error::InvalidHeaderValue { .. })));
    }

    // ==========================================================================
    // Handshake state machine
    // ==========================================================================

    #[test]
    fn test_server_handshake_byte_at_a_time() {
        let config = Config::new();
        let mut handshake = Handshake::server(&config, registry(&[]));

        let (last, rest) = REQUEST.split_last().unwrap();
        for byte in rest {
            assert!(handshake.add(std::slice::from_ref(byte)).unwrap().is_none());
        }
        let outcome = handshake.add(&[*last]).unwrap().unwrap();
        assert_eq!(outcome.consumed, 1);
        assert!(handshake.add(b"\r\n").is_err());

        let reply = String::from_utf8(outcome.reply.unwrap()).unwrap();
        assert!(reply.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn test_server_handshake_reports_leftover() {
        let config = Config::new();
        let mut handshake = Handshake::server(&config, registry(&[]));

        let mut data = REQUEST.to_vec();
        data.extend_from_slice(&[0x81, 0x00]);
        let outcome = handshake.add(&data).unwrap().unwrap();
        assert_eq!(outcome.consumed, REQUEST.len());
        assert!(handshake.add(b"x").is_err());
    }

    #[test]
    fn test_server_handshake_size_limit() {
        let config = Config::new();
        let mut handshake = Handshake::server(&config, registry(&[]));
        let junk = vec![b'A'; 9000];
        assert!(matches!(
            handshake.add(&junk),
            Err(Error::HandshakeTooLarge { .. })
        ));
    }

    #[test]
    fn test_client_server_negotiation() {
        let client_config = Config::new().with_protocol("v2").with_protocol("v1");
        let server_config = Config::new().with_protocol("v1").with_protocol("v2");

        let (mut client, request) =
            Handshake::client("localhost", "/", &client_config, registry(&["x-a", "x-b"]))
                .unwrap();
        let mut server = Handshake::server(&server_config, registry(&["x-b"]));

        let server_outcome = server.add(&request).unwrap().unwrap();
        assert_eq!(server_outcome.protocol.as_deref(), Some("v2"));
        assert_eq!(server_outcome.pipeline.names(), vec!["x-b"]);

        let client_outcome = client
            .add(&server_outcome.reply.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(client_outcome.protocol.as_deref(), Some("v2"));
        assert_eq!(client_outcome.pipeline.names(), vec!["x-b"]);
        assert!(client_outcome.reply.is_none());
    }

    #[test]
    fn test_client_rejects_bad_accept() {
        let config = Config::new();
        let (mut client, _) = Handshake::client("localhost", "/", &config, registry(&[])).unwrap();
        let response = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        let err = client.add(response).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("Accept")));
    }

    fn response_for(client: &Handshake, extra: &str) -> Vec<u8> {
        let accept = compute_accept_key(client.key().unwrap());
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n{extra}\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn test_client_rejects_unproposed_protocol() {
        let config = Config::new().with_protocol("v1");
        let (mut client, _) = Handshake::client("localhost", "/", &config, registry(&[])).unwrap();
        let response = response_for(&client, "Sec-WebSocket-Protocol: v9\r\n");
        let err = client.add(&response).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("protocol")));
    }

    #[test]
    fn test_client_rejects_unoffered_extension() {
        let config = Config::new();
        let (mut client, _) =
            Handshake::client("localhost", "/", &config, registry(&["x-a"])).unwrap();
        let response = response_for(&client, "Sec-WebSocket-Extensions: x-z\r\n");
        let err = client.add(&response).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("x-z")));
    }
}
