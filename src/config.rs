//! Configuration and limits for WebSocket connections.

use std::time::Duration;

/// Default maximum payload size of a single frame, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100_000;

/// Default maximum size of a reassembled message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default maximum number of frames in one fragmented message.
pub const DEFAULT_MAX_FRAGMENT_COUNT: usize = 1024;

/// Size limits for a WebSocket connection.
///
/// These bound the memory a single connection can pin while a frame, a
/// fragmented message or the handshake is still incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single frame in bytes.
    ///
    /// Outgoing messages are fragmented so that no frame exceeds this, and
    /// incoming frames declaring a larger payload are rejected.
    ///
    /// Default: 100 000
    pub max_frame_size: usize,

    /// Maximum size of a reassembled incoming message in bytes.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of frames an incoming message may be split into.
    ///
    /// Default: 1024
    pub max_fragment_count: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_fragment_count: DEFAULT_MAX_FRAGMENT_COUNT,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom frame and handshake sizes. Message
    /// limits keep their defaults.
    #[must_use]
    pub const fn new(max_frame_size: usize, max_handshake_size: usize) -> Self {
        Self {
            max_frame_size,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_fragment_count: DEFAULT_MAX_FRAGMENT_COUNT,
            max_handshake_size,
        }
    }

    /// Validate that a declared frame payload is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_frame_size as u64 {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a reassembled message stays within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a message has not been split into too many frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`](crate::Error::TooManyFragments) if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), crate::Error> {
        if count > self.max_fragment_count {
            Err(crate::Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeout configuration for WebSocket connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// How long a synchronous ping waits for its pong, and how long an
    /// asynchronous ping holds the in-flight token.
    ///
    /// Default: 1 000 000 ms
    pub control: Duration,

    /// How long a half-closed connection waits for the peer to complete the
    /// close handshake before the transport is closed anyway.
    ///
    /// Default: 10 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            control: Duration::from_millis(1_000_000),
            close: Duration::from_secs(10),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(control: Duration, close: Duration) -> Self {
        Self { control, close }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size limits.
    pub limits: Limits,

    /// Timeout configuration.
    pub timeouts: Timeouts,

    /// Accept frames whose masking does not match the peer's role.
    ///
    /// RFC 6455 requires clients to mask and servers not to. Setting this to
    /// `true` violates the RFC but is useful against lenient peers.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Sub-protocols this endpoint supports, in order of preference.
    ///
    /// A client proposes all of them; a server picks the first one the
    /// client proposed that also appears here.
    pub protocols: Vec<String>,

    /// Extra headers a client adds to its upgrade request.
    pub headers: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            accept_unmasked_frames: false,
            protocols: Vec::new(),
            headers: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum frame payload size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.limits.max_frame_size = size;
        self
    }

    /// Set the maximum reassembled message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.limits.max_message_size = size;
        self
    }

    /// Set the maximum number of frames per incoming message.
    #[must_use]
    pub const fn with_max_fragment_count(mut self, count: usize) -> Self {
        self.limits.max_fragment_count = count;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the control-frame (ping) timeout.
    #[must_use]
    pub const fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.control = timeout;
        self
    }

    /// Set the close-handshake timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.close = timeout;
        self
    }

    /// Accept frames with role-inconsistent masking.
    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Add a supported sub-protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add a custom header to the client upgrade request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}
