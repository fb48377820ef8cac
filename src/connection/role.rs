//! Which end of the connection this engine plays.

/// WebSocket connection role, fixed when the connection is created.
///
/// Determines masking behavior per RFC 6455: clients mask every frame they
/// send, servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake and masks outgoing frames.
    Client,
    /// Answers the handshake and sends unmasked frames.
    Server,
}

impl Role {
    /// Check if this role must mask outgoing frames.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Check if frames from the peer are expected to be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_rules() {
        assert!(Role::Client.must_mask());
        assert!(!Role::Server.must_mask());
        assert!(Role::Server.expects_masked());
        assert!(!Role::Client.expects_masked());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
