//! Connection lifecycle states.

/// Where a connection is in its lifecycle.
///
/// ```text
/// Handshaking -> Open -> LocalClosePending  -> Closed
///                     \> RemoteClosePending -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Opening handshake in progress.
    #[default]
    Handshaking,
    /// Handshake complete, data flows both ways.
    Open,
    /// We sent Close and wait for the peer's.
    LocalClosePending,
    /// The peer sent Close; ours has not gone out yet.
    RemoteClosePending,
    /// Both sides closed, or the connection was torn down.
    Closed,
}

impl ConnectionState {
    /// Check if application data may be sent.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check if incoming frames are still dispatched.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(
            self,
            ConnectionState::Open | ConnectionState::LocalClosePending
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Handshaking => "Handshaking",
            ConnectionState::Open => "Open",
            ConnectionState::LocalClosePending => "LocalClosePending",
            ConnectionState::RemoteClosePending => "RemoteClosePending",
            ConnectionState::Closed => "Closed",
        })
    }
}
