//! Client connection state.

use std::fmt;

/// `Idle → Connecting → Open → Reconnecting → Connecting → ...`, with
/// `GaveUp` terminal once the attempt cap is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Not running, or stopped by an explicit disconnect or a normal close.
    Idle,
    /// Handshake and subscription replay in progress.
    Connecting,
    /// Replay finished; live changes go straight to the wire.
    Open,
    /// Waiting out the backoff delay.
    Reconnecting,
    GaveUp,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::GaveUp => "gave_up",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GaveUp)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
