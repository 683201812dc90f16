use std::fmt;

use crate::session::GameSession;

/// Connection state of the session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Outcome of comparing the local and server session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileVerdict {
    InSync,
    LocalOnly,
    ServerOnly,
    Conflicting,
}

impl ReconcileVerdict {
    pub fn classify(local: Option<&GameSession>, server: Option<&GameSession>) -> Self {
        match (local, server) {
            (None, None) => Self::InSync,
            (Some(_), None) => Self::LocalOnly,
            (None, Some(_)) => Self::ServerOnly,
            (Some(l), Some(s)) if l.same_game(s) || l.resolved_by(s) => Self::InSync,
            (Some(_), Some(_)) => Self::Conflicting,
        }
    }
}
