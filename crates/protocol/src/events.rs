//! Session channel events. Every frame is a JSON object
//! `{"event": <name>, "data": <payload>}`.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::session::GameSession;

/// Payload of `check_my_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub client_id: String,
}

/// Payload of `my_session_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub has_session: bool,
    #[serde(default)]
    pub session: Option<GameSession>,
}

impl SessionStatus {
    /// The server's active session, if it reports one.
    pub fn active(&self) -> Option<&GameSession> {
        if self.has_session {
            self.session.as_ref()
        } else {
            None
        }
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Join(String),
    GameSessionStarted(GameSession),
    GameSessionEnded(GameSession),
    CheckMySession(SessionQuery),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::GameSessionStarted(_) => "game_session_started",
            Self::GameSessionEnded(_) => "game_session_ended",
            Self::CheckMySession(_) => "check_my_session",
        }
    }
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionStarted(GameSession),
    SessionEnded(Value),
    SessionUpdated(Value),
    ActiveSessionsUpdated(Value),
    MySessionStatus(SessionStatus),
    SessionError(Value),
    /// An event this client does not handle, by name.
    #[serde(skip_serializing)]
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ServerEvent {
    /// Parse a text frame. Unknown event names are not an error.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let RawFrame { event, data } = serde_json::from_str(text)?;
        Ok(match event.as_str() {
            "session_started" => Self::SessionStarted(serde_json::from_value(data)?),
            "session_ended" => Self::SessionEnded(data),
            "session_updated" => Self::SessionUpdated(data),
            "active_sessions_updated" => Self::ActiveSessionsUpdated(data),
            "my_session_status" => Self::MySessionStatus(serde_json::from_value(data)?),
            "session_error" => Self::SessionError(data),
            _ => Self::Unknown(event),
        })
    }
}
