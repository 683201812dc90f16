use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::UNRESOLVED_GAME_ID;

/// One continuous play interval for a client+game pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    /// Server-assigned id, known once `session_started` comes back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub client_id: String,
    pub game_id: i64,
    /// Store app id for sessions opened with [`UNRESOLVED_GAME_ID`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_app_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "int_flag")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
}

impl GameSession {
    pub fn open(
        client_id: impl Into<String>,
        game_id: i64,
        steam_app_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            client_id: client_id.into(),
            game_id,
            steam_app_id,
            start_time: now,
            end_time: None,
            is_active: true,
            duration_seconds: None,
        }
    }

    /// Closed copy of this session. Duration is clamped at zero so a clock
    /// step backwards never yields a negative play time.
    pub fn closed(&self, now: DateTime<Utc>) -> Self {
        let elapsed = (now - self.start_time).num_seconds().max(0);
        Self {
            end_time: Some(now),
            is_active: false,
            duration_seconds: Some(elapsed),
            ..self.clone()
        }
    }

    pub fn is_external(&self) -> bool {
        self.game_id == UNRESOLVED_GAME_ID
    }

    /// Whether two records describe the same game. Store-app sessions the
    /// server has not resolved yet compare by their external id.
    pub fn same_game(&self, other: &GameSession) -> bool {
        match (&self.steam_app_id, &other.steam_app_id) {
            (Some(a), Some(b)) if self.is_external() || other.is_external() => a == b,
            _ => self.game_id == other.game_id,
        }
    }

    /// Whether `remote` is this unresolved store-app session after the server
    /// mapped it to a catalog id. The server may drop the external id when it
    /// does so.
    pub fn resolved_by(&self, remote: &GameSession) -> bool {
        self.is_external()
            && !remote.is_external()
            && remote
                .steam_app_id
                .as_ref()
                .is_none_or(|id| self.steam_app_id.as_ref() == Some(id))
    }

    /// This session carrying the server's id and resolved game id. The
    /// external id is kept so the store app still confirms it.
    pub fn with_resolution(&self, remote: &GameSession) -> Self {
        Self {
            id: remote.id.or(self.id),
            game_id: remote.game_id,
            ..self.clone()
        }
    }
}

/// How a catalog game is installed and launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Archive,
    Shortcut,
    #[serde(alias = "steamApp")]
    Steam,
}

impl GameKind {
    /// Kinds the user may start outside the launcher (desktop shortcut,
    /// store client), and which therefore get picked up without a launch
    /// intent.
    pub fn is_externally_launchable(self) -> bool {
        matches!(self, Self::Shortcut | Self::Steam)
    }
}

/// Catalog entry, owned by the game-catalog collaborator. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GameKind,
    #[serde(default)]
    pub executables: Vec<String>,
    /// Single-executable field kept by older catalogs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default)]
    pub needs_key: bool,
}

impl GameRecord {
    /// Every declared executable, `executables` first, then the legacy field
    /// if it is not already listed.
    pub fn declared_executables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.executables.iter().map(String::as_str).collect();
        if let Some(exe) = self.executable.as_deref()
            && !out.contains(&exe)
        {
            out.push(exe);
        }
        out
    }
}

mod int_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Int(i64),
        Bool(bool),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Flag::deserialize(deserializer)? {
            Flag::Int(n) => n != 0,
            Flag::Bool(b) => b,
        })
    }
}
