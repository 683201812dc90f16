use {
    async_trait::async_trait,
    nexus_channel::SessionChannel,
    nexus_protocol::{GameSession, SessionStatus},
};

/// Session operations the reconciler drives. Implemented by
/// [`SessionChannel`]; tests substitute an in-memory fake.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn is_connected(&self) -> bool;
    fn current_session(&self) -> Option<GameSession>;
    fn start_session(&self, game_id: i64, external_app_id: Option<String>) -> bool;
    fn end_session(&self) -> bool;
    fn end_server_session(&self, session: &GameSession) -> bool;
    fn discard_session(&self) -> Option<GameSession>;
    fn adopt_session(&self, session: GameSession);
    async fn check_session_with_server(&self) -> Option<SessionStatus>;
}

#[async_trait]
impl SessionBackend for SessionChannel {
    fn is_connected(&self) -> bool {
        SessionChannel::is_connected(self)
    }

    fn current_session(&self) -> Option<GameSession> {
        SessionChannel::current_session(self)
    }

    fn start_session(&self, game_id: i64, external_app_id: Option<String>) -> bool {
        SessionChannel::start_session(self, game_id, external_app_id)
    }

    fn end_session(&self) -> bool {
        SessionChannel::end_session(self)
    }

    fn end_server_session(&self, session: &GameSession) -> bool {
        SessionChannel::end_server_session(self, session)
    }

    fn discard_session(&self) -> Option<GameSession> {
        SessionChannel::discard_session(self)
    }

    fn adopt_session(&self, session: GameSession) {
        SessionChannel::adopt_session(self, session)
    }

    async fn check_session_with_server(&self) -> Option<SessionStatus> {
        SessionChannel::check_session_with_server(self).await
    }
}
