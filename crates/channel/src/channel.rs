use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use {
    chrono::Utc,
    futures::{SinkExt, StreamExt, stream::SplitStream},
    nexus_config::ChannelConfig,
    nexus_protocol::{
        self as proto, ClientEvent, ConnectionState, GameSession, ServerEvent, SessionQuery,
        SessionStatus,
    },
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, trace, warn},
    url::Url,
};

use crate::{
    backoff::{Backoff, ReconnectPolicy},
    error::ChannelError,
    subscribers::{Subscribers, Subscription},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Path appended to the server base URL, e.g. `/ws`.
    pub ws_path: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub status_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for ChannelOptions {
    fn from(cfg: &ChannelConfig) -> Self {
        Self {
            ws_path: cfg.ws_path.clone(),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            reconnect: ReconnectPolicy::from(cfg),
            status_timeout: Duration::from_millis(cfg.status_timeout_ms),
        }
    }
}

struct Shared {
    connection: ConnectionState,
    url: String,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    session: Option<GameSession>,
    reconnect_timer: Option<JoinHandle<()>>,
    auto_reconnect: bool,
    backoff: Backoff,
    /// Bumped on every new transport so a stale reader cannot tear down its
    /// successor.
    generation: u64,
    pending_status: Option<(u64, oneshot::Sender<SessionStatus>)>,
    next_query: u64,
}

impl Shared {
    /// Queue an event on the live transport. False when not connected.
    fn emit(&self, event: &ClientEvent) -> bool {
        if self.connection != ConnectionState::Connected {
            return false;
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return false;
        };
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!(event = event.name(), error = %e, "failed to encode channel event");
                return false;
            },
        };
        trace!(event = event.name(), "client -> server");
        outbound.send(Message::text(text)).is_ok()
    }

    fn replace_state(&mut self, state: ConnectionState) -> bool {
        if self.connection == state {
            return false;
        }
        debug!(from = %self.connection, to = %state, "session channel state");
        self.connection = state;
        true
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    client_id: String,
    opts: ChannelOptions,
    shared: Mutex<Shared>,
    subscribers: Arc<Subscribers>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_timer();
    }
}

/// Bidirectional event channel to the launcher server.
///
/// One instance is created by the owning process and shared by cloning the
/// handle. Connection state and the local session are owned here; other
/// components read them through accessors.
#[derive(Clone)]
pub struct SessionChannel {
    inner: Arc<Inner>,
}

impl SessionChannel {
    pub fn new(
        server_url: &str,
        client_id: impl Into<String>,
        opts: ChannelOptions,
    ) -> Result<Self, ChannelError> {
        let url = websocket_url(server_url, &opts.ws_path)?;
        let shared = Shared {
            connection: ConnectionState::Disconnected,
            url,
            outbound: None,
            session: None,
            reconnect_timer: None,
            auto_reconnect: true,
            backoff: Backoff::new(opts.reconnect),
            generation: 0,
            pending_status: None,
            next_query: 0,
        };
        Ok(Self {
            inner: Arc::new(Inner {
                client_id: client_id.into(),
                opts,
                shared: Mutex::new(shared),
                subscribers: Arc::new(Subscribers::default()),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, state: ConnectionState) {
        self.inner.subscribers.notify(state);
    }

    // ── Connection ───────────────────────────────────────────────────────────

    /// Open the transport and re-enable auto-reconnect.
    ///
    /// A failed attempt schedules a retry and returns the error; the channel
    /// keeps trying in the background. Returns `Ok` at once when already
    /// connected. While another attempt is mid-handshake this waits for that
    /// attempt and reports its outcome.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let (changed, in_flight) = {
            let mut shared = self.lock();
            shared.auto_reconnect = true;
            let current = shared.connection;
            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let watch = self.on_status_change(move |state| {
                        let _ = tx.send(state);
                    });
                    (false, Some((rx, watch)))
                },
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                    shared.cancel_timer();
                    (shared.replace_state(ConnectionState::Connecting), None)
                },
            }
        };
        if let Some((rx, watch)) = in_flight {
            let outcome = await_attempt(rx).await;
            watch.unsubscribe();
            return outcome;
        }
        if changed {
            self.notify(ConnectionState::Connecting);
        }

        match self.open_transport().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(server = %self.server_url(), error = %e, "session channel connect failed");
                self.retry_later();
                Err(e)
            },
        }
    }

    /// Close the transport, cancel any pending reconnect, and stay
    /// disconnected until [`connect`](Self::connect) is called again. The
    /// local session is cleared.
    pub fn disconnect(&self) {
        let changed = {
            let mut shared = self.lock();
            shared.auto_reconnect = false;
            shared.cancel_timer();
            shared.backoff.reset();
            shared.generation += 1;
            shared.outbound = None;
            shared.pending_status = None;
            shared.session = None;
            shared.replace_state(ConnectionState::Disconnected)
        };
        if changed {
            info!("session channel disconnected");
            self.notify(ConnectionState::Disconnected);
        }
    }

    pub fn enable_reconnection(&self) {
        self.lock().auto_reconnect = true;
    }

    /// Stop automatic retries. A pending retry is cancelled.
    pub fn disable_reconnection(&self) {
        let changed = {
            let mut shared = self.lock();
            shared.auto_reconnect = false;
            shared.cancel_timer();
            shared.connection == ConnectionState::Reconnecting
                && shared.replace_state(ConnectionState::Disconnected)
        };
        if changed {
            self.notify(ConnectionState::Disconnected);
        }
    }

    /// Point the channel at another server. Takes effect on the next connect.
    pub fn set_server(&self, server_url: &str) -> Result<(), ChannelError> {
        let url = websocket_url(server_url, &self.inner.opts.ws_path)?;
        self.lock().url = url;
        Ok(())
    }

    async fn open_transport(&self) -> Result<(), ChannelError> {
        let url = self.lock().url.clone();
        debug!(server = %url, "opening session channel");

        let timeout = self.inner.opts.connect_timeout;
        let (ws, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChannelError::ConnectTimeout(timeout))??;
        let (mut sink, stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let generation = {
            let mut shared = self.lock();
            if shared.connection != ConnectionState::Connecting {
                return Err(ChannelError::Aborted);
            }
            shared.generation += 1;
            shared.outbound = Some(tx);
            shared.backoff.reset();
            shared.replace_state(ConnectionState::Connected);
            shared.emit(&ClientEvent::Join(proto::SESSION_ROOM.into()));
            shared.generation
        };

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "session channel write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });
        tokio::spawn(read_loop(Arc::downgrade(&self.inner), stream, generation));

        info!(server = %url, "session channel connected");
        self.notify(ConnectionState::Connected);
        Ok(())
    }

    /// After a failed attempt or a dropped transport: arm the reconnect timer
    /// when auto-reconnect is on, otherwise settle in `Disconnected`.
    fn retry_later(&self) {
        let (changed, state) = {
            let mut shared = self.lock();
            if shared.auto_reconnect {
                self.arm_timer(&mut shared);
                let state = ConnectionState::Reconnecting;
                (shared.replace_state(state), state)
            } else {
                let state = ConnectionState::Disconnected;
                (shared.replace_state(state), state)
            }
        };
        if changed {
            self.notify(state);
        }
    }

    fn arm_timer(&self, shared: &mut Shared) {
        shared.cancel_timer();
        let delay = shared.backoff.next_delay();
        info!(
            attempt = shared.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        let weak = Arc::downgrade(&self.inner);
        shared.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            SessionChannel { inner }.reconnect_now().await;
        }));
    }

    async fn reconnect_now(&self) {
        {
            let mut shared = self.lock();
            // This task owns the slot; dropping the handle detaches it.
            shared.reconnect_timer = None;
            if !shared.auto_reconnect || shared.connection == ConnectionState::Connected {
                return;
            }
            shared.replace_state(ConnectionState::Connecting);
        }
        self.notify(ConnectionState::Connecting);

        if let Err(e) = self.open_transport().await {
            warn!(error = %e, "reconnect attempt failed");
            self.retry_later();
        }
    }

    fn transport_lost(&self, generation: u64) {
        {
            let mut shared = self.lock();
            if shared.generation != generation
                || shared.connection != ConnectionState::Connected
            {
                return;
            }
            shared.outbound = None;
            shared.pending_status = None;
        }
        warn!("session channel transport dropped");
        self.retry_later();
    }

    fn handle_frame(&self, text: &str) {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed frame from server");
                return;
            },
        };

        match event {
            ServerEvent::SessionStarted(remote) => {
                let mut shared = self.lock();
                let Some(local) = shared.session.as_mut() else {
                    return;
                };
                if local.client_id != remote.client_id {
                    return;
                }
                if local.same_game(&remote) {
                    local.id = remote.id;
                    debug!(session_id = ?remote.id, game_id = remote.game_id, "server acknowledged session");
                } else if local.resolved_by(&remote) {
                    *local = local.with_resolution(&remote);
                    debug!(
                        session_id = ?remote.id,
                        game_id = remote.game_id,
                        external_app_id = ?local.steam_app_id,
                        "server resolved store app session"
                    );
                }
            },
            ServerEvent::MySessionStatus(status) => {
                let pending = self.lock().pending_status.take();
                match pending {
                    Some((_, tx)) => {
                        let _ = tx.send(status);
                    },
                    None => debug!("unsolicited session status"),
                }
            },
            ServerEvent::SessionError(detail) => {
                warn!(%detail, "server reported a session error");
            },
            ServerEvent::SessionEnded(_)
            | ServerEvent::SessionUpdated(_)
            | ServerEvent::ActiveSessionsUpdated(_) => {
                trace!("session broadcast");
            },
            ServerEvent::Unknown(name) => trace!(event = %name, "ignoring server event"),
        }
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Open a session for `game_id`, closing any open one first. Store-app
    /// sessions pass [`proto::UNRESOLVED_GAME_ID`] plus the external id.
    /// Returns false when the channel is not connected.
    pub fn start_session(&self, game_id: i64, external_app_id: Option<String>) -> bool {
        let now = Utc::now();
        let mut shared = self.lock();
        if shared.connection != ConnectionState::Connected {
            debug!(game_id, "start_session skipped, channel not connected");
            return false;
        }

        if let Some(previous) = shared.session.take() {
            let ended = previous.closed(now);
            info!(
                game_id = ended.game_id,
                duration_seconds = ?ended.duration_seconds,
                "closing previous session"
            );
            shared.emit(&ClientEvent::GameSessionEnded(ended));
        }

        let session = GameSession::open(
            self.inner.client_id.clone(),
            game_id,
            external_app_id,
            now,
        );
        let sent = shared.emit(&ClientEvent::GameSessionStarted(session.clone()));
        if sent {
            info!(game_id, external_app_id = ?session.steam_app_id, "session started");
            shared.session = Some(session);
        }
        sent
    }

    /// Close the local session. When not connected the local record is still
    /// dropped and false is returned.
    pub fn end_session(&self) -> bool {
        let mut shared = self.lock();
        let Some(session) = shared.session.take() else {
            return false;
        };
        if shared.connection != ConnectionState::Connected {
            debug!(game_id = session.game_id, "channel not connected, dropping local session");
            return false;
        }
        let ended = session.closed(Utc::now());
        info!(
            game_id = ended.game_id,
            duration_seconds = ?ended.duration_seconds,
            "session ended"
        );
        shared.emit(&ClientEvent::GameSessionEnded(ended))
    }

    /// Close a session the server holds for this client without touching the
    /// local record.
    pub fn end_server_session(&self, remote: &GameSession) -> bool {
        let ended = remote.closed(Utc::now());
        let sent = self.lock().emit(&ClientEvent::GameSessionEnded(ended));
        if sent {
            info!(game_id = remote.game_id, "ended stale server session");
        }
        sent
    }

    /// Forget the local session without telling the server.
    pub fn discard_session(&self) -> Option<GameSession> {
        self.lock().session.take()
    }

    /// Take a server-side session as this client's own.
    pub fn adopt_session(&self, session: GameSession) {
        debug!(game_id = session.game_id, session_id = ?session.id, "adopting server session");
        self.lock().session = Some(GameSession {
            is_active: true,
            ..session
        });
    }

    /// Ask the server which session it holds for this client. `None` means
    /// no answer (not connected, timed out, or transport dropped), which is
    /// distinct from an answer with `has_session == false`.
    pub async fn check_session_with_server(&self) -> Option<SessionStatus> {
        let (id, rx) = {
            let mut shared = self.lock();
            shared.next_query += 1;
            let id = shared.next_query;
            let (tx, rx) = oneshot::channel();
            shared.pending_status = Some((id, tx));
            let query = ClientEvent::CheckMySession(SessionQuery {
                client_id: self.inner.client_id.clone(),
            });
            if !shared.emit(&query) {
                shared.pending_status = None;
                debug!("status query skipped, channel not connected");
                return None;
            }
            (id, rx)
        };

        let timeout = self.inner.opts.status_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(_)) => {
                debug!("status query abandoned");
                None
            },
            Err(_) => {
                let mut shared = self.lock();
                if shared
                    .pending_status
                    .as_ref()
                    .is_some_and(|(pending, _)| *pending == id)
                {
                    shared.pending_status = None;
                }
                warn!(timeout_ms = timeout.as_millis() as u64, "status query timed out");
                None
            },
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Register a state-change callback. Callbacks run on the task that
    /// caused the transition and must not block.
    pub fn on_status_change(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.subscribers.add(Arc::new(callback))
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state() == ConnectionState::Reconnecting
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().backoff.attempts()
    }

    pub fn current_session(&self) -> Option<GameSession> {
        self.lock().session.clone()
    }

    pub fn server_url(&self) -> String {
        self.lock().url.clone()
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }
}

async fn read_loop(weak: Weak<Inner>, mut stream: SplitStream<WsStream>, generation: u64) {
    while let Some(frame) = stream.next().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let channel = SessionChannel { inner };
        match frame {
            Ok(Message::Text(text)) => channel.handle_frame(text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => {
                debug!(error = %e, "session channel read failed");
                break;
            },
        }
    }
    if let Some(inner) = weak.upgrade() {
        SessionChannel { inner }.transport_lost(generation);
    }
}

/// Follow another task's connect attempt to its end.
async fn await_attempt(
    mut states: mpsc::UnboundedReceiver<ConnectionState>,
) -> Result<(), ChannelError> {
    while let Some(state) = states.recv().await {
        match state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting => {},
            ConnectionState::Reconnecting => return Err(ChannelError::AttemptFailed),
            ConnectionState::Disconnected => return Err(ChannelError::Aborted),
        }
    }
    Err(ChannelError::Aborted)
}

/// Turn a server base URL (`http://host:port`) into its WebSocket endpoint.
pub fn websocket_url(base: &str, path: &str) -> Result<String, ChannelError> {
    let invalid = |reason: &str| ChannelError::InvalidUrl {
        url: base.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(base.trim()).map_err(|e| invalid(&e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("unsupported scheme")),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid("cannot switch scheme"))?;

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    Ok(url.to_string())
}
