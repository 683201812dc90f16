use std::{sync::Arc, time::Duration};

use {
    nexus_config::WatchdogConfig,
    nexus_protocol::{self as proto, GameRecord, GameSession, ReconcileVerdict},
    nexus_watchdog::{Observation, ProcessWatchdog},
    tokio::{
        sync::mpsc,
        task::JoinHandle,
        time::{Instant, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::backend::SessionBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Watchdog poll cadence driving the session lifecycle.
    pub tick: Duration,
    /// Cadence of the server cross-check.
    pub cross_check: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from(&WatchdogConfig::default())
    }
}

impl From<&WatchdogConfig> for ReconcilerOptions {
    fn from(cfg: &WatchdogConfig) -> Self {
        Self {
            tick: Duration::from_millis(cfg.tick_ms.max(1)),
            cross_check: Duration::from_millis(cfg.cross_check_ms.max(1)),
        }
    }
}

/// What the reconciler observed or corrected.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerEvent {
    /// A catalog game's process was confirmed running.
    GameStarted(GameRecord),
    /// A tracked game stopped or was displaced. Carries the record so key
    /// holders can act on `needs_key`.
    GameStopped(GameRecord),
    ExternalAppStarted(String),
    ExternalAppStopped(String),
    /// The cross-check found a mismatch and issued corrective calls.
    Corrected(ReconcileVerdict),
}

/// Requests accepted by a running reconciler.
#[derive(Debug, Clone)]
pub enum Command {
    /// The user launched this game. Its session opens once the process shows up.
    Launch(GameRecord),
    CancelLaunch,
    SetCatalog(Vec<GameRecord>),
}

/// Which local evidence backs a session record.
enum Confirmation {
    Game(GameRecord),
    ExternalApp(String),
}

/// Keeps this client's session, the server's record, and the processes
/// actually running in agreement.
///
/// Lifecycle ticks and cross-checks run strictly one after another on the
/// reconciler's own task.
pub struct Reconciler {
    backend: Arc<dyn SessionBackend>,
    watchdog: ProcessWatchdog,
    opts: ReconcilerOptions,
    catalog: Vec<GameRecord>,
    pending: Option<GameRecord>,
    /// Game whose process has been confirmed running.
    running: Option<GameRecord>,
    current_external: Option<String>,
    /// The store app owns the session slot. Cleared when an explicit launch
    /// supersedes it or the app goes away.
    store_active: bool,
    events: Option<mpsc::UnboundedSender<ReconcilerEvent>>,
}

impl Reconciler {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        watchdog: ProcessWatchdog,
        opts: ReconcilerOptions,
    ) -> Self {
        Self {
            backend,
            watchdog,
            opts,
            catalog: Vec::new(),
            pending: None,
            running: None,
            current_external: None,
            store_active: false,
            events: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Vec<GameRecord>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Receive lifecycle events. A later call replaces the earlier receiver.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReconcilerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn set_catalog(&mut self, catalog: Vec<GameRecord>) {
        debug!(games = catalog.len(), "catalog updated");
        self.catalog = catalog;
    }

    /// Record a launch intent. No session is opened until the watchdog sees
    /// the game's process.
    pub fn launch(&mut self, game: GameRecord) {
        info!(game_id = game.id, name = %game.name, "waiting for game process");
        self.pending = Some(game);
    }

    pub fn cancel_launch(&mut self) {
        if let Some(game) = self.pending.take() {
            debug!(game_id = game.id, "launch intent cancelled");
        }
    }

    pub fn running_game(&self) -> Option<&GameRecord> {
        self.running.as_ref()
    }

    pub fn pending_launch(&self) -> Option<&GameRecord> {
        self.pending.as_ref()
    }

    pub fn external_app_id(&self) -> Option<&str> {
        self.current_external.as_deref()
    }

    fn emit(&self, event: ReconcilerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Launch(game) => self.launch(game),
            Command::CancelLaunch => self.cancel_launch(),
            Command::SetCatalog(catalog) => self.set_catalog(catalog),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// One watchdog poll followed by the lifecycle step. A failed poll skips
    /// the tick rather than treating every game as stopped.
    pub async fn tick(&mut self) {
        match self.watchdog.poll().await {
            Ok(observation) => self.apply(&observation),
            Err(e) => warn!(error = %e, "watchdog poll failed, skipping tick"),
        }
    }

    fn apply(&mut self, obs: &Observation) {
        self.follow_external_app(obs.external_app_id.as_deref());

        if let Some(game) = self.running.clone() {
            if obs.is_running(&game) {
                if !self.holds_game(&game)
                    && self.backend.is_connected()
                    && self.backend.start_session(game.id, None)
                {
                    info!(game_id = game.id, "session reopened for running game");
                }
                return;
            }

            self.running = None;
            info!(game_id = game.id, name = %game.name, "game process gone");
            if self.holds_game(&game) && !self.backend.end_session() {
                warn!(game_id = game.id, "failed to end session cleanly");
            }
            self.emit(ReconcilerEvent::GameStopped(game));
            return;
        }

        if let Some(game) = self.pending.clone()
            && obs.is_running(&game)
        {
            self.pending = None;
            info!(game_id = game.id, name = %game.name, "launched game process detected");
            // The explicit launch replaces any store-app session.
            self.store_active = false;
            self.track(game);
            return;
        }

        if self.store_active {
            self.resume_store_session();
            return;
        }

        let detected = self
            .catalog
            .iter()
            .filter(|game| game.kind.is_externally_launchable())
            .find(|game| obs.is_running(game))
            .cloned();
        if let Some(game) = detected {
            info!(game_id = game.id, name = %game.name, "external launch detected");
            self.track(game);
        }
    }

    fn track(&mut self, game: GameRecord) {
        if !self.backend.start_session(game.id, None) {
            warn!(game_id = game.id, "session not opened, will retry while the game runs");
        }
        self.emit(ReconcilerEvent::GameStarted(game.clone()));
        self.running = Some(game);
    }

    /// Whether the channel's local session belongs to `game`.
    fn holds_game(&self, game: &GameRecord) -> bool {
        self.backend
            .current_session()
            .is_some_and(|s| s.game_id == game.id)
    }

    fn holds_store_app(&self, app_id: &str) -> bool {
        self.backend
            .current_session()
            .is_some_and(|s| s.steam_app_id.as_deref() == Some(app_id))
    }

    /// Store-app ids are forwarded to the server as-is; a change is a
    /// stop of the old app and a start of the new one.
    fn follow_external_app(&mut self, reported: Option<&str>) {
        if reported == self.current_external.as_deref() {
            return;
        }

        let previous = self.current_external.take();
        if let Some(previous) = previous
            && self.store_active
        {
            self.store_active = false;
            info!(app_id = %previous, "store app stopped");
            // A new app id replaces the session through start_session.
            if reported.is_none()
                && self.holds_store_app(&previous)
                && !self.backend.end_session()
            {
                warn!(app_id = %previous, "failed to end store app session cleanly");
            }
            self.emit(ReconcilerEvent::ExternalAppStopped(previous));
        }

        let Some(app_id) = reported else {
            return;
        };
        info!(app_id, "store app detected");
        if let Some(displaced) = self.running.take() {
            self.emit(ReconcilerEvent::GameStopped(displaced));
        }
        self.current_external = Some(app_id.to_string());
        self.store_active = true;
        self.emit(ReconcilerEvent::ExternalAppStarted(app_id.to_string()));
        if !self
            .backend
            .start_session(proto::UNRESOLVED_GAME_ID, Some(app_id.to_string()))
        {
            warn!(app_id, "store app session not opened, will retry while the app runs");
        }
    }

    /// Open the store-app session again when the channel was down at
    /// detection or has since dropped the local record.
    fn resume_store_session(&mut self) {
        let Some(app_id) = self.current_external.clone() else {
            return;
        };
        if self.holds_store_app(&app_id) || !self.backend.is_connected() {
            return;
        }
        if self
            .backend
            .start_session(proto::UNRESOLVED_GAME_ID, Some(app_id.clone()))
        {
            info!(app_id, "store app session reopened");
        }
    }

    /// Startup sweep: pick up a store app or catalog game that was already
    /// running before the launcher started.
    pub async fn check_already_running(&mut self) {
        let obs = match self.watchdog.poll().await {
            Ok(obs) => obs,
            Err(e) => {
                warn!(error = %e, "startup process check failed");
                return;
            },
        };

        self.follow_external_app(obs.external_app_id.as_deref());
        if self.running.is_some() || self.store_active {
            return;
        }

        if let Some(game) = obs.first_running(&self.catalog).cloned() {
            info!(game_id = game.id, name = %game.name, "game already running at startup");
            self.track(game);
        }
    }

    // ── Cross-check ──────────────────────────────────────────────────────────

    /// Compare local, server, and observed state and correct any mismatch.
    /// Returns `None` when the server could not be asked.
    pub async fn cross_check(&mut self) -> Option<ReconcileVerdict> {
        if !self.backend.is_connected() {
            debug!("skipping session cross-check, channel not connected");
            return None;
        }
        let Some(status) = self.backend.check_session_with_server().await else {
            warn!("no session status from server");
            return None;
        };

        let local = self.backend.current_session();
        let server = status.active().cloned();
        let verdict = ReconcileVerdict::classify(local.as_ref(), server.as_ref());
        debug!(
            local = ?local.as_ref().map(|s| s.game_id),
            server = ?server.as_ref().map(|s| s.game_id),
            ?verdict,
            "session cross-check"
        );

        let obs = match verdict {
            ReconcileVerdict::InSync => {
                if let (Some(local), Some(server)) = (&local, &server)
                    && local.resolved_by(server)
                {
                    debug!(game_id = server.game_id, "server resolved the store app session");
                    self.backend.adopt_session(local.with_resolution(server));
                }
                return Some(verdict);
            },
            _ => match self.watchdog.poll().await {
                Ok(obs) => obs,
                Err(e) => {
                    warn!(error = %e, "cross-check poll failed, leaving sessions as they are");
                    return Some(verdict);
                },
            },
        };

        match (local, server) {
            (Some(local), None) => self.restore_local(local, &obs),
            (None, Some(server)) => {
                let confirmed = match self.confirm(&server, &obs) {
                    Some(found) => Some(found),
                    None => self.confirm_again(&server).await,
                };
                match confirmed {
                    Some(found) => self.adopt(server, found),
                    None => {
                        warn!(game_id = server.game_id, "server session has no running game, ending it");
                        self.backend.end_server_session(&server);
                    },
                }
            },
            (Some(local), Some(server)) => self.resolve_conflict(local, server, &obs),
            (None, None) => {},
        }

        self.emit(ReconcilerEvent::Corrected(verdict));
        Some(verdict)
    }

    /// Local session the server has lost.
    fn restore_local(&mut self, local: GameSession, obs: &Observation) {
        if self.confirm(&local, obs).is_some() {
            warn!(game_id = local.game_id, "server lost the running session, restarting it");
            self.backend.discard_session();
            let restarted = self
                .backend
                .start_session(local.game_id, local.steam_app_id.clone());
            if !restarted {
                self.backend.adopt_session(local);
            }
            return;
        }

        warn!(game_id = local.game_id, "local session outlived its game, clearing it");
        self.backend.discard_session();
        self.forget(&local);
    }

    /// Both sides hold a session, for different games.
    fn resolve_conflict(&mut self, local: GameSession, server: GameSession, obs: &Observation) {
        if self.confirm(&local, obs).is_some() {
            warn!(
                local = local.game_id,
                server = server.game_id,
                "server tracks the wrong game, correcting it"
            );
            self.backend.end_server_session(&server);
            self.backend.discard_session();
            self.backend
                .start_session(local.game_id, local.steam_app_id.clone());
            return;
        }

        warn!(
            local = local.game_id,
            server = server.game_id,
            "local game not running, accepting server session"
        );
        self.backend.discard_session();
        self.forget(&local);
        match self.confirm(&server, obs) {
            Some(found) => self.adopt(server, found),
            None => self.backend.adopt_session(server),
        }
    }

    /// Evidence that `session` is live on this machine.
    fn confirm(&self, session: &GameSession, obs: &Observation) -> Option<Confirmation> {
        if let Some(app_id) = session.steam_app_id.as_deref()
            && obs.external_app_id.as_deref() == Some(app_id)
        {
            return Some(Confirmation::ExternalApp(app_id.to_string()));
        }
        self.catalog
            .iter()
            .find(|game| game.id == session.game_id)
            .filter(|game| obs.is_running(game))
            .cloned()
            .map(Confirmation::Game)
    }

    /// One more poll before trusting that a server session is stale.
    async fn confirm_again(&self, session: &GameSession) -> Option<Confirmation> {
        match self.watchdog.poll().await {
            Ok(obs) => self.confirm(session, &obs),
            Err(e) => {
                debug!(error = %e, "confirmation poll failed");
                None
            },
        }
    }

    fn adopt(&mut self, server: GameSession, found: Confirmation) {
        info!(game_id = server.game_id, "adopting server session for a running game");
        self.backend.adopt_session(server);
        match found {
            Confirmation::Game(game) => {
                if self.pending.as_ref().is_some_and(|p| p.id == game.id) {
                    self.pending = None;
                }
                self.store_active = false;
                self.running = Some(game);
            },
            Confirmation::ExternalApp(app_id) => {
                self.running = None;
                self.current_external = Some(app_id);
                self.store_active = true;
            },
        }
    }

    /// Drop tracking that backed a session which turned out to be dead.
    fn forget(&mut self, session: &GameSession) {
        if self
            .running
            .as_ref()
            .is_some_and(|game| game.id == session.game_id)
            && let Some(game) = self.running.take()
        {
            self.emit(ReconcilerEvent::GameStopped(game));
        }
        if session.steam_app_id.is_some() && session.steam_app_id == self.current_external {
            self.store_active = false;
        }
    }

    // ── Task ─────────────────────────────────────────────────────────────────

    /// Run the startup sweep, then tick and cross-check until cancelled.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        self.check_already_running().await;

        let mut tick = tokio::time::interval(self.opts.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cross = tokio::time::interval_at(
            Instant::now() + self.opts.cross_check,
            self.opts.cross_check,
        );
        cross.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.opts.tick.as_millis() as u64,
            cross_check_ms = self.opts.cross_check.as_millis() as u64,
            "session reconciler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => self.tick().await,
                _ = cross.tick() => {
                    self.cross_check().await;
                }
                Some(command) = commands.recv() => self.handle(command),
            }
        }
        info!("session reconciler stopped");
    }

    /// Spawn [`run`](Self::run) on its own task.
    pub fn spawn(self) -> ReconcilerHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(rx, cancel.clone()));
        ReconcilerHandle {
            commands,
            cancel,
            task,
        }
    }
}

/// Control handle for a spawned [`Reconciler`].
pub struct ReconcilerHandle {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn launch(&self, game: GameRecord) -> bool {
        self.commands.send(Command::Launch(game)).is_ok()
    }

    pub fn cancel_launch(&self) -> bool {
        self.commands.send(Command::CancelLaunch).is_ok()
    }

    pub fn set_catalog(&self, catalog: Vec<GameRecord>) -> bool {
        self.commands.send(Command::SetCatalog(catalog)).is_ok()
    }

    /// Stop the loop after its current step and wait for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "reconciler task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        chrono::Utc,
        nexus_protocol::{GameKind, SessionStatus},
        nexus_watchdog::{ProcessSource, WatchdogError, normalize_executable},
        std::{
            collections::HashSet,
            sync::{
                Mutex,
                atomic::{AtomicBool, Ordering},
            },
        },
    };

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start(i64, Option<String>),
        End,
        EndServer(i64),
        Discard,
        Adopt(i64),
    }

    #[derive(Default)]
    struct BackendState {
        connected: bool,
        local: Option<GameSession>,
        status: Option<SessionStatus>,
        calls: Vec<Call>,
    }

    #[derive(Default)]
    struct FakeBackend {
        state: Mutex<BackendState>,
    }

    impl FakeBackend {
        fn connected() -> Arc<Self> {
            let backend = Self::default();
            backend.state.lock().unwrap().connected = true;
            Arc::new(backend)
        }

        fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        fn local(&self) -> Option<GameSession> {
            self.state.lock().unwrap().local.clone()
        }

        fn set_local(&self, game_id: i64) {
            self.state.lock().unwrap().local =
                Some(GameSession::open("rig", game_id, None, Utc::now()));
        }

        fn set_server(&self, game_id: Option<i64>) {
            self.set_server_session(game_id.map(|id| GameSession {
                id: Some(100 + id),
                ..GameSession::open("rig", id, None, Utc::now())
            }));
        }

        fn set_server_session(&self, session: Option<GameSession>) {
            self.state.lock().unwrap().status = Some(SessionStatus {
                has_session: session.is_some(),
                session,
            });
        }

        fn set_connected(&self, connected: bool) {
            self.state.lock().unwrap().connected = connected;
        }

        /// What `SessionChannel::disconnect` does to the local record.
        fn drop_local(&self) {
            self.state.lock().unwrap().local = None;
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        fn is_connected(&self) -> bool {
            self.state.lock().unwrap().connected
        }

        fn current_session(&self) -> Option<GameSession> {
            self.local()
        }

        fn start_session(&self, game_id: i64, external_app_id: Option<String>) -> bool {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return false;
            }
            state.local = Some(GameSession::open(
                "rig",
                game_id,
                external_app_id.clone(),
                Utc::now(),
            ));
            state.calls.push(Call::Start(game_id, external_app_id));
            true
        }

        fn end_session(&self) -> bool {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::End);
            state.local.take().is_some() && state.connected
        }

        fn end_server_session(&self, session: &GameSession) -> bool {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::EndServer(session.game_id));
            state.connected
        }

        fn discard_session(&self) -> Option<GameSession> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Discard);
            state.local.take()
        }

        fn adopt_session(&self, session: GameSession) {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Adopt(session.game_id));
            state.local = Some(session);
        }

        async fn check_session_with_server(&self) -> Option<SessionStatus> {
            self.state.lock().unwrap().status.clone()
        }
    }

    #[derive(Default)]
    struct FakeSource {
        running: Mutex<(HashSet<String>, Option<String>)>,
        fail: AtomicBool,
    }

    impl FakeSource {
        fn set(&self, processes: &[&str], external: Option<&str>) {
            *self.running.lock().unwrap() = (
                processes.iter().map(|p| normalize_executable(p)).collect(),
                external.map(String::from),
            );
        }
    }

    #[async_trait]
    impl ProcessSource for FakeSource {
        async fn running_process_names(&self) -> Result<HashSet<String>, WatchdogError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(WatchdogError::Listing("ps exploded".into()));
            }
            Ok(self.running.lock().unwrap().0.clone())
        }

        async fn current_external_app_id(&self) -> Option<String> {
            self.running.lock().unwrap().1.clone()
        }
    }

    fn game(id: i64, kind: GameKind, exe: &str) -> GameRecord {
        GameRecord {
            id,
            name: format!("game {id}"),
            kind,
            executables: vec![format!(r"C:\Games\{id}\{exe}")],
            executable: None,
            needs_key: false,
        }
    }

    struct Rig {
        reconciler: Reconciler,
        backend: Arc<FakeBackend>,
        source: Arc<FakeSource>,
        events: mpsc::UnboundedReceiver<ReconcilerEvent>,
    }

    fn rig(catalog: Vec<GameRecord>) -> Rig {
        let backend = FakeBackend::connected();
        let source = Arc::new(FakeSource::default());
        let mut reconciler = Reconciler::new(
            backend.clone(),
            ProcessWatchdog::new(source.clone()),
            ReconcilerOptions::default(),
        )
        .with_catalog(catalog);
        let events = reconciler.subscribe();
        Rig {
            reconciler,
            backend,
            source,
            events,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ReconcilerEvent>) -> Vec<ReconcilerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    // ── Cross-check ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn local_only_with_running_game_restarts_server_session() {
        let mut rig = rig(vec![game(3, GameKind::Archive, "game3.exe")]);
        rig.backend.set_local(3);
        rig.backend.set_server(None);
        rig.source.set(&["game3.exe"], None);

        let verdict = rig.reconciler.cross_check().await;

        assert_eq!(verdict, Some(ReconcileVerdict::LocalOnly));
        assert_eq!(rig.backend.calls(), vec![Call::Discard, Call::Start(3, None)]);
        assert_eq!(rig.backend.local().map(|s| s.game_id), Some(3));
        assert_eq!(
            drain(&mut rig.events),
            vec![ReconcilerEvent::Corrected(ReconcileVerdict::LocalOnly)]
        );
    }

    #[tokio::test]
    async fn local_only_without_process_clears_local() {
        let mut rig = rig(vec![game(3, GameKind::Archive, "game3.exe")]);
        rig.backend.set_local(3);
        rig.backend.set_server(None);
        rig.source.set(&["explorer.exe"], None);

        rig.reconciler.cross_check().await;

        assert_eq!(rig.backend.calls(), vec![Call::Discard]);
        assert!(rig.backend.local().is_none());
    }

    #[tokio::test]
    async fn server_only_without_process_ends_server_session() {
        let mut rig = rig(vec![game(5, GameKind::Shortcut, "five.exe")]);
        rig.backend.set_server(Some(5));
        rig.source.set(&["explorer.exe"], None);

        let verdict = rig.reconciler.cross_check().await;

        assert_eq!(verdict, Some(ReconcileVerdict::ServerOnly));
        assert_eq!(rig.backend.calls(), vec![Call::EndServer(5)]);
        assert!(rig.backend.local().is_none());
    }

    #[tokio::test]
    async fn server_only_with_running_game_adopts_and_tracks() {
        let five = game(5, GameKind::Shortcut, "five.exe");
        let mut rig = rig(vec![five.clone()]);
        rig.backend.set_server(Some(5));
        rig.source.set(&["five.exe"], None);

        rig.reconciler.cross_check().await;
        assert_eq!(rig.backend.calls(), vec![Call::Adopt(5)]);
        assert_eq!(rig.backend.local().and_then(|s| s.id), Some(105));
        assert_eq!(rig.reconciler.running_game().map(|g| g.id), Some(5));

        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls().len(), 1);

        rig.source.set(&[], None);
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls().last(), Some(&Call::End));
        assert!(drain(&mut rig.events).contains(&ReconcilerEvent::GameStopped(five)));
    }

    #[tokio::test]
    async fn conflict_with_running_local_game_corrects_server() {
        let mut rig = rig(vec![
            game(3, GameKind::Archive, "game3.exe"),
            game(5, GameKind::Shortcut, "five.exe"),
        ]);
        rig.backend.set_local(3);
        rig.backend.set_server(Some(5));
        rig.source.set(&["game3.exe"], None);

        let verdict = rig.reconciler.cross_check().await;

        assert_eq!(verdict, Some(ReconcileVerdict::Conflicting));
        assert_eq!(
            rig.backend.calls(),
            vec![Call::EndServer(5), Call::Discard, Call::Start(3, None)]
        );
        assert_eq!(rig.backend.local().map(|s| s.game_id), Some(3));
    }

    #[tokio::test]
    async fn conflict_without_local_game_accepts_server() {
        let mut rig = rig(vec![
            game(3, GameKind::Archive, "game3.exe"),
            game(5, GameKind::Shortcut, "five.exe"),
        ]);
        rig.backend.set_local(3);
        rig.backend.set_server(Some(5));
        rig.source.set(&["explorer.exe"], None);

        rig.reconciler.cross_check().await;

        assert_eq!(rig.backend.calls(), vec![Call::Discard, Call::Adopt(5)]);
        assert_eq!(rig.backend.local().map(|s| s.game_id), Some(5));
        assert!(rig.reconciler.running_game().is_none());
    }

    #[tokio::test]
    async fn in_sync_and_disconnected_do_nothing() {
        let mut rig = rig(vec![game(3, GameKind::Archive, "game3.exe")]);
        rig.backend.set_local(3);
        rig.backend.set_server(Some(3));
        assert_eq!(rig.reconciler.cross_check().await, Some(ReconcileVerdict::InSync));

        rig.backend.state.lock().unwrap().connected = false;
        assert_eq!(rig.reconciler.cross_check().await, None);

        assert!(rig.backend.calls().is_empty());
        assert!(drain(&mut rig.events).is_empty());
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn session_opens_only_once_process_is_seen() {
        let three = game(3, GameKind::Archive, "game3.exe");
        let mut rig = rig(vec![three.clone()]);
        rig.reconciler.launch(three.clone());

        rig.reconciler.tick().await;
        assert!(rig.backend.calls().is_empty());
        assert_eq!(rig.reconciler.pending_launch().map(|g| g.id), Some(3));

        rig.source.set(&["game3.exe"], None);
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls(), vec![Call::Start(3, None)]);
        assert!(rig.reconciler.pending_launch().is_none());

        rig.source.set(&[], None);
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls(), vec![Call::Start(3, None), Call::End]);
        assert!(rig.reconciler.running_game().is_none());
        assert_eq!(
            drain(&mut rig.events),
            vec![
                ReconcilerEvent::GameStarted(three.clone()),
                ReconcilerEvent::GameStopped(three)
            ]
        );
    }

    #[tokio::test]
    async fn external_launch_detects_first_launchable_and_never_preempts() {
        let mut rig = rig(vec![
            game(1, GameKind::Archive, "a.exe"),
            game(2, GameKind::Shortcut, "s.exe"),
            game(4, GameKind::Steam, "t.exe"),
        ]);
        rig.source.set(&["a.exe", "s.exe"], None);
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls(), vec![Call::Start(2, None)]);

        rig.source.set(&["a.exe", "s.exe", "t.exe"], None);
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls(), vec![Call::Start(2, None)]);
        assert_eq!(rig.reconciler.running_game().map(|g| g.id), Some(2));
    }

    #[tokio::test]
    async fn unlaunched_intent_does_not_block_external_detection() {
        let archive = game(1, GameKind::Archive, "a.exe");
        let mut rig = rig(vec![archive.clone(), game(2, GameKind::Shortcut, "s.exe")]);
        rig.reconciler.launch(archive);
        rig.source.set(&["s.exe"], None);

        rig.reconciler.tick().await;

        assert_eq!(rig.backend.calls(), vec![Call::Start(2, None)]);
        assert_eq!(rig.reconciler.pending_launch().map(|g| g.id), Some(1));
    }

    #[tokio::test]
    async fn store_app_start_and_stop() {
        let mut rig = rig(Vec::new());
        rig.source.set(&[], Some("440"));
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls(), vec![Call::Start(0, Some("440".into()))]);
        assert_eq!(rig.reconciler.external_app_id(), Some("440"));

        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls().len(), 1);

        rig.source.set(&[], None);
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls().last(), Some(&Call::End));
        assert_eq!(
            drain(&mut rig.events),
            vec![
                ReconcilerEvent::ExternalAppStarted("440".into()),
                ReconcilerEvent::ExternalAppStopped("440".into())
            ]
        );
    }

    #[tokio::test]
    async fn store_app_change_displaces_tracked_game() {
        let three = game(3, GameKind::Shortcut, "game3.exe");
        let mut rig = rig(vec![three.clone()]);
        rig.source.set(&["game3.exe"], None);
        rig.reconciler.tick().await;

        rig.source.set(&["game3.exe"], Some("570"));
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;

        assert_eq!(
            rig.backend.calls(),
            vec![Call::Start(3, None), Call::Start(0, Some("570".into()))]
        );
        assert!(rig.reconciler.running_game().is_none());
        assert!(drain(&mut rig.events).contains(&ReconcilerEvent::GameStopped(three)));
    }

    #[tokio::test]
    async fn failed_poll_keeps_tracking() {
        let mut rig = rig(vec![game(2, GameKind::Shortcut, "s.exe")]);
        rig.source.set(&["s.exe"], None);
        rig.reconciler.tick().await;

        rig.source.fail.store(true, Ordering::SeqCst);
        rig.reconciler.tick().await;

        assert_eq!(rig.backend.calls(), vec![Call::Start(2, None)]);
        assert_eq!(rig.reconciler.running_game().map(|g| g.id), Some(2));
    }

    #[tokio::test]
    async fn session_retried_when_channel_comes_back() {
        let mut rig = rig(vec![game(2, GameKind::Shortcut, "s.exe")]);
        rig.backend.state.lock().unwrap().connected = false;
        rig.source.set(&["s.exe"], None);
        rig.reconciler.tick().await;
        assert!(rig.backend.calls().is_empty());
        assert_eq!(rig.reconciler.running_game().map(|g| g.id), Some(2));

        rig.backend.state.lock().unwrap().connected = true;
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls(), vec![Call::Start(2, None)]);
    }

    #[tokio::test]
    async fn startup_sweep_picks_up_running_game() {
        let mut rig = rig(vec![
            game(1, GameKind::Archive, "a.exe"),
            game(2, GameKind::Shortcut, "s.exe"),
        ]);
        rig.source.set(&["a.exe", "s.exe"], None);

        rig.reconciler.check_already_running().await;

        assert_eq!(rig.backend.calls(), vec![Call::Start(1, None)]);
        assert_eq!(rig.reconciler.running_game().map(|g| g.id), Some(1));
    }

    #[tokio::test]
    async fn startup_sweep_prefers_store_app() {
        let mut rig = rig(vec![game(2, GameKind::Shortcut, "s.exe")]);
        rig.source.set(&["s.exe"], Some("440"));

        rig.reconciler.check_already_running().await;

        assert_eq!(rig.backend.calls(), vec![Call::Start(0, Some("440".into()))]);
        assert!(rig.reconciler.running_game().is_none());
    }

    #[tokio::test]
    async fn resolved_store_session_is_kept_across_cross_checks() {
        let mut rig = rig(Vec::new());
        rig.source.set(&[], Some("440"));
        rig.reconciler.tick().await;
        rig.backend.set_server_session(Some(GameSession {
            id: Some(77),
            ..GameSession::open("rig", 31, None, Utc::now())
        }));

        for _ in 0..2 {
            assert_eq!(rig.reconciler.cross_check().await, Some(ReconcileVerdict::InSync));
            rig.reconciler.tick().await;
        }

        assert_eq!(
            rig.backend.calls(),
            vec![Call::Start(0, Some("440".into())), Call::Adopt(31)]
        );
        let local = rig.backend.local().unwrap();
        assert_eq!(local.id, Some(77));
        assert_eq!(local.game_id, 31);
        assert_eq!(local.steam_app_id.as_deref(), Some("440"));
        assert!(
            !drain(&mut rig.events)
                .iter()
                .any(|e| matches!(e, ReconcilerEvent::Corrected(_)))
        );

        rig.source.set(&[], None);
        rig.reconciler.tick().await;
        assert_eq!(rig.backend.calls().last(), Some(&Call::End));
    }

    #[tokio::test]
    async fn store_session_opens_once_channel_is_back() {
        let mut rig = rig(Vec::new());
        rig.backend.set_connected(false);
        rig.source.set(&[], Some("440"));
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;
        assert!(rig.backend.calls().is_empty());
        assert_eq!(rig.reconciler.external_app_id(), Some("440"));

        rig.backend.set_connected(true);
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;

        assert_eq!(rig.backend.calls(), vec![Call::Start(0, Some("440".into()))]);
        assert_eq!(
            drain(&mut rig.events),
            vec![ReconcilerEvent::ExternalAppStarted("440".into())]
        );
    }

    #[tokio::test]
    async fn session_reopened_after_channel_dropped_local_record() {
        let mut rig = rig(vec![game(2, GameKind::Shortcut, "s.exe")]);
        rig.source.set(&["s.exe"], None);
        rig.reconciler.tick().await;

        rig.backend.drop_local();
        rig.backend.set_server(None);
        assert_eq!(rig.reconciler.cross_check().await, Some(ReconcileVerdict::InSync));
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;

        assert_eq!(rig.backend.calls(), vec![Call::Start(2, None), Call::Start(2, None)]);
        assert_eq!(rig.backend.local().map(|s| s.game_id), Some(2));
    }

    #[tokio::test]
    async fn store_session_reopened_after_channel_dropped_local_record() {
        let mut rig = rig(Vec::new());
        rig.source.set(&[], Some("440"));
        rig.reconciler.tick().await;

        rig.backend.drop_local();
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;

        assert_eq!(
            rig.backend.calls(),
            vec![
                Call::Start(0, Some("440".into())),
                Call::Start(0, Some("440".into()))
            ]
        );
    }

    #[tokio::test]
    async fn explicit_launch_supersedes_store_session() {
        let three = game(3, GameKind::Archive, "game3.exe");
        let mut rig = rig(vec![three.clone()]);
        rig.source.set(&[], Some("440"));
        rig.reconciler.launch(three);
        rig.reconciler.tick().await;

        rig.source.set(&["game3.exe"], Some("440"));
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;

        rig.source.set(&[], Some("440"));
        rig.reconciler.tick().await;
        rig.reconciler.tick().await;

        assert_eq!(
            rig.backend.calls(),
            vec![Call::Start(0, Some("440".into())), Call::Start(3, None), Call::End]
        );
    }

    // ── Task ─────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_follows_launch_intent() {
        let three = game(3, GameKind::Archive, "game3.exe");
        let rig = rig(vec![three.clone()]);
        let Rig {
            reconciler,
            backend,
            source,
            ..
        } = rig;

        let handle = reconciler.spawn();
        assert!(handle.launch(three));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(backend.calls().is_empty());

        source.set(&["game3.exe"], None);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(backend.calls(), vec![Call::Start(3, None)]);

        handle.shutdown().await;
    }
}
