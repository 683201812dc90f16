use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio::{sync::mpsc::UnboundedSender, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{
    candidates::{CandidateSet, ServerCandidate},
    probe::DiscoveryProbe,
};

/// Changes in the set of visible servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Discovered(ServerCandidate),
    Updated(ServerCandidate),
    Evicted(ServerCandidate),
}

/// Repeats discovery scans on an interval and ages candidates between them.
///
/// The watcher task is the only writer of the candidate map; [`snapshot`]
/// hands out copies.
///
/// [`snapshot`]: ServerWatcher::snapshot
pub struct ServerWatcher {
    candidates: Arc<Mutex<CandidateSet>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ServerWatcher {
    pub fn spawn(
        probe: DiscoveryProbe,
        interval: Duration,
        max_misses: u32,
        events: UnboundedSender<DiscoveryEvent>,
    ) -> Self {
        let candidates = Arc::new(Mutex::new(CandidateSet::new(max_misses)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_loop(
            probe,
            interval,
            Arc::clone(&candidates),
            cancel.clone(),
            events,
        ));
        Self {
            candidates,
            cancel,
            task: Some(task),
        }
    }

    pub fn snapshot(&self) -> Vec<ServerCandidate> {
        self.candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .list()
    }

    /// Stop scanning and wait for the in-flight scan to tear down.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn watch_loop(
    probe: DiscoveryProbe,
    interval: Duration,
    candidates: Arc<Mutex<CandidateSet>>,
    cancel: CancellationToken,
    events: UnboundedSender<DiscoveryEvent>,
) {
    info!(interval_ms = interval.as_millis() as u64, "server watcher started");
    loop {
        let found = probe.discover(&cancel).await;
        if cancel.is_cancelled() {
            break;
        }

        let report = candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .merge(&found);

        let outgoing = report
            .discovered
            .into_iter()
            .map(DiscoveryEvent::Discovered)
            .chain(report.updated.into_iter().map(DiscoveryEvent::Updated))
            .chain(report.evicted.into_iter().map(DiscoveryEvent::Evicted));
        for event in outgoing {
            if events.send(event).is_err() {
                debug!("discovery event receiver dropped, stopping watcher");
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("server watcher stopped");
}
