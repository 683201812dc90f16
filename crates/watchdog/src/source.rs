use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind},
    tracing::trace,
};

use crate::{error::WatchdogError, normalize::normalize_executable, store};

/// Where process and store-app observations come from.
#[async_trait]
pub trait ProcessSource: Send + Sync {
    /// Normalized names of every running process.
    async fn running_process_names(&self) -> Result<HashSet<String>, WatchdogError>;

    /// Store app id the platform client reports as running. Never fails;
    /// anything unexpected is `None`.
    async fn current_external_app_id(&self) -> Option<String>;
}

/// Host process table via `sysinfo`, plus the Steam client's running app id.
pub struct SystemProcessSource {
    system: Arc<Mutex<System>>,
    store_probe: bool,
}

impl SystemProcessSource {
    pub fn new(store_probe: bool) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            store_probe,
        }
    }
}

impl Default for SystemProcessSource {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ProcessSource for SystemProcessSource {
    async fn running_process_names(&self) -> Result<HashSet<String>, WatchdogError> {
        let system = Arc::clone(&self.system);
        let names = tokio::task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(|e| e.into_inner());
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
            );

            let mut names = HashSet::with_capacity(sys.processes().len());
            for process in sys.processes().values() {
                names.insert(normalize_executable(&process.name().to_string_lossy()));
                // The short name may be truncated differently than the
                // executable path, so record both.
                if let Some(file) = process.exe().and_then(|p| p.file_name()) {
                    names.insert(normalize_executable(&file.to_string_lossy()));
                }
            }
            names.remove("");
            names
        })
        .await?;

        if names.is_empty() {
            return Err(WatchdogError::Listing("process table is empty".into()));
        }
        trace!(count = names.len(), "process table refreshed");
        Ok(names)
    }

    async fn current_external_app_id(&self) -> Option<String> {
        if !self.store_probe {
            return None;
        }
        store::running_app_id().await
    }
}
