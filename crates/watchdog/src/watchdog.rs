use std::{collections::HashSet, sync::Arc};

use {nexus_protocol::GameRecord, tracing::debug};

use crate::{
    error::WatchdogError,
    normalize::normalize_executable,
    source::{ProcessSource, SystemProcessSource},
};

/// One poll of the host: running processes and the store app id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub processes: HashSet<String>,
    pub external_app_id: Option<String>,
}

impl Observation {
    /// Whether any of the game's declared executables is running.
    pub fn is_running(&self, game: &GameRecord) -> bool {
        game.declared_executables()
            .into_iter()
            .map(normalize_executable)
            .any(|exe| !exe.is_empty() && self.processes.contains(&exe))
    }

    /// First game in `games` that is running.
    pub fn first_running<'a>(
        &self,
        games: impl IntoIterator<Item = &'a GameRecord>,
    ) -> Option<&'a GameRecord> {
        games.into_iter().find(|game| self.is_running(game))
    }
}

#[derive(Clone)]
pub struct ProcessWatchdog {
    source: Arc<dyn ProcessSource>,
}

impl ProcessWatchdog {
    pub fn new(source: Arc<dyn ProcessSource>) -> Self {
        Self { source }
    }

    /// Watchdog over the host process table.
    pub fn system(store_probe: bool) -> Self {
        Self::new(Arc::new(SystemProcessSource::new(store_probe)))
    }

    pub async fn list_running_process_names(&self) -> Result<HashSet<String>, WatchdogError> {
        self.source.running_process_names().await
    }

    pub async fn current_external_app_id(&self) -> Option<String> {
        self.source.current_external_app_id().await
    }

    /// Process table and store app id, fetched concurrently.
    pub async fn poll(&self) -> Result<Observation, WatchdogError> {
        let (processes, external_app_id) = tokio::join!(
            self.source.running_process_names(),
            self.source.current_external_app_id()
        );
        let processes = processes.inspect_err(|e| debug!(error = %e, "process poll failed"))?;
        Ok(Observation {
            processes,
            external_app_id,
        })
    }

    /// Whether `game` is running right now.
    pub async fn is_running(&self, game: &GameRecord) -> Result<bool, WatchdogError> {
        let processes = self.source.running_process_names().await?;
        Ok(Observation {
            processes,
            external_app_id: None,
        }
        .is_running(game))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, async_trait::async_trait, nexus_protocol::GameKind};

    struct Fixed(Vec<&'static str>, Option<&'static str>);

    #[async_trait]
    impl ProcessSource for Fixed {
        async fn running_process_names(&self) -> Result<HashSet<String>, WatchdogError> {
            if self.0.is_empty() {
                return Err(WatchdogError::Listing("boom".into()));
            }
            Ok(self.0.iter().map(|n| normalize_executable(n)).collect())
        }

        async fn current_external_app_id(&self) -> Option<String> {
            self.1.map(String::from)
        }
    }

    fn game(id: i64, exes: &[&str]) -> GameRecord {
        GameRecord {
            id,
            name: format!("game {id}"),
            kind: GameKind::Shortcut,
            executables: exes.iter().map(|e| e.to_string()).collect(),
            executable: None,
            needs_key: false,
        }
    }

    #[tokio::test]
    async fn matches_any_path_form() {
        let watchdog = ProcessWatchdog::new(Arc::new(Fixed(vec!["foo.exe", "explorer.exe"], None)));
        let obs = watchdog.poll().await.unwrap();

        assert!(obs.is_running(&game(1, &[r"C:\Games\Foo\foo.exe"])));
        assert!(obs.is_running(&game(2, &["/games/foo/foo.exe"])));
        assert!(obs.is_running(&game(3, &["foo.exe"])));
        assert!(!obs.is_running(&game(4, &["bar.exe"])));
        assert!(!obs.is_running(&game(5, &[])));
    }

    #[tokio::test]
    async fn legacy_executable_field_counts() {
        let watchdog = ProcessWatchdog::new(Arc::new(Fixed(vec!["launcher.exe"], None)));
        let record = GameRecord {
            executable: Some(r"C:\Games\Bar\launcher.exe".into()),
            ..game(9, &["bar.exe"])
        };
        assert!(watchdog.is_running(&record).await.unwrap());
    }

    #[tokio::test]
    async fn first_running_follows_catalog_order() {
        let watchdog = ProcessWatchdog::new(Arc::new(Fixed(vec!["b.exe", "a.exe"], Some("440"))));
        let obs = watchdog.poll().await.unwrap();
        let catalog = [game(1, &["c.exe"]), game(2, &["a.exe"]), game(3, &["b.exe"])];
        assert_eq!(obs.first_running(&catalog).map(|g| g.id), Some(2));
        assert_eq!(obs.external_app_id.as_deref(), Some("440"));
    }

    #[tokio::test]
    async fn listing_failure_propagates() {
        let watchdog = ProcessWatchdog::new(Arc::new(Fixed(Vec::new(), Some("440"))));
        assert!(watchdog.poll().await.is_err());
        assert_eq!(watchdog.current_external_app_id().await.as_deref(), Some("440"));
    }

    #[tokio::test]
    async fn system_source_lists_this_process() {
        let names = SystemProcessSource::new(false)
            .running_process_names()
            .await
            .unwrap();
        assert!(!names.is_empty());
    }
}
