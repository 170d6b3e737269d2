//! One automation cycle: pre-roll switch, then a pinning pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, warn};

use crate::pinning::{PassResult, PinningEngine};
use crate::preroll::{PrerollEngine, PrerollError, PrerollOutcome};
use crate::store::ConfigStore;

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub pass: PassResult,
    pub preroll: Option<PrerollOutcome>,
    pub preroll_error: Option<String>,
}

impl CycleReport {
    /// Human-readable errors from both halves of the cycle.
    pub fn error_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self.pass.errors.iter().map(|e| e.to_string()).collect();
        if let Some(e) = &self.preroll_error {
            messages.push(format!("pre-roll: {}", e));
        }
        messages
    }
}

/// Work the scheduler drives on every tick or one-off run.
#[async_trait]
pub trait PassRunner: Send + Sync {
    async fn run(&self, now: DateTime<Local>) -> CycleReport;

    /// Time between scheduled runs.
    async fn interval(&self) -> Duration;
}

/// Production runner over the pre-roll and pinning engines.
pub struct Cycle {
    settings: Arc<ConfigStore>,
    pinning: Arc<PinningEngine>,
    preroll: Arc<PrerollEngine>,
}

impl Cycle {
    pub fn new(
        settings: Arc<ConfigStore>,
        pinning: Arc<PinningEngine>,
        preroll: Arc<PrerollEngine>,
    ) -> Self {
        Self {
            settings,
            pinning,
            preroll,
        }
    }
}

#[async_trait]
impl PassRunner for Cycle {
    async fn run(&self, now: DateTime<Local>) -> CycleReport {
        if self.settings.reload().await {
            debug!("settings reloaded from disk");
        }

        let (preroll, preroll_error) = match self.preroll.resolve_and_apply(now).await {
            Ok(outcome) => (Some(outcome), None),
            // Pre-roll management is optional.
            Err(PrerollError::FolderNotSet) => (None, None),
            Err(e) => {
                warn!(error = %e, "pre-roll not applied");
                (None, Some(e.to_string()))
            }
        };

        let pass = self.pinning.run_pass(now).await;
        CycleReport {
            pass,
            preroll,
            preroll_error,
        }
    }

    async fn interval(&self) -> Duration {
        self.settings.read(|s| s.interval()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::media::testing::FakeMediaServer;
    use crate::store::{JsonStore, EXEMPTIONS_FILE, LEDGER_FILE, SETTINGS_FILE};
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn cycle_with(dir: &TempDir, settings: Settings, media: FakeMediaServer) -> Cycle {
        let store = Arc::new(ConfigStore::open_in(dir.path(), SETTINGS_FILE));
        store.replace(settings).await.unwrap();
        let pinning = PinningEngine::new(
            Arc::new(media),
            Arc::clone(&store),
            Arc::new(JsonStore::open_in(dir.path(), LEDGER_FILE)),
            Arc::new(JsonStore::open_in(dir.path(), EXEMPTIONS_FILE)),
            2,
        );
        let preroll = PrerollEngine::new(Arc::clone(&store));
        Cycle::new(store, Arc::new(pinning), Arc::new(preroll))
    }

    #[tokio::test]
    async fn test_cycle_without_preroll_folder_runs_pass_only() {
        let dir = TempDir::new().unwrap();
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 5, false);
        let mut settings = Settings::default();
        settings.libraries = vec!["Movies".to_string()];
        settings.pinning_interval = 15;
        let cycle = cycle_with(&dir, settings, media).await;

        let report = cycle.run(Local.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap()).await;

        assert_eq!(report.pass.pinned.len(), 1);
        assert!(report.preroll.is_none());
        assert!(report.preroll_error.is_none());
        assert!(report.error_messages().is_empty());
        assert_eq!(cycle.interval().await, Duration::from_secs(15 * 60));
    }

    #[tokio::test]
    async fn test_cycle_uses_settings_edited_on_disk() {
        let dir = TempDir::new().unwrap();
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 5, false);
        let cycle = cycle_with(&dir, Settings::default(), media).await;
        let now = Local.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap();

        assert!(cycle.run(now).await.pass.pinned.is_empty());

        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"libraries": ["Movies"], "pinning_interval": 5}"#,
        )
        .unwrap();
        let report = cycle.run(now).await;

        assert_eq!(report.pass.pinned.len(), 1);
        assert_eq!(report.pass.pinned[0].collection, "Noir");
        assert_eq!(cycle.interval().await, Duration::from_secs(5 * 60));
    }

    #[tokio::test]
    async fn test_preroll_failure_reported_and_pass_still_runs() {
        let dir = TempDir::new().unwrap();
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 5, false);
        let mut settings = Settings::default();
        settings.libraries = vec!["Movies".to_string()];
        settings.pre_roll_folder = Some(dir.path().join("no-such-folder"));
        let cycle = cycle_with(&dir, settings, media).await;

        let report = cycle.run(Local.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap()).await;

        assert_eq!(report.pass.pinned.len(), 1);
        assert!(report.preroll_error.is_some());
        assert_eq!(report.error_messages().len(), 1);
        assert!(report.error_messages()[0].starts_with("pre-roll:"));
    }
}
