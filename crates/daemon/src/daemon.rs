//! Daemon startup and wiring for DynamiX
//!
//! Opens the state documents, builds the Plex client and the engines, resumes
//! the schedule and serves the HTTP surface.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::cycle::Cycle;
use crate::media::{MediaError, MediaServer};
use crate::pinning::PinningEngine;
use crate::plex::PlexClient;
use crate::preroll::PrerollEngine;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::server::{run_server, AppState, ServerError};
use crate::startup::{listen_addr, run_startup_checks, StartupError};
use crate::store::{ConfigStore, JsonStore, EXEMPTIONS_FILE, LEDGER_FILE, RUN_STATE_FILE, SETTINGS_FILE};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("media server client: {0}")]
    Media(#[from] MediaError),

    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    pub config: Config,
    pub concurrency_plan: ConcurrencyPlan,
    /// Handles shared with the HTTP surface.
    pub state: AppState,
}

impl Daemon {
    /// Run startup checks, then wire everything up.
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Self::new_without_checks(config)
    }

    /// Wire up the daemon without running startup checks.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        let media: Arc<dyn MediaServer> = Arc::new(PlexClient::new(&config.media_server)?);
        Self::with_media(config, media)
    }

    /// Wire up the daemon against an arbitrary media server.
    pub fn with_media(config: Config, media: Arc<dyn MediaServer>) -> Result<Self, DaemonError> {
        let dir = config.state.dir.clone();
        std::fs::create_dir_all(&dir)?;
        let concurrency_plan = derive_plan(&config);

        let settings = Arc::new(ConfigStore::open_in(&dir, SETTINGS_FILE));
        let ledger = Arc::new(JsonStore::open_in(&dir, LEDGER_FILE));
        let exemptions = Arc::new(JsonStore::open_in(&dir, EXEMPTIONS_FILE));
        let run_state = Arc::new(JsonStore::open_in(&dir, RUN_STATE_FILE));

        let pinning = Arc::new(PinningEngine::new(
            Arc::clone(&media),
            Arc::clone(&settings),
            Arc::clone(&ledger),
            Arc::clone(&exemptions),
            concurrency_plan.max_parallel_libraries as usize,
        ));
        let preroll = Arc::new(PrerollEngine::new(Arc::clone(&settings)));
        let cycle = Arc::new(Cycle::new(
            Arc::clone(&settings),
            Arc::clone(&pinning),
            Arc::clone(&preroll),
        ));
        let scheduler = Scheduler::new(cycle, run_state);

        info!(
            state_dir = %dir.display(),
            max_parallel_libraries = concurrency_plan.max_parallel_libraries,
            "daemon initialized"
        );

        Ok(Self {
            config,
            concurrency_plan,
            state: AppState {
                scheduler,
                settings,
                ledger,
                exemptions,
                pinning,
                preroll,
                media,
            },
        })
    }

    /// Resume a previously active schedule, then serve HTTP until shutdown.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let addr = listen_addr(&self.config)?;
        self.adopt_legacy_ledger().await;
        if self.state.scheduler.restore().await? {
            info!("resumed schedule from persisted run state");
        }
        run_server(self.state.clone(), addr).await?;
        info!("daemon stopped");
        Ok(())
    }
}

impl Daemon {
    /// Convert a ledger loaded in the older title-to-expiry shape.
    async fn adopt_legacy_ledger(&self) {
        if self.state.ledger.read(|l| l.pending_legacy()).await == 0 {
            return;
        }
        let exclusion_days = self.state.settings.read(|s| s.exclusion_days).await;
        match self
            .state
            .ledger
            .update(|ledger| ledger.adopt_legacy(exclusion_days))
            .await
        {
            Ok(adopted) => info!(adopted, "converted legacy exclusion ledger"),
            Err(e) => warn!(error = %e, "failed to rewrite legacy exclusion ledger"),
        }
    }
}
