//! DynamiX daemon
//!
//! Rotates pinned collections on a Plex server according to time blocks and
//! season blocks, keeps the exclusion ledger and exemption list, switches the
//! active pre-roll and exposes run-state control over HTTP.

pub mod blocks;
pub mod concurrency;
pub mod cycle;
pub mod daemon;
pub mod dashboard;
pub mod exemptions;
pub mod holidays;
pub mod ledger;
pub mod media;
pub mod pinning;
pub mod plex;
pub mod preroll;
pub mod scheduler;
pub mod server;
pub mod settings_api;
pub mod startup;
pub mod store;

pub use dynamix_config as config;
pub use dynamix_config::{Config, Settings};

pub use blocks::{active_season_blocks, active_time_blocks, resolve_limit, LimitSource, ResolvedLimit};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use cycle::{Cycle, CycleReport, PassRunner};
pub use daemon::{Daemon, DaemonError};
pub use dashboard::{build_dashboard, DashboardData};
pub use exemptions::{ExemptionEntry, ExemptionList};
pub use holidays::{compute_easter, default_season_ranges, holiday_keywords, HolidayRange};
pub use ledger::{ExclusionEntry, ExclusionLedger};
pub use media::{Collection, Library, MediaError, MediaServer};
pub use pinning::{PassResult, PinningEngine};
pub use plex::PlexClient;
pub use preroll::{apply_preroll, PrerollEngine, PrerollError, PrerollOutcome};
pub use scheduler::{RunStateRecord, RunStatus, Scheduler, SchedulerError};
pub use server::{create_router, run_server, AppState, ServerError};
pub use startup::{run_startup_checks, StartupError};
pub use store::{ConfigStore, JsonStore, StoreError};
