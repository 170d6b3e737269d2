//! Dashboard snapshot served by `GET /dashboard_data`.
//!
//! Combines run state, store sizes and the block resolver's view of "now"
//! into one JSON document.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::blocks::{active_season_blocks, resolve_limit, LimitSource};
use crate::config::{AppliesTo, SeasonTarget, Settings};
use crate::exemptions::ExemptionList;
use crate::ledger::ExclusionLedger;
use crate::scheduler::{RunStateRecord, RunStatus};

/// Per-library view of the current rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryStatus {
    pub library: String,
    pub limit: u32,
    pub limit_source: LimitSource,
    /// Time blocks active for the library right now.
    pub active_blocks: Vec<String>,
    /// Collections held pinned by active season blocks.
    pub seasonal_collections: Vec<String>,
    /// Collections currently cooling down.
    pub excluded: usize,
}

/// Complete dashboard snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
    pub state: RunStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// `None` when the media server could not be reached.
    pub total_collections: Option<usize>,
    pub pinned_today: usize,
    pub exclusions_active: usize,
    pub exemptions_count: usize,
    pub libraries: Vec<LibraryStatus>,
    pub pinned_collections: Vec<String>,
    pub last_errors: Vec<String>,
    pub current_roll: Option<String>,
}

/// Inputs gathered by the caller; building the snapshot itself is pure.
pub struct DashboardInputs<'a> {
    pub settings: &'a Settings,
    pub ledger: &'a ExclusionLedger,
    pub exemptions: &'a ExemptionList,
    pub run_state: &'a RunStateRecord,
    pub total_collections: Option<usize>,
    pub current_roll: Option<String>,
}

pub fn build_dashboard(inputs: DashboardInputs<'_>, now: DateTime<Local>) -> DashboardData {
    let DashboardInputs {
        settings,
        ledger,
        exemptions,
        run_state,
        total_collections,
        current_roll,
    } = inputs;
    let now_utc = now.with_timezone(&Utc);
    let today = now.date_naive();
    let season = active_season_blocks(&settings.seasonal_blocks, today, AppliesTo::Pinning);

    let libraries = settings
        .libraries
        .iter()
        .map(|library| {
            let resolved = resolve_limit(settings, library, now.naive_local());
            let seasonal_collections = season
                .iter()
                .filter(|b| b.pins_in_library(library))
                .filter_map(|b| match &b.target {
                    SeasonTarget::Pinning { collection, .. } => Some(collection.clone()),
                    SeasonTarget::Preroll { .. } => None,
                })
                .collect();
            let excluded = ledger
                .for_library(library)
                .filter(|e| !e.is_expired(now_utc, settings.exclusion_days))
                .count();
            LibraryStatus {
                library: library.clone(),
                limit: resolved.limit,
                limit_source: resolved.source,
                active_blocks: resolved.blocks,
                seasonal_collections,
                excluded,
            }
        })
        .collect();

    let pinned_today = if run_state.pinned_day == Some(today) {
        run_state.pinned_today.len()
    } else {
        0
    };

    DashboardData {
        state: run_state.state,
        last_run: run_state.last_run,
        next_run: run_state.next_run,
        total_collections,
        pinned_today,
        exclusions_active: ledger
            .entries()
            .iter()
            .filter(|e| !e.is_expired(now_utc, settings.exclusion_days))
            .count(),
        exemptions_count: exemptions.len(),
        libraries,
        pinned_collections: run_state.recently_pinned.clone(),
        last_errors: run_state.last_errors.clone(),
        current_roll,
    }
}
