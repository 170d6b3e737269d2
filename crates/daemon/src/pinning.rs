//! Pinning engine
//!
//! One pass decides, per target library, which collections should be pinned
//! right now and reconciles the media server with that decision:
//!
//! 1. expired ledger entries are evicted
//! 2. each library is processed on a bounded worker pool
//! 3. the library's limit comes from the active time blocks
//! 4. always-pinned collections (New Episodes, configured pins, active
//!    pinning season blocks) are kept pinned
//! 5. rotation picks are drawn from the eligible pool with a seeded shuffle
//! 6. stale pins are removed, missing pins added, picks recorded in the ledger
//!
//! Failures are collected per collection; a pass never aborts part way.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blocks::{active_season_blocks, resolve_limit, ResolvedLimit};
use crate::config::{
    AppliesTo, LedgerResetPolicy, SeasonTarget, Settings, NEW_EPISODES_TITLE,
};
use crate::exemptions::ExemptionList;
use crate::ledger::{ExclusionEntry, ExclusionLedger};
use crate::media::{Collection, MediaServer};
use crate::store::{ConfigStore, JsonStore};

/// Which step of a pass failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassAction {
    ListCollections,
    Pin,
    Unpin,
    Ledger,
}

/// A non-fatal failure recorded during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassError {
    pub library: String,
    pub collection: Option<String>,
    pub action: PassAction,
    pub message: String,
}

impl std::fmt::Display for PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.collection {
            Some(c) => write!(f, "{:?} '{}' in '{}': {}", self.action, c, self.library, self.message),
            None => write!(f, "{:?} in '{}': {}", self.action, self.library, self.message),
        }
    }
}

/// A pin or unpin that succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinChange {
    pub library: String,
    pub collection: String,
}

impl PinChange {
    /// Dashboard label, `"<title> (<library>)"`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.collection, self.library)
    }
}

/// A library that ended up with fewer rotation picks than its limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub library: String,
    pub limit: u32,
    pub selected: u32,
}

/// Exclusions released early because a library ran short of candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerReset {
    pub library: String,
    pub released: Vec<String>,
}

/// Outcome of one pinning pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassResult {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pinned: Vec<PinChange>,
    pub unpinned: Vec<PinChange>,
    pub errors: Vec<PassError>,
    pub shortfalls: Vec<Shortfall>,
    pub ledger_resets: Vec<LedgerReset>,
    /// Effective limit per library.
    pub limits: BTreeMap<String, ResolvedLimit>,
}

impl PassResult {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            pinned: Vec::new(),
            unpinned: Vec::new(),
            errors: Vec::new(),
            shortfalls: Vec::new(),
            ledger_resets: Vec::new(),
            limits: BTreeMap::new(),
        }
    }

    pub fn pinned_labels(&self) -> Vec<String> {
        self.pinned.iter().map(PinChange::label).collect()
    }
}

/// What one library contributed to a pass.
#[derive(Debug, Default)]
struct LibraryOutcome {
    limit: Option<ResolvedLimit>,
    pinned: Vec<PinChange>,
    unpinned: Vec<PinChange>,
    errors: Vec<PassError>,
    shortfall: Option<Shortfall>,
    reset: Option<LedgerReset>,
    /// Ledger entries released by the reset policy.
    purged: Vec<ExclusionEntry>,
    /// Rotation picks that were pinned successfully.
    recorded: Vec<String>,
}

/// Everything a library worker needs, shared read-only across workers.
struct PassContext {
    settings: Settings,
    ledger: ExclusionLedger,
    exemptions: ExemptionList,
    now: DateTime<Local>,
    now_utc: DateTime<Utc>,
}

/// 64-bit FNV-1a.
fn fnv1a(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    text.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Seed for `library`'s shuffle.
pub fn selection_seed(settings: &Settings, library: &str, now: DateTime<Utc>) -> u64 {
    let base = settings
        .selection_seed
        .unwrap_or_else(|| now.timestamp() as u64);
    base ^ fnv1a(library)
}

/// Draw up to `limit` picks from `candidates`.
///
/// Candidates are sorted by title first, so the result depends only on the
/// candidate set and the seed.
pub fn select_candidates(mut candidates: Vec<Collection>, limit: usize, seed: u64) -> Vec<Collection> {
    candidates.sort_by(|a, b| a.title.cmp(&b.title));
    let mut rng = StdRng::seed_from_u64(seed);
    candidates.shuffle(&mut rng);
    candidates.truncate(limit);
    candidates
}

/// Titles in `collections` that must stay pinned in `library` at `now`.
pub fn always_pinned_titles(
    settings: &Settings,
    library: &str,
    collections: &[Collection],
    now: DateTime<Local>,
) -> BTreeSet<String> {
    let present: BTreeSet<&str> = collections.iter().map(|c| c.title.as_str()).collect();
    let mut wanted: Vec<String> = Vec::new();

    if settings.always_pin_new_episodes {
        if let Some(c) = collections
            .iter()
            .find(|c| c.title.eq_ignore_ascii_case(NEW_EPISODES_TITLE))
        {
            wanted.push(c.title.clone());
        }
    }

    for pinned in &settings.pinned_collections {
        if pinned.libraries.is_empty() || pinned.libraries.iter().any(|l| l == library) {
            wanted.push(pinned.title.clone());
        }
    }

    for block in active_season_blocks(&settings.seasonal_blocks, now.date_naive(), AppliesTo::Pinning) {
        if let SeasonTarget::Pinning { collection, .. } = &block.target {
            if block.pins_in_library(library) {
                wanted.push(collection.clone());
            }
        }
    }

    let mut titles = BTreeSet::new();
    for title in wanted {
        if present.contains(title.as_str()) {
            titles.insert(title);
        } else {
            debug!(library, collection = %title, "always-pinned collection not found in library");
        }
    }
    titles
}

/// Runs pinning passes against a media server.
pub struct PinningEngine {
    media: Arc<dyn MediaServer>,
    settings: Arc<ConfigStore>,
    ledger: Arc<JsonStore<ExclusionLedger>>,
    exemptions: Arc<JsonStore<ExemptionList>>,
    max_parallel: usize,
}

impl PinningEngine {
    pub fn new(
        media: Arc<dyn MediaServer>,
        settings: Arc<ConfigStore>,
        ledger: Arc<JsonStore<ExclusionLedger>>,
        exemptions: Arc<JsonStore<ExemptionList>>,
        max_parallel: usize,
    ) -> Self {
        Self {
            media,
            settings,
            ledger,
            exemptions,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run a pass over every configured library.
    pub async fn run_pass(&self, now: DateTime<Local>) -> PassResult {
        let libraries = self.settings.read(|s| s.libraries.clone()).await;
        self.run_pass_for(&libraries, now).await
    }

    /// Run a pass over `libraries` only.
    pub async fn run_pass_for(&self, libraries: &[String], now: DateTime<Local>) -> PassResult {
        let now_utc = now.with_timezone(&Utc);
        let mut result = PassResult::new(Utc::now());
        let settings = self.settings.snapshot().await;

        info!(pass = %result.id, libraries = libraries.len(), "starting pinning pass");
        if !settings.pinning_targets.any() {
            warn!("all pinning targets are disabled, pins will not be visible anywhere");
        }

        let exclusion_days = settings.exclusion_days;
        match self
            .ledger
            .update(|ledger| {
                let adopted = ledger.adopt_legacy(exclusion_days);
                (adopted, ledger.evict_expired(now_utc, exclusion_days))
            })
            .await
        {
            Ok((adopted, evicted)) => {
                if adopted > 0 {
                    info!(count = adopted, "adopted legacy exclusion entries");
                }
                if !evicted.is_empty() {
                    info!(count = evicted.len(), "evicted expired exclusions");
                }
            }
            Err(e) => {
                error!(error = %e, "failed to persist ledger eviction");
                result.errors.push(PassError {
                    library: String::new(),
                    collection: None,
                    action: PassAction::Ledger,
                    message: e.to_string(),
                });
            }
        }

        let context = Arc::new(PassContext {
            settings,
            ledger: self.ledger.snapshot().await,
            exemptions: self.exemptions.snapshot().await,
            now,
            now_utc,
        });

        let workers = self.max_parallel.min(libraries.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        for library in libraries {
            let media = Arc::clone(&self.media);
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            let library = library.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = process_library(media.as_ref(), &context, &library).await;
                (library, outcome)
            });
        }

        let mut purged = Vec::new();
        let mut recorded = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (library, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "library worker failed");
                    result.errors.push(PassError {
                        library: String::new(),
                        collection: None,
                        action: PassAction::ListCollections,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if let Some(limit) = outcome.limit {
                result.limits.insert(library.clone(), limit);
            }
            result.pinned.extend(outcome.pinned);
            result.unpinned.extend(outcome.unpinned);
            result.errors.extend(outcome.errors);
            result.shortfalls.extend(outcome.shortfall);
            result.ledger_resets.extend(outcome.reset);
            purged.extend(outcome.purged);
            recorded.extend(outcome.recorded.into_iter().map(|title| (library.clone(), title)));
        }

        if !purged.is_empty() || !recorded.is_empty() {
            let write = self
                .ledger
                .update(|ledger| {
                    for entry in &purged {
                        ledger.remove(&entry.library, &entry.collection);
                    }
                    for (library, title) in &recorded {
                        ledger.record(library, title, now_utc);
                    }
                })
                .await;
            if let Err(e) = write {
                error!(error = %e, "failed to persist exclusion ledger");
                result.errors.push(PassError {
                    library: String::new(),
                    collection: None,
                    action: PassAction::Ledger,
                    message: e.to_string(),
                });
            }
        }

        // Workers finish in any order.
        result.pinned.sort_by(|a, b| (&a.library, &a.collection).cmp(&(&b.library, &b.collection)));
        result.unpinned.sort_by(|a, b| (&a.library, &a.collection).cmp(&(&b.library, &b.collection)));
        result.finished_at = Utc::now();

        info!(
            pass = %result.id,
            pinned = result.pinned.len(),
            unpinned = result.unpinned.len(),
            errors = result.errors.len(),
            shortfalls = result.shortfalls.len(),
            "pinning pass finished"
        );
        result
    }

    /// Unpin every pinned collection in the configured libraries.
    ///
    /// New Episodes stays pinned while `always_pin_new_episodes` is set. The
    /// ledger is not touched.
    pub async fn clear_pins(&self) -> PassResult {
        let settings = self.settings.snapshot().await;
        let targets = settings.pinning_targets;
        let mut result = PassResult::new(Utc::now());
        info!(pass = %result.id, libraries = settings.libraries.len(), "clearing pins");

        for library in &settings.libraries {
            let collections = match self.media.list_collections(library, &targets).await {
                Ok(collections) => collections,
                Err(e) => {
                    error!(library = %library, error = %e, "failed to list collections");
                    result.errors.push(PassError {
                        library: library.clone(),
                        collection: None,
                        action: PassAction::ListCollections,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let keep = |c: &Collection| {
                settings.always_pin_new_episodes && c.title.eq_ignore_ascii_case(NEW_EPISODES_TITLE)
            };
            for collection in collections.iter().filter(|c| c.pinned && !keep(c)) {
                match self.media.unpin(collection, &targets).await {
                    Ok(()) => {
                        info!(library = %library, collection = %collection.title, "unpinned");
                        result.unpinned.push(PinChange {
                            library: library.clone(),
                            collection: collection.title.clone(),
                        });
                    }
                    Err(e) => {
                        error!(library = %library, collection = %collection.title, error = %e, "unpin failed");
                        result.errors.push(PassError {
                            library: library.clone(),
                            collection: Some(collection.title.clone()),
                            action: PassAction::Unpin,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        result.finished_at = Utc::now();
        info!(
            pass = %result.id,
            unpinned = result.unpinned.len(),
            errors = result.errors.len(),
            "pins cleared"
        );
        result
    }
}

async fn process_library(
    media: &dyn MediaServer,
    context: &PassContext,
    library: &str,
) -> LibraryOutcome {
    let mut outcome = LibraryOutcome::default();
    let settings = &context.settings;

    let listed = media.list_collections(library, &settings.pinning_targets).await;
    let mut collections = match listed {
        Ok(collections) => collections,
        Err(e) => {
            error!(library, error = %e, "failed to list collections");
            outcome.errors.push(PassError {
                library: library.to_string(),
                collection: None,
                action: PassAction::ListCollections,
                message: e.to_string(),
            });
            return outcome;
        }
    };
    for collection in &mut collections {
        collection.last_pinned = context
            .ledger
            .get(library, &collection.title)
            .map(|e| e.pinned_at);
    }

    let resolved = resolve_limit(settings, library, context.now.naive_local());
    let limit = resolved.limit as usize;
    outcome.limit = Some(resolved);

    let always = always_pinned_titles(settings, library, &collections, context.now);
    let rotatable = |c: &Collection| {
        !always.contains(&c.title)
            && !context.exemptions.is_exempt(library, &c.title)
            && c.item_count >= settings.minimum_items
            && !c.pinned
    };
    let excluded = |c: &Collection| {
        context
            .ledger
            .is_excluded(library, &c.title, context.now_utc, settings.exclusion_days)
    };

    let mut pool: Vec<Collection> = collections
        .iter()
        .filter(|c| rotatable(c) && !excluded(c))
        .cloned()
        .collect();

    if pool.len() < limit && settings.ledger_reset == LedgerResetPolicy::PurgeOldest {
        let releasable: BTreeSet<&str> = collections
            .iter()
            .filter(|c| rotatable(c) && excluded(c))
            .map(|c| c.title.as_str())
            .collect();
        let mut ledger = context.ledger.clone();
        let purged = ledger.purge_oldest(library, limit - pool.len(), |e| {
            releasable.contains(e.collection.as_str())
        });
        if !purged.is_empty() {
            let released: Vec<String> = purged.iter().map(|e| e.collection.clone()).collect();
            warn!(
                library,
                released = ?released,
                "candidate pool below limit, released oldest exclusions"
            );
            pool.extend(
                collections
                    .iter()
                    .filter(|c| released.contains(&c.title))
                    .cloned(),
            );
            outcome.reset = Some(LedgerReset {
                library: library.to_string(),
                released,
            });
            outcome.purged = purged;
        }
    }

    let seed = selection_seed(settings, library, context.now_utc);
    let selected = select_candidates(pool, limit, seed);
    if selected.len() < limit {
        warn!(
            library,
            limit,
            selected = selected.len(),
            "not enough eligible collections to reach the limit"
        );
        outcome.shortfall = Some(Shortfall {
            library: library.to_string(),
            limit: limit as u32,
            selected: selected.len() as u32,
        });
    }

    let selected_titles: BTreeSet<&str> = selected.iter().map(|c| c.title.as_str()).collect();
    let desired = |c: &Collection| always.contains(&c.title) || selected_titles.contains(c.title.as_str());
    let targets = &settings.pinning_targets;

    for collection in collections.iter().filter(|c| c.pinned && !desired(c)) {
        match media.unpin(collection, targets).await {
            Ok(()) => {
                info!(library, collection = %collection.title, "unpinned");
                outcome.unpinned.push(PinChange {
                    library: library.to_string(),
                    collection: collection.title.clone(),
                });
            }
            Err(e) => {
                error!(library, collection = %collection.title, error = %e, "unpin failed");
                outcome.errors.push(PassError {
                    library: library.to_string(),
                    collection: Some(collection.title.clone()),
                    action: PassAction::Unpin,
                    message: e.to_string(),
                });
            }
        }
    }

    for collection in collections.iter().filter(|c| !c.pinned && desired(c)) {
        match media.pin(collection, targets).await {
            Ok(()) => {
                info!(library, collection = %collection.title, "pinned");
                outcome.pinned.push(PinChange {
                    library: library.to_string(),
                    collection: collection.title.clone(),
                });
                if selected_titles.contains(collection.title.as_str()) {
                    outcome.recorded.push(collection.title.clone());
                }
            }
            Err(e) => {
                error!(library, collection = %collection.title, error = %e, "pin failed");
                outcome.errors.push(PassError {
                    library: library.to_string(),
                    collection: Some(collection.title.clone()),
                    action: PassAction::Pin,
                    message: e.to_string(),
                });
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinnedCollection;
    use crate::exemptions::ExemptionEntry;
    use crate::media::testing::FakeMediaServer;
    use crate::store::{EXEMPTIONS_FILE, LEDGER_FILE, SETTINGS_FILE};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        media: Arc<FakeMediaServer>,
        ledger: Arc<JsonStore<ExclusionLedger>>,
        exemptions: Arc<JsonStore<ExemptionList>>,
        engine: PinningEngine,
    }

    async fn harness(settings: Settings, media: FakeMediaServer) -> Harness {
        harness_with_workers(settings, media, 4).await
    }

    async fn harness_with_workers(settings: Settings, media: FakeMediaServer, workers: usize) -> Harness {
        let dir = TempDir::new().unwrap();
        let settings_store = Arc::new(ConfigStore::open_in(dir.path(), SETTINGS_FILE));
        settings_store.replace(settings).await.unwrap();
        let ledger = Arc::new(JsonStore::open_in(dir.path(), LEDGER_FILE));
        let exemptions = Arc::new(JsonStore::open_in(dir.path(), EXEMPTIONS_FILE));
        let media = Arc::new(media);
        let engine = PinningEngine::new(
            media.clone(),
            settings_store,
            Arc::clone(&ledger),
            Arc::clone(&exemptions),
            workers,
        );
        Harness {
            _dir: dir,
            media,
            ledger,
            exemptions,
            engine,
        }
    }

    fn settings(libraries: &[&str], limit: u32) -> Settings {
        let mut settings = Settings::default();
        settings.libraries = libraries.iter().map(|l| l.to_string()).collect();
        for library in libraries {
            settings.default_limits.insert(library.to_string(), limit);
        }
        settings.selection_seed = Some(7);
        settings
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 15, 20, 0, 0).unwrap()
    }

    fn titles(changes: &[PinChange]) -> Vec<String> {
        changes.iter().map(|c| c.collection.clone()).collect()
    }

    #[tokio::test]
    async fn test_short_pool_pins_what_is_available() {
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 10, false);
        media.add_collection("Movies", "Heist", 10, false);
        let h = harness(settings(&["Movies"], 3), media).await;

        let result = h.engine.run_pass(now()).await;

        assert_eq!(titles(&result.pinned), vec!["Heist", "Noir"]);
        assert!(result.errors.is_empty());
        assert_eq!(
            result.shortfalls,
            vec![Shortfall {
                library: "Movies".to_string(),
                limit: 3,
                selected: 2
            }]
        );
        assert_eq!(h.media.pinned_titles("Movies"), vec!["Heist", "Noir"]);
    }

    #[tokio::test]
    async fn test_picks_recorded_and_excluded_next_pass() {
        let media = FakeMediaServer::new();
        for title in ["A", "B", "C", "D"] {
            media.add_collection("Movies", title, 5, false);
        }
        let mut s = settings(&["Movies"], 2);
        s.ledger_reset = LedgerResetPolicy::Disabled;
        let h = harness(s, media).await;

        let first = h.engine.run_pass(now()).await;
        let first_picks = titles(&first.pinned);
        assert_eq!(first_picks.len(), 2);

        let ledger = h.ledger.snapshot().await;
        for title in &first_picks {
            let entry = ledger.get("Movies", title).expect("pick recorded");
            assert!(entry.pinned_at <= now().with_timezone(&Utc));
            assert!(ledger.is_excluded("Movies", title, now().with_timezone(&Utc), 3));
        }

        let second = h.engine.run_pass(now() + Duration::hours(1)).await;
        let second_picks = titles(&second.pinned);
        assert_eq!(second_picks.len(), 2);
        assert!(second_picks.iter().all(|t| !first_picks.contains(t)));
        assert_eq!(titles(&second.unpinned), first_picks);
    }

    #[tokio::test]
    async fn test_exempt_collections_never_selected() {
        let media = FakeMediaServer::new();
        for title in ["Kids", "Noir", "Heist", "Western"] {
            media.add_collection("Movies", title, 5, false);
        }
        let h = harness(settings(&["Movies"], 4), media).await;
        h.exemptions
            .update(|list| list.add(ExemptionEntry::new("Kids", None)))
            .await
            .unwrap();

        for hour in 0..6 {
            let result = h.engine.run_pass(now() + Duration::days(hour * 4)).await;
            assert!(!titles(&result.pinned).contains(&"Kids".to_string()));
        }
        assert!(!h.media.pinned_titles("Movies").contains(&"Kids".to_string()));
    }

    #[tokio::test]
    async fn test_always_pinned_never_unpinned_and_not_recorded() {
        let media = FakeMediaServer::new();
        media.add_collection("TV Shows", "New Episodes", 20, true);
        media.add_collection("TV Shows", "Staff Picks", 8, false);
        media.add_collection("TV Shows", "Sitcoms", 8, true);
        media.add_collection("TV Shows", "Dramas", 8, false);
        let mut s = settings(&["TV Shows"], 1);
        s.always_pin_new_episodes = true;
        s.pinned_collections = vec![PinnedCollection {
            title: "Staff Picks".to_string(),
            libraries: vec!["TV Shows".to_string()],
        }];
        let h = harness(s, media).await;

        let result = h.engine.run_pass(now()).await;

        assert!(result.errors.is_empty());
        assert_eq!(titles(&result.unpinned), vec!["Sitcoms"]);
        assert_eq!(titles(&result.pinned), vec!["Dramas", "Staff Picks"]);
        assert_eq!(
            h.media.pinned_titles("TV Shows"),
            vec!["Dramas", "New Episodes", "Staff Picks"]
        );
        let ledger = h.ledger.snapshot().await;
        assert!(ledger.get("TV Shows", "Dramas").is_some());
        assert!(ledger.get("TV Shows", "Staff Picks").is_none());
        assert!(ledger.get("TV Shows", "New Episodes").is_none());
    }

    #[tokio::test]
    async fn test_minimum_items_filters_candidates() {
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Tiny", 1, false);
        media.add_collection("Movies", "Big", 9, false);
        let mut s = settings(&["Movies"], 2);
        s.minimum_items = 3;
        let h = harness(s, media).await;

        let result = h.engine.run_pass(now()).await;

        assert_eq!(titles(&result.pinned), vec!["Big"]);
        assert_eq!(result.shortfalls.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_purges_oldest_exactly_as_needed() {
        let media = FakeMediaServer::new();
        for title in ["A", "B", "C"] {
            media.add_collection("Movies", title, 5, false);
        }
        let h = harness(settings(&["Movies"], 2), media).await;
        let base = now().with_timezone(&Utc);
        h.ledger
            .update(|l| {
                l.record("Movies", "A", base - Duration::hours(30));
                l.record("Movies", "B", base - Duration::hours(20));
                l.record("Movies", "C", base - Duration::hours(10));
            })
            .await
            .unwrap();

        let result = h.engine.run_pass(now()).await;

        assert_eq!(
            result.ledger_resets,
            vec![LedgerReset {
                library: "Movies".to_string(),
                released: vec!["A".to_string(), "B".to_string()],
            }]
        );
        assert_eq!(titles(&result.pinned), vec!["A", "B"]);
        assert!(result.shortfalls.is_empty());
        let ledger = h.ledger.snapshot().await;
        assert_eq!(ledger.get("Movies", "A").unwrap().pinned_at, base);
        assert_eq!(ledger.get("Movies", "C").unwrap().pinned_at, base - Duration::hours(10));
    }

    #[tokio::test]
    async fn test_reset_runs_only_when_pool_is_short() {
        let media = FakeMediaServer::new();
        for title in ["A", "B"] {
            media.add_collection("Movies", title, 5, false);
        }
        let h = harness(settings(&["Movies"], 1), media).await;
        let base = now().with_timezone(&Utc);
        h.ledger
            .update(|l| l.record("Movies", "B", base - Duration::hours(5)))
            .await
            .unwrap();

        // "A" is eligible, so nothing needs releasing.
        let result = h.engine.run_pass(now()).await;
        assert!(result.ledger_resets.is_empty());
        assert_eq!(titles(&result.pinned), vec!["A"]);

        let again = h.engine.run_pass(now()).await;
        assert_eq!(again.ledger_resets.len(), 1);
        assert_eq!(again.ledger_resets[0].released, vec!["B"]);

        let third = h.engine.run_pass(now()).await;
        assert!(third.ledger_resets.iter().all(|r| r.released.len() <= 1));
    }

    #[tokio::test]
    async fn test_disabled_reset_reports_shortfall() {
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "A", 5, false);
        let mut s = settings(&["Movies"], 1);
        s.ledger_reset = LedgerResetPolicy::Disabled;
        let h = harness(s, media).await;
        h.ledger
            .update(|l| l.record("Movies", "A", now().with_timezone(&Utc)))
            .await
            .unwrap();

        let result = h.engine.run_pass(now()).await;

        assert!(result.pinned.is_empty());
        assert!(result.ledger_resets.is_empty());
        assert_eq!(result.shortfalls[0].selected, 0);
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_pass_continues() {
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Broken", 5, false);
        media.add_collection("Movies", "Fine", 5, false);
        media.add_collection("TV Shows", "Sitcoms", 5, false);
        media.fail_library("TV Shows");
        media.fail_pin("Broken");
        let h = harness(settings(&["Movies", "TV Shows"], 2), media).await;

        let result = h.engine.run_pass(now()).await;

        assert_eq!(titles(&result.pinned), vec!["Fine"]);
        assert_eq!(result.errors.len(), 2);
        assert!(result
            .errors
            .iter()
            .any(|e| e.action == PassAction::ListCollections && e.library == "TV Shows"));
        assert!(result
            .errors
            .iter()
            .any(|e| e.action == PassAction::Pin && e.collection.as_deref() == Some("Broken")));
        let ledger = h.ledger.snapshot().await;
        assert!(ledger.get("Movies", "Broken").is_none());
        assert!(ledger.get("Movies", "Fine").is_some());
    }

    #[tokio::test]
    async fn test_expired_entries_evicted_at_pass_start() {
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "A", 5, false);
        let h = harness(settings(&["Movies"], 0), media).await;
        h.ledger
            .update(|l| l.record("Movies", "Old", now().with_timezone(&Utc) - Duration::days(4)))
            .await
            .unwrap();

        h.engine.run_pass(now()).await;

        assert!(h.ledger.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_active_season_block_pins_collection() {
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Irish Films", 5, false);
        media.add_collection("Movies", "Noir", 5, false);
        let mut s = settings(&["Movies"], 0);
        s.seasonal_blocks = vec![crate::config::SeasonBlock {
            name: "St. Patrick's".to_string(),
            start: "03-14".parse().unwrap(),
            end: "03-20".parse().unwrap(),
            target: SeasonTarget::Pinning {
                libraries: vec!["Movies".to_string()],
                collection: "Irish Films".to_string(),
            },
        }];
        let h = harness(s, media).await;

        let result = h.engine.run_pass(now()).await;
        assert_eq!(titles(&result.pinned), vec!["Irish Films"]);
        assert!(h.ledger.snapshot().await.get("Movies", "Irish Films").is_none());

        // Outside the season the collection is an ordinary pin and gets removed.
        let later = h.engine.run_pass(now() + Duration::days(30)).await;
        assert_eq!(titles(&later.unpinned), vec!["Irish Films"]);
    }

    #[tokio::test]
    async fn test_libraries_processed_with_bounded_parallelism() {
        let media = FakeMediaServer::with_delay(std::time::Duration::from_millis(100));
        let libraries = ["Anime", "Movies", "Music Videos", "TV Shows"];
        for library in libraries {
            media.add_collection(library, "Favorites", 5, false);
        }
        let h = harness_with_workers(settings(&libraries, 1), media, 2).await;

        let started = std::time::Instant::now();
        let result = h.engine.run_pass(now()).await;
        let elapsed = started.elapsed();

        // Four listings, two at a time.
        assert!(elapsed >= std::time::Duration::from_millis(200), "took {:?}", elapsed);
        assert!(result.errors.is_empty());
        let mut pinned_libraries: Vec<String> =
            h.media.pin_calls().into_iter().map(|(library, _)| library).collect();
        pinned_libraries.sort();
        assert_eq!(pinned_libraries, libraries);
        let joined: Vec<&str> = result.pinned.iter().map(|c| c.library.as_str()).collect();
        assert_eq!(joined, libraries);
        assert_eq!(result.limits.len(), 4);
    }

    #[tokio::test]
    async fn test_legacy_ledger_entries_exclude_in_every_library() {
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 5, false);
        media.add_collection("Movies", "Heist", 5, false);
        let mut s = settings(&["Movies"], 2);
        s.ledger_reset = LedgerResetPolicy::Disabled;
        let h = harness(s, media).await;
        let expiry = (now() + Duration::days(2)).date_naive();
        std::fs::write(
            h.ledger.path(),
            format!(r#"{{"Noir": "{}"}}"#, expiry.format("%Y-%m-%d")),
        )
        .unwrap();
        assert!(h.ledger.reload().await);

        let result = h.engine.run_pass(now()).await;

        assert_eq!(titles(&result.pinned), vec!["Heist"]);
        let ledger = h.ledger.snapshot().await;
        assert_eq!(ledger.pending_legacy(), 0);
        assert_eq!(ledger.get("Movies", "Noir").unwrap().library, "");
        assert!(ledger.get("Movies", "Heist").is_some());
    }

    #[tokio::test]
    async fn test_clear_pins_keeps_new_episodes() {
        let media = FakeMediaServer::new();
        media.add_collection("TV Shows", "New Episodes", 20, true);
        media.add_collection("TV Shows", "Sitcoms", 8, true);
        media.add_collection("TV Shows", "Dramas", 8, false);
        media.add_collection("Movies", "Noir", 8, true);
        let mut s = settings(&["TV Shows", "Movies"], 1);
        s.always_pin_new_episodes = true;
        let h = harness(s, media).await;
        h.ledger
            .update(|l| l.record("Movies", "Noir", now().with_timezone(&Utc)))
            .await
            .unwrap();

        let result = h.engine.clear_pins().await;

        assert!(result.errors.is_empty());
        let mut unpinned = h.media.unpin_calls();
        unpinned.sort();
        assert_eq!(
            unpinned,
            vec![
                ("Movies".to_string(), "Noir".to_string()),
                ("TV Shows".to_string(), "Sitcoms".to_string()),
            ]
        );
        assert_eq!(h.media.pinned_titles("TV Shows"), vec!["New Episodes"]);
        assert!(h.media.pinned_titles("Movies").is_empty());
        assert!(h.media.pin_calls().is_empty());
        assert_eq!(h.ledger.snapshot().await.len(), 1);
    }

    #[test]
    fn test_selection_is_deterministic_for_seed() {
        let collections: Vec<Collection> = ["E", "A", "D", "B", "C"]
            .iter()
            .map(|t| Collection {
                rating_key: t.to_string(),
                title: t.to_string(),
                library: "Movies".to_string(),
                item_count: 5,
                pinned: false,
                last_pinned: None,
            })
            .collect();
        let mut reversed = collections.clone();
        reversed.reverse();

        let a = select_candidates(collections, 3, 99);
        let b = select_candidates(reversed, 3, 99);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_seed_mixes_library_name() {
        let mut s = Settings::default();
        s.selection_seed = Some(42);
        let at = now().with_timezone(&Utc);
        assert_ne!(selection_seed(&s, "Movies", at), selection_seed(&s, "TV Shows", at));
        assert_eq!(selection_seed(&s, "Movies", at), 42 ^ fnv1a("Movies"));
        assert_eq!(fnv1a(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }
}
