//! User settings document (`config.json`)
//!
//! Holds the scheduling rules edited by the user: time blocks, season blocks,
//! always-pinned collections, limits and pre-roll options. Blocks are validated
//! one at a time; an invalid block is rejected with a warning and the rest of
//! the document still loads.

use crate::config::ConfigError;
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Limit used for a library with no entry in `default_limits`.
pub const FALLBACK_LIMIT: u32 = 5;

/// Title of the collection Plex maintains for recently aired episodes.
pub const NEW_EPISODES_TITLE: &str = "New Episodes";

/// A year-agnostic calendar day.
///
/// Ordering is by month, then day, so ranges can be compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    /// Build a month/day pair. February 29 is accepted.
    pub fn new(month: u32, day: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(month) {
            return None;
        }
        Some(Self { month, day })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

fn days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

impl FromStr for MonthDay {
    type Err = String;

    /// Accepts `MM-DD` or `YYYY-MM-DD` (the year is ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        let (month, day) = match parts.as_slice() {
            [m, d] => (*m, *d),
            [_, m, d] => (*m, *d),
            _ => return Err(format!("expected MM-DD or YYYY-MM-DD, got '{}'", s)),
        };
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        let day: u32 = day.parse().map_err(|_| format!("invalid day in '{}'", s))?;
        MonthDay::new(month, day).ok_or_else(|| format!("no such calendar day '{}'", s))
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl TryFrom<String> for MonthDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthDay> for String {
    fn from(value: MonthDay) -> Self {
        value.to_string()
    }
}

/// Recurring intraday window controlling how many collections a library pins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TimeBlockDef", into = "TimeBlockDef")]
pub struct TimeBlock {
    pub name: String,
    /// Days the block applies to; empty means every day.
    pub days: Vec<Weekday>,
    pub start: NaiveTime,
    /// Exclusive end of the window.
    pub end: NaiveTime,
    /// Pin limit per library while the block is active.
    pub limit: u32,
    /// Libraries the block applies to; empty means all libraries.
    pub libraries: Vec<String>,
    /// Wins over overlapping non-exclusive blocks instead of being unioned with them.
    pub exclusive: bool,
}

impl TimeBlock {
    pub fn applies_on(&self, weekday: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&weekday)
    }

    pub fn applies_to_library(&self, library: &str) -> bool {
        self.libraries.is_empty() || self.libraries.iter().any(|l| l == library)
    }

    pub fn contains_time(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Wire shape of a [`TimeBlock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBlockDef {
    pub name: String,
    #[serde(default)]
    pub days: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    pub limit: u32,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub exclusive: bool,
}

fn parse_time_of_day(block: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::InvalidBlock {
        name: block.to_string(),
        reason: format!("'{}' is not an HH:MM time", value),
    })
}

impl TryFrom<TimeBlockDef> for TimeBlock {
    type Error = ConfigError;

    fn try_from(def: TimeBlockDef) -> Result<Self, Self::Error> {
        let start = parse_time_of_day(&def.name, &def.start_time)?;
        let end = parse_time_of_day(&def.name, &def.end_time)?;
        if start >= end {
            return Err(ConfigError::InvalidBlock {
                name: def.name,
                reason: format!(
                    "start {} must be before end {}",
                    def.start_time, def.end_time
                ),
            });
        }

        let mut days = Vec::new();
        let mut any_day = false;
        for raw in &def.days {
            let raw = raw.trim();
            if raw.eq_ignore_ascii_case("any") || raw == "*" {
                any_day = true;
                continue;
            }
            let day = raw.parse::<Weekday>().map_err(|_| ConfigError::InvalidBlock {
                name: def.name.clone(),
                reason: format!("unknown day '{}'", raw),
            })?;
            if !days.contains(&day) {
                days.push(day);
            }
        }
        if any_day {
            days.clear();
        }

        Ok(TimeBlock {
            name: def.name,
            days,
            start,
            end,
            limit: def.limit,
            libraries: def.libraries,
            exclusive: def.exclusive,
        })
    }
}

impl From<TimeBlock> for TimeBlockDef {
    fn from(block: TimeBlock) -> Self {
        let days = if block.days.is_empty() {
            vec!["any".to_string()]
        } else {
            block.days.iter().map(|d| d.to_string()).collect()
        };
        TimeBlockDef {
            name: block.name,
            days,
            start_time: block.start.format("%H:%M").to_string(),
            end_time: block.end.format("%H:%M").to_string(),
            limit: block.limit,
            libraries: block.libraries,
            exclusive: block.exclusive,
        }
    }
}

/// What a season block drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppliesTo {
    #[default]
    Pinning,
    Preroll,
}

/// Target of a season block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeasonTarget {
    /// Pin `collection` in `libraries` (empty = all) while the block is active.
    Pinning {
        libraries: Vec<String>,
        collection: String,
    },
    /// Install `filename` from the pre-roll folder while the block is active.
    Preroll { filename: String },
}

/// Calendar date range, year-agnostic, that may wrap past December 31.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SeasonBlockDef", into = "SeasonBlockDef")]
pub struct SeasonBlock {
    pub name: String,
    pub start: MonthDay,
    /// Inclusive end day.
    pub end: MonthDay,
    pub target: SeasonTarget,
}

impl SeasonBlock {
    pub fn applies_to(&self) -> AppliesTo {
        match self.target {
            SeasonTarget::Pinning { .. } => AppliesTo::Pinning,
            SeasonTarget::Preroll { .. } => AppliesTo::Preroll,
        }
    }

    /// Whether this block pins in `library`. Always false for pre-roll blocks.
    pub fn pins_in_library(&self, library: &str) -> bool {
        match &self.target {
            SeasonTarget::Pinning { libraries, .. } => {
                libraries.is_empty() || libraries.iter().any(|l| l == library)
            }
            SeasonTarget::Preroll { .. } => false,
        }
    }
}

/// Wire shape of a [`SeasonBlock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonBlockDef {
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub applies_to: AppliesTo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl TryFrom<SeasonBlockDef> for SeasonBlock {
    type Error = ConfigError;

    fn try_from(def: SeasonBlockDef) -> Result<Self, Self::Error> {
        let invalid = |reason: String| ConfigError::InvalidBlock {
            name: def.name.clone(),
            reason,
        };
        let start: MonthDay = def.start_date.parse().map_err(invalid)?;
        let end: MonthDay = def.end_date.parse().map_err(invalid)?;

        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let target = match def.applies_to {
            AppliesTo::Pinning => SeasonTarget::Pinning {
                libraries: def.libraries.clone(),
                collection: non_empty(&def.collection)
                    .ok_or_else(|| invalid("pinning block needs a collection".to_string()))?,
            },
            AppliesTo::Preroll => SeasonTarget::Preroll {
                filename: non_empty(&def.filename)
                    .ok_or_else(|| invalid("pre-roll block needs a filename".to_string()))?,
            },
        };

        Ok(SeasonBlock {
            name: def.name,
            start,
            end,
            target,
        })
    }
}

impl From<SeasonBlock> for SeasonBlockDef {
    fn from(block: SeasonBlock) -> Self {
        let (applies_to, libraries, collection, filename) = match block.target {
            SeasonTarget::Pinning {
                libraries,
                collection,
            } => (AppliesTo::Pinning, libraries, Some(collection), None),
            SeasonTarget::Preroll { filename } => {
                (AppliesTo::Preroll, Vec::new(), None, Some(filename))
            }
        };
        SeasonBlockDef {
            name: block.name,
            start_date: block.start.to_string(),
            end_date: block.end.to_string(),
            applies_to,
            libraries,
            collection,
            filename,
        }
    }
}

/// A collection pinned on every pass in the listed libraries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedCollection {
    pub title: String,
    #[serde(default)]
    pub libraries: Vec<String>,
}

/// Hub surfaces touched by a pin or unpin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinningTargets {
    #[serde(default = "default_true")]
    pub library_recommended: bool,
    #[serde(default = "default_true")]
    pub home: bool,
    #[serde(default = "default_true")]
    pub shared_home: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PinningTargets {
    fn default() -> Self {
        Self {
            library_recommended: true,
            home: true,
            shared_home: true,
        }
    }
}

impl PinningTargets {
    pub fn any(&self) -> bool {
        self.library_recommended || self.home || self.shared_home
    }
}

/// What to do when a library has fewer eligible candidates than its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LedgerResetPolicy {
    /// Release the library's oldest exclusions until the pool reaches the limit.
    #[default]
    PurgeOldest,
    /// Never release exclusions early; pin fewer collections instead.
    Disabled,
}

/// The user settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SettingsDoc")]
pub struct Settings {
    pub libraries: Vec<String>,
    pub default_limits: BTreeMap<String, u32>,
    pub time_blocks: Vec<TimeBlock>,
    pub seasonal_blocks: Vec<SeasonBlock>,
    pub pinned_collections: Vec<PinnedCollection>,
    pub always_pin_new_episodes: bool,
    pub exclusion_days: u32,
    /// Minutes between scheduled passes.
    pub pinning_interval: u64,
    pub minimum_items: u32,
    pub pinning_targets: PinningTargets,
    pub selection_seed: Option<u64>,
    pub ledger_reset: LedgerResetPolicy,
    pub pre_roll_folder: Option<PathBuf>,
    pub default_preroll_filename: Option<String>,
    pub preroll_target_name: String,
}

/// Accepted shape of the settings document.
///
/// Older documents keep pre-roll blocks under `preroll_blocks`; they are
/// merged into `seasonal_blocks` as pre-roll season blocks.
#[derive(Deserialize)]
struct SettingsDoc {
    #[serde(default)]
    libraries: Vec<String>,
    #[serde(default)]
    default_limits: BTreeMap<String, u32>,
    #[serde(default, deserialize_with = "lenient_blocks")]
    time_blocks: Vec<TimeBlock>,
    #[serde(default, deserialize_with = "lenient_blocks")]
    seasonal_blocks: Vec<SeasonBlock>,
    #[serde(default, deserialize_with = "lenient_preroll_blocks")]
    preroll_blocks: Vec<SeasonBlock>,
    #[serde(default, deserialize_with = "lenient_blocks")]
    pinned_collections: Vec<PinnedCollection>,
    #[serde(default)]
    always_pin_new_episodes: bool,
    #[serde(default = "default_exclusion_days")]
    exclusion_days: u32,
    #[serde(default = "default_pinning_interval")]
    pinning_interval: u64,
    #[serde(default = "default_minimum_items")]
    minimum_items: u32,
    #[serde(default)]
    pinning_targets: PinningTargets,
    #[serde(default)]
    selection_seed: Option<u64>,
    #[serde(default)]
    ledger_reset: LedgerResetPolicy,
    #[serde(default)]
    pre_roll_folder: Option<PathBuf>,
    #[serde(default)]
    default_preroll_filename: Option<String>,
    #[serde(default = "default_preroll_target_name")]
    preroll_target_name: String,
}

impl From<SettingsDoc> for Settings {
    fn from(doc: SettingsDoc) -> Self {
        let mut seasonal_blocks = doc.seasonal_blocks;
        for block in doc.preroll_blocks {
            if !seasonal_blocks.contains(&block) {
                seasonal_blocks.push(block);
            }
        }
        Settings {
            libraries: doc.libraries,
            default_limits: doc.default_limits,
            time_blocks: doc.time_blocks,
            seasonal_blocks,
            pinned_collections: doc.pinned_collections,
            always_pin_new_episodes: doc.always_pin_new_episodes,
            exclusion_days: doc.exclusion_days,
            pinning_interval: doc.pinning_interval,
            minimum_items: doc.minimum_items,
            pinning_targets: doc.pinning_targets,
            selection_seed: doc.selection_seed,
            ledger_reset: doc.ledger_reset,
            pre_roll_folder: doc.pre_roll_folder,
            default_preroll_filename: doc.default_preroll_filename,
            preroll_target_name: doc.preroll_target_name,
        }
    }
}

fn default_exclusion_days() -> u32 {
    3
}

fn default_pinning_interval() -> u64 {
    30
}

fn default_minimum_items() -> u32 {
    1
}

fn default_preroll_target_name() -> String {
    "PlexMainPreRoll".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            libraries: Vec::new(),
            default_limits: BTreeMap::new(),
            time_blocks: Vec::new(),
            seasonal_blocks: Vec::new(),
            pinned_collections: Vec::new(),
            always_pin_new_episodes: false,
            exclusion_days: default_exclusion_days(),
            pinning_interval: default_pinning_interval(),
            minimum_items: default_minimum_items(),
            pinning_targets: PinningTargets::default(),
            selection_seed: None,
            ledger_reset: LedgerResetPolicy::default(),
            pre_roll_folder: None,
            default_preroll_filename: None,
            preroll_target_name: default_preroll_target_name(),
        }
    }
}

impl Settings {
    /// Parse the settings document, rejecting invalid blocks individually.
    pub fn parse_json(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Limit used for `library` when no time block is active.
    pub fn default_limit_for(&self, library: &str) -> u32 {
        self.default_limits
            .get(library)
            .copied()
            .unwrap_or(FALLBACK_LIMIT)
    }

    /// Time between scheduled passes, never less than one minute.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.pinning_interval.max(1).saturating_mul(60))
    }

    pub fn preroll_folder(&self) -> Option<&Path> {
        self.pre_roll_folder
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn default_preroll(&self) -> Option<&str> {
        self.default_preroll_filename
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Deserialize a list element by element, dropping entries that fail to parse.
///
/// A value that is not a list at all is treated as empty.
fn lenient_blocks<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => return Ok(Vec::new()),
        other => {
            tracing::warn!(found = %other, "expected a list of blocks, resetting to empty");
            return Ok(Vec::new());
        }
    };

    let mut blocks = Vec::with_capacity(items.len());
    for item in items {
        let name = item
            .get("name")
            .or_else(|| item.get("title"))
            .and_then(|n| n.as_str())
            .unwrap_or("<unnamed>")
            .to_string();
        match serde_json::from_value::<T>(item) {
            Ok(block) => blocks.push(block),
            Err(e) => tracing::warn!(block = %name, error = %e, "rejecting invalid block"),
        }
    }
    Ok(blocks)
}

/// [`lenient_blocks`] for entries of the legacy `preroll_blocks` list, which
/// carry no `applies_to` key.
fn lenient_preroll_blocks<'de, D>(deserializer: D) -> Result<Vec<SeasonBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut value = serde_json::Value::deserialize(deserializer)?;
    if let serde_json::Value::Array(items) = &mut value {
        for item in items.iter_mut() {
            if let Some(fields) = item.as_object_mut() {
                fields
                    .entry("applies_to")
                    .or_insert_with(|| serde_json::Value::from("preroll"));
            }
        }
    }
    lenient_blocks(value).map_err(serde::de::Error::custom)
}
