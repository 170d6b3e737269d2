//! Block resolution
//!
//! Decides which time blocks and season blocks are active at a given local
//! wall-clock instant, and what pin limit a library ends up with when several
//! time blocks overlap. Everything here is pure; callers pass `now` in.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::config::{AppliesTo, MonthDay, SeasonBlock, Settings, TimeBlock};

/// How a library's limit was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    /// No time block active; the library's default limit applies.
    Default,
    /// Exactly one time block active.
    Single,
    /// Several non-exclusive blocks active; their limits are summed.
    Union,
    /// Several blocks active and the first exclusive one won.
    Exclusive,
}

/// Effective pin limit for one library at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLimit {
    pub limit: u32,
    /// Names of the blocks active for the library, in configuration order.
    pub blocks: Vec<String>,
    pub source: LimitSource,
}

impl ResolvedLimit {
    pub fn is_overlap(&self) -> bool {
        self.blocks.len() > 1
    }
}

/// Time blocks active at `now`, in configuration order.
pub fn active_time_blocks(blocks: &[TimeBlock], now: NaiveDateTime) -> Vec<&TimeBlock> {
    let weekday = now.weekday();
    let time = now.time();
    blocks
        .iter()
        .filter(|b| b.applies_on(weekday) && b.contains_time(time))
        .collect()
}

/// Compute the pin limit for `library` at `now`.
pub fn resolve_limit(settings: &Settings, library: &str, now: NaiveDateTime) -> ResolvedLimit {
    let active: Vec<&TimeBlock> = active_time_blocks(&settings.time_blocks, now)
        .into_iter()
        .filter(|b| b.applies_to_library(library))
        .collect();
    let blocks: Vec<String> = active.iter().map(|b| b.name.clone()).collect();

    match active.as_slice() {
        [] => ResolvedLimit {
            limit: settings.default_limit_for(library),
            blocks,
            source: LimitSource::Default,
        },
        [only] => ResolvedLimit {
            limit: only.limit,
            blocks,
            source: LimitSource::Single,
        },
        many => {
            if let Some(winner) = many.iter().find(|b| b.exclusive) {
                tracing::warn!(
                    library,
                    blocks = ?blocks,
                    winner = %winner.name,
                    "overlapping time blocks, exclusive block wins"
                );
                ResolvedLimit {
                    limit: winner.limit,
                    blocks,
                    source: LimitSource::Exclusive,
                }
            } else {
                let limit = many.iter().map(|b| b.limit).sum();
                tracing::info!(
                    library,
                    blocks = ?blocks,
                    limit,
                    "overlapping time blocks, limits combined"
                );
                ResolvedLimit {
                    limit,
                    blocks,
                    source: LimitSource::Union,
                }
            }
        }
    }
}

/// Whether `day` lies in the inclusive range `start..=end`, which may wrap
/// past December 31.
pub fn month_day_in_range(day: MonthDay, start: MonthDay, end: MonthDay) -> bool {
    if start <= end {
        start <= day && day <= end
    } else {
        day >= start || day <= end
    }
}

/// Season blocks of kind `applies_to` active on `today`, in configuration order.
pub fn active_season_blocks(
    blocks: &[SeasonBlock],
    today: NaiveDate,
    applies_to: AppliesTo,
) -> Vec<&SeasonBlock> {
    let day = MonthDay::from_date(today);
    blocks
        .iter()
        .filter(|b| b.applies_to() == applies_to && month_day_in_range(day, b.start, b.end))
        .collect()
}
