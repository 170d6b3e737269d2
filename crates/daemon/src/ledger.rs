//! Exclusion ledger: cooldown tracking for recently pinned collections.
//!
//! Every rotation pick is recorded with the time it was pinned. While an entry
//! is younger than `exclusion_days` the collection is kept out of the
//! candidate pool; older entries are evicted at the start of every pass.
//!
//! Older installs stored the ledger as a `{title: "YYYY-MM-DD"}` map of expiry
//! dates. Such files still load; their entries are held aside until
//! [`ExclusionLedger::adopt_legacy`] converts them with the configured
//! cooldown. Adopted entries have an empty library and apply to every library.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A collection that was pinned and is cooling down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionEntry {
    /// Empty for entries adopted from the legacy format.
    pub library: String,
    /// Collection title.
    pub collection: String,
    pub pinned_at: DateTime<Utc>,
}

impl ExclusionEntry {
    /// Whether the cooldown has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, exclusion_days: u32) -> bool {
        now >= self.expires_at(exclusion_days)
    }

    /// When the cooldown ends. Saturates at the latest representable time.
    pub fn expires_at(&self, exclusion_days: u32) -> DateTime<Utc> {
        Duration::try_days(i64::from(exclusion_days))
            .and_then(|d| self.pinned_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether this entry covers `collection` in `library`.
    pub fn applies_to(&self, library: &str, collection: &str) -> bool {
        (self.library.is_empty() || self.library == library) && self.collection == collection
    }

    fn matches(&self, library: &str, collection: &str) -> bool {
        self.library == library && self.collection == collection
    }
}

/// Persisted list of exclusion entries, at most one per (library, collection).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExclusionLedger {
    entries: Vec<ExclusionEntry>,
    /// Expiry dates read from a legacy file, not yet adopted.
    #[serde(skip)]
    legacy: BTreeMap<String, NaiveDate>,
}

/// Stored shapes: the entry list, or the legacy title-to-expiry map.
#[derive(Deserialize)]
#[serde(untagged)]
enum LedgerRepr {
    Entries(Vec<ExclusionEntry>),
    Legacy(BTreeMap<String, NaiveDate>),
}

impl<'de> Deserialize<'de> for ExclusionLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match LedgerRepr::deserialize(deserializer)? {
            LedgerRepr::Entries(entries) => Self {
                entries,
                legacy: BTreeMap::new(),
            },
            LedgerRepr::Legacy(legacy) => Self {
                entries: Vec::new(),
                legacy,
            },
        })
    }
}

impl ExclusionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ExclusionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry covering `collection` in `library`, preferring a
    /// library-specific entry over a legacy one.
    pub fn get(&self, library: &str, collection: &str) -> Option<&ExclusionEntry> {
        self.entries
            .iter()
            .find(|e| e.matches(library, collection))
            .or_else(|| self.entries.iter().find(|e| e.applies_to(library, collection)))
    }

    /// Legacy expiries waiting for [`adopt_legacy`](Self::adopt_legacy).
    pub fn pending_legacy(&self) -> usize {
        self.legacy.len()
    }

    /// Convert legacy expiry dates into entries.
    ///
    /// An expiry at midnight UTC of date `d` becomes an entry pinned
    /// `exclusion_days` earlier, so it expires on the stored date. Titles
    /// already present are left alone. Returns how many were adopted.
    pub fn adopt_legacy(&mut self, exclusion_days: u32) -> usize {
        let legacy = std::mem::take(&mut self.legacy);
        let mut adopted = 0;
        for (collection, expiry) in legacy {
            if self.entries.iter().any(|e| e.collection == collection) {
                continue;
            }
            let expires = expiry.and_time(NaiveTime::MIN).and_utc();
            let pinned_at = Duration::try_days(i64::from(exclusion_days))
                .and_then(|d| expires.checked_sub_signed(d))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            self.entries.push(ExclusionEntry {
                library: String::new(),
                collection,
                pinned_at,
            });
            adopted += 1;
        }
        adopted
    }

    /// Record a pin, replacing any previous entry for the same collection.
    pub fn record(&mut self, library: &str, collection: &str, pinned_at: DateTime<Utc>) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.matches(library, collection))
        {
            Some(entry) => entry.pinned_at = pinned_at,
            None => self.entries.push(ExclusionEntry {
                library: library.to_string(),
                collection: collection.to_string(),
                pinned_at,
            }),
        }
    }

    /// Whether the collection is still cooling down at `now`.
    pub fn is_excluded(
        &self,
        library: &str,
        collection: &str,
        now: DateTime<Utc>,
        exclusion_days: u32,
    ) -> bool {
        self.get(library, collection)
            .map(|e| !e.is_expired(now, exclusion_days))
            .unwrap_or(false)
    }

    /// Remove every expired entry, returning what was removed.
    pub fn evict_expired(
        &mut self,
        now: DateTime<Utc>,
        exclusion_days: u32,
    ) -> Vec<ExclusionEntry> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.is_expired(now, exclusion_days));
        self.entries = kept;
        expired
    }

    /// Remove a single entry. Returns whether it existed.
    pub fn remove(&mut self, library: &str, collection: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.matches(library, collection));
        self.entries.len() != before
    }

    /// Remove every entry, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len() + self.legacy.len();
        self.entries.clear();
        self.legacy.clear();
        count
    }

    /// Release up to `count` entries of `library`, oldest `pinned_at` first.
    ///
    /// Only entries accepted by `eligible` are considered. Ties on
    /// `pinned_at` are broken by collection title.
    pub fn purge_oldest<F>(&mut self, library: &str, count: usize, eligible: F) -> Vec<ExclusionEntry>
    where
        F: Fn(&ExclusionEntry) -> bool,
    {
        if count == 0 {
            return Vec::new();
        }

        let mut victims: Vec<&ExclusionEntry> = self
            .entries
            .iter()
            .filter(|e| (e.library.is_empty() || e.library == library) && eligible(e))
            .collect();
        victims.sort_by(|a, b| {
            a.pinned_at
                .cmp(&b.pinned_at)
                .then_with(|| a.collection.cmp(&b.collection))
        });
        let purged: Vec<ExclusionEntry> = victims.into_iter().take(count).cloned().collect();

        self.entries
            .retain(|e| !purged.iter().any(|p| p.matches(&e.library, &e.collection)));
        purged
    }

    /// Entries that apply to `library`, legacy ones included.
    pub fn for_library<'a>(&'a self, library: &'a str) -> impl Iterator<Item = &'a ExclusionEntry> {
        self.entries
            .iter()
            .filter(move |e| e.library.is_empty() || e.library == library)
    }
}
