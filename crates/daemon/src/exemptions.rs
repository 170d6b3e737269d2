//! User-curated exemptions: collections that must never be rotation picks.

use serde::{Deserialize, Serialize};

/// One exemption. `library: None` exempts the title in every library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ExemptionRepr")]
pub struct ExemptionEntry {
    pub collection: String,
    pub library: Option<String>,
}

impl ExemptionEntry {
    pub fn new(collection: impl Into<String>, library: Option<String>) -> Self {
        Self {
            collection: collection.into(),
            library,
        }
    }

    pub fn covers(&self, library: &str, collection: &str) -> bool {
        self.collection == collection
            && self.library.as_deref().map_or(true, |l| l == library)
    }
}

/// Stored shapes: a bare title, or the full object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExemptionRepr {
    Title(String),
    Entry {
        collection: String,
        #[serde(default)]
        library: Option<String>,
    },
}

impl From<ExemptionRepr> for ExemptionEntry {
    fn from(repr: ExemptionRepr) -> Self {
        match repr {
            ExemptionRepr::Title(collection) => ExemptionEntry {
                collection,
                library: None,
            },
            ExemptionRepr::Entry {
                collection,
                library,
            } => ExemptionEntry {
                collection,
                library: library.filter(|l| !l.trim().is_empty()),
            },
        }
    }
}

/// Persisted exemption list. Entries never expire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExemptionList {
    entries: Vec<ExemptionEntry>,
}

impl ExemptionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ExemptionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an exemption. Returns false if an identical entry already exists.
    pub fn add(&mut self, entry: ExemptionEntry) -> bool {
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Remove the exact entry. Returns whether it existed.
    pub fn remove(&mut self, collection: &str, library: Option<&str>) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.collection == collection && e.library.as_deref() == library));
        self.entries.len() != before
    }

    pub fn is_exempt(&self, library: &str, collection: &str) -> bool {
        self.entries.iter().any(|e| e.covers(library, collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_and_scoped_exemptions() {
        let mut list = ExemptionList::new();
        list.add(ExemptionEntry::new("Kids", None));
        list.add(ExemptionEntry::new("Documentaries", Some("Movies".to_string())));

        assert!(list.is_exempt("Movies", "Kids"));
        assert!(list.is_exempt("TV Shows", "Kids"));
        assert!(list.is_exempt("Movies", "Documentaries"));
        assert!(!list.is_exempt("TV Shows", "Documentaries"));
        assert!(!list.is_exempt("Movies", "kids"));
    }

    #[test]
    fn test_add_deduplicates_and_remove_is_exact() {
        let mut list = ExemptionList::new();
        assert!(list.add(ExemptionEntry::new("Kids", None)));
        assert!(!list.add(ExemptionEntry::new("Kids", None)));
        assert!(list.add(ExemptionEntry::new("Kids", Some("Movies".to_string()))));
        assert_eq!(list.len(), 2);

        assert!(!list.remove("Kids", Some("TV Shows")));
        assert!(list.remove("Kids", None));
        assert_eq!(list.len(), 1);
        assert!(list.is_exempt("Movies", "Kids"));
        assert!(!list.is_exempt("TV Shows", "Kids"));
    }

    #[test]
    fn test_legacy_string_entries_load() {
        let json = r#"["Kids", {"collection": "Anime", "library": "TV Shows"}, {"collection": "Shorts", "library": ""}]"#;
        let list: ExemptionList = serde_json::from_str(json).unwrap();

        assert_eq!(list.entries()[0], ExemptionEntry::new("Kids", None));
        assert_eq!(
            list.entries()[1],
            ExemptionEntry::new("Anime", Some("TV Shows".to_string()))
        );
        assert_eq!(list.entries()[2].library, None);
    }

    #[test]
    fn test_object_without_library_is_global() {
        let list: ExemptionList =
            serde_json::from_str(r#"[{"collection": "Kids"}]"#).unwrap();

        assert_eq!(list.entries()[0], ExemptionEntry::new("Kids", None));
        assert!(list.is_exempt("TV Shows", "Kids"));
    }

    #[test]
    fn test_saved_as_objects() {
        let mut list = ExemptionList::new();
        list.add(ExemptionEntry::new("Kids", None));
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json, serde_json::json!([{"collection": "Kids", "library": null}]));
    }
}
