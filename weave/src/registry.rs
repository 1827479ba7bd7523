//! Brain identifier resolution: a brain
//! identifier may match by exact filename, exact title, or fuzzy match; the
//! dispatcher classifies into `unique | none | multiple`.
//!
//! Grounded in `loom`'s global-manifest lookup, but reworked into an
//! explicit `Registry` object the dispatcher receives at construction
//! rather than global module state.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::block::Brain;

/// One registered brain: its canonical filename-style key plus the `Brain`
/// itself (title/description/blocks).
pub struct BrainEntry {
    pub filename: String,
    pub brain: Arc<Brain>,
}

/// Classification of an identifier lookup.
pub enum MatchOutcome {
    Unique(Arc<Brain>),
    None,
    Multiple(Vec<String>),
}

/// Explicit registry the dispatcher receives at construction, replacing
/// `loom`'s global manifest state.
#[derive(Default)]
pub struct BrainRegistry {
    entries: BTreeMap<String, BrainEntry>,
}

impl BrainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a brain under its filename-style key (e.g. `"triage"`).
    pub fn register(&mut self, filename: impl Into<String>, brain: Brain) {
        let filename = filename.into();
        self.entries.insert(filename.clone(), BrainEntry { filename, brain: Arc::new(brain) });
    }

    pub fn get_exact(&self, filename: &str) -> Option<Arc<Brain>> {
        self.entries.get(filename).map(|e| Arc::clone(&e.brain))
    }

    pub fn all(&self) -> impl Iterator<Item = &BrainEntry> {
        self.entries.values()
    }

    /// Resolves an identifier by exact filename, then exact title, then a
    /// case-insensitive substring fuzzy match. Exact matches
    /// always win over fuzzy ones even if a fuzzy match would also hit
    /// additional entries.
    pub fn resolve(&self, identifier: &str) -> MatchOutcome {
        if let Some(entry) = self.entries.get(identifier) {
            return MatchOutcome::Unique(Arc::clone(&entry.brain));
        }

        let title_matches: Vec<&BrainEntry> = self.entries.values().filter(|e| e.brain.title == identifier).collect();
        match title_matches.as_slice() {
            [single] => return MatchOutcome::Unique(Arc::clone(&single.brain)),
            [] => {}
            _ => return MatchOutcome::Multiple(title_matches.iter().map(|e| e.filename.clone()).collect()),
        }

        let needle = identifier.to_lowercase();
        let fuzzy: Vec<&BrainEntry> = self
            .entries
            .values()
            .filter(|e| e.filename.to_lowercase().contains(&needle) || e.brain.title.to_lowercase().contains(&needle))
            .collect();
        match fuzzy.as_slice() {
            [] => MatchOutcome::None,
            [single] => MatchOutcome::Unique(Arc::clone(&single.brain)),
            _ => MatchOutcome::Multiple(fuzzy.iter().map(|e| e.filename.clone()).collect()),
        }
    }

    /// Search used by `GET /brains?q=`: same fuzzy rule as
    /// `resolve`, but returns every match rather than classifying.
    pub fn search(&self, q: &str) -> Vec<&BrainEntry> {
        if q.is_empty() {
            return self.entries.values().collect();
        }
        let needle = q.to_lowercase();
        self.entries.values().filter(|e| e.filename.to_lowercase().contains(&needle) || e.brain.title.to_lowercase().contains(&needle)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn brain(title: &str) -> Brain {
        Brain::new(title, vec![])
    }

    /// **Scenario**: an exact filename match is unique even when the title would otherwise be ambiguous.
    #[test]
    fn exact_filename_wins() {
        let mut reg = BrainRegistry::new();
        reg.register("triage", brain("Triage"));
        reg.register("triage-v2", brain("Triage"));
        assert!(matches!(reg.resolve("triage"), MatchOutcome::Unique(_)));
    }

    /// **Scenario**: no filename or title hit falls through to fuzzy substring match.
    #[test]
    fn fuzzy_substring_match() {
        let mut reg = BrainRegistry::new();
        reg.register("customer-triage", brain("Customer Triage"));
        match reg.resolve("triage") {
            MatchOutcome::Unique(b) => assert_eq!(b.title, "Customer Triage"),
            _ => panic!("expected unique fuzzy match"),
        }
    }

    /// **Scenario**: two entries with the same title are reported as multiple candidates.
    #[test]
    fn ambiguous_title_reports_multiple() {
        let mut reg = BrainRegistry::new();
        reg.register("a", brain("Shared"));
        reg.register("b", brain("Shared"));
        match reg.resolve("Shared") {
            MatchOutcome::Multiple(mut names) => {
                names.sort();
                assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
            }
            _ => panic!("expected multiple"),
        }
    }

    /// **Scenario**: an identifier matching nothing returns None.
    #[test]
    fn unknown_identifier_is_none() {
        let reg = BrainRegistry::new();
        assert!(matches!(reg.resolve("ghost"), MatchOutcome::None));
    }

    /// **Scenario**: `search("")` returns every registered brain.
    #[test]
    fn empty_search_returns_all() {
        let mut reg = BrainRegistry::new();
        reg.register("a", brain("A"));
        reg.register("b", brain("B"));
        assert_eq!(reg.search("").len(), 2);
        let _ = Block::Guard { title: "unused".into(), predicate: Arc::new(AlwaysTrue) };
    }

    struct AlwaysTrue;
    #[async_trait::async_trait]
    impl crate::block::GuardPredicate for AlwaysTrue {
        async fn check(&self, _state: &serde_json::Value) -> Result<bool, crate::error::RunError> {
            Ok(true)
        }
    }
}
