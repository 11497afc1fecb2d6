//! Prepass selection recording.
//!
//! A prepass is a dry run of a query function whose only purpose is to learn
//! which cache paths the query reads. Instead of intercepting field access,
//! the query function reports each access to a [`PrepassRecorder`], tagged
//! with the call site that made it. The recorder hands back a table of
//! selections per call site next to whatever the function returned.

use livesync_types::{Selection, SelectionSet};
use std::collections::BTreeMap;

/// Selections recorded during one prepass, grouped by call site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrepassTable {
    sites: BTreeMap<String, SelectionSet>,
}

impl PrepassTable {
    /// Selections recorded by one call site.
    pub fn site(&self, call_site: &str) -> Option<&SelectionSet> {
        self.sites.get(call_site)
    }

    /// Call sites that recorded at least one selection.
    pub fn call_sites(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }

    /// All selections, across call sites, de-duplicated.
    pub fn merged(&self) -> SelectionSet {
        let mut all = SelectionSet::new();
        for set in self.sites.values() {
            all.extend_from(set);
        }
        all
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.sites.values().all(SelectionSet::is_empty)
    }
}

/// Records field accesses during a prepass.
#[derive(Debug, Default)]
pub struct PrepassRecorder {
    table: PrepassTable,
}

impl PrepassRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a query function against a fresh recorder.
    ///
    /// Returns the function's result and everything it recorded.
    pub fn run<R>(query: impl FnOnce(&mut PrepassRecorder) -> R) -> (R, PrepassTable) {
        let mut recorder = Self::new();
        let result = query(&mut recorder);
        (result, recorder.finish())
    }

    /// Record one access made from `call_site`.
    pub fn record(&mut self, call_site: &str, selection: Selection) {
        self.table
            .sites
            .entry(call_site.to_string())
            .or_default()
            .insert(selection);
    }

    /// Stop recording and return the table.
    pub fn finish(self) -> PrepassTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_per_call_site() {
        let ((), table) = PrepassRecorder::run(|rec| {
            rec.record(
                "UserCard",
                Selection::root("query").field("user").field("name").build(),
            );
            rec.record(
                "UserCard",
                Selection::root("query").field("user").field("avatar").build(),
            );
            rec.record(
                "Feed",
                Selection::root("query")
                    .field("posts")
                    .input(json!({"first": 10}))
                    .build(),
            );
        });

        assert_eq!(table.site("UserCard").map(SelectionSet::len), Some(2));
        assert_eq!(table.site("Feed").map(SelectionSet::len), Some(1));
        assert!(table.site("Missing").is_none());
        assert_eq!(table.call_sites().collect::<Vec<_>>(), vec!["Feed", "UserCard"]);
    }

    #[test]
    fn merged_deduplicates_across_sites() {
        let name = Selection::root("query").field("user").field("name").build();
        let ((), table) = PrepassRecorder::run(|rec| {
            rec.record("A", name.clone());
            rec.record("B", name.clone());
        });

        assert_eq!(table.merged().len(), 1);
    }

    #[test]
    fn result_is_returned_alongside_table() {
        let (value, table) = PrepassRecorder::run(|rec| {
            rec.record("A", Selection::root("query").field("count").build());
            42
        });

        assert_eq!(value, 42);
        assert!(!table.is_empty());
    }

    #[test]
    fn empty_run_records_nothing() {
        let ((), table) = PrepassRecorder::run(|_| {});
        assert!(table.is_empty());
        assert!(table.merged().is_empty());
    }
}
