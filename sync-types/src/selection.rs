//! Selections: the cache paths a query touched.
//!
//! A [`Selection`] records one field access (its path through the cache,
//! optional alias, and arguments). Selections are built explicitly with
//! [`SelectionBuilder`] and collected into a [`SelectionSet`], which keeps one
//! entry per distinct access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::SnapshotError;

/// One recorded field access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Field name of the leaf access.
    pub key: String,
    /// Full path from the operation root to the leaf, e.g. `["query", "user", "name"]`.
    pub cache_keys: Vec<String>,
    /// Alias the field is requested under, if any.
    pub alias: Option<String>,
    /// Arguments passed to the field, if any.
    pub input: Option<serde_json::Value>,
    /// Whether the field resolves to a union or interface.
    pub is_union: bool,
}

impl Selection {
    /// Start building a selection rooted at the given operation type
    /// (`"query"`, `"subscription"`, ...).
    pub fn root(operation: impl Into<String>) -> SelectionBuilder {
        SelectionBuilder {
            path: vec![operation.into()],
            alias: None,
            input: None,
            is_union: false,
        }
    }

    /// Identity used for de-duplication: path, alias, and canonical input.
    pub fn identity(&self) -> String {
        let mut id = self.cache_keys.join(".");
        if let Some(alias) = &self.alias {
            id.push('@');
            id.push_str(alias);
        }
        if let Some(input) = &self.input {
            id.push('(');
            id.push_str(&input.to_string());
            id.push(')');
        }
        id
    }
}

/// Builder that walks down a cache path one field at a time.
#[derive(Debug, Clone)]
pub struct SelectionBuilder {
    path: Vec<String>,
    alias: Option<String>,
    input: Option<serde_json::Value>,
    is_union: bool,
}

impl SelectionBuilder {
    /// Descend into a child field.
    ///
    /// Alias, input, and union flag apply to the leaf only, so they reset on
    /// every step.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.path.push(name.into());
        self.alias = None;
        self.input = None;
        self.is_union = false;
        self
    }

    /// Request the current field under an alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Attach arguments to the current field.
    pub fn input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Mark the current field as a union or interface.
    pub fn union(mut self) -> Self {
        self.is_union = true;
        self
    }

    /// Finish the selection at the current field.
    pub fn build(self) -> Selection {
        let key = self.path.last().cloned().unwrap_or_default();
        Selection {
            key,
            cache_keys: self.path,
            alias: self.alias,
            input: self.input,
            is_union: self.is_union,
        }
    }
}

/// A unique collection of selections.
///
/// Iteration order follows the identity string, not insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionSet {
    entries: BTreeMap<String, Selection>,
}

impl SelectionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a selection. Returns false if an identical access was already present.
    pub fn insert(&mut self, selection: Selection) -> bool {
        let id = selection.identity();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, selection);
        true
    }

    /// Add every selection from another set.
    pub fn extend_from(&mut self, other: &SelectionSet) {
        for selection in other.iter() {
            self.insert(selection.clone());
        }
    }

    /// Whether an identical access is present.
    pub fn contains(&self, selection: &Selection) -> bool {
        self.entries.contains_key(&selection.identity())
    }

    /// Number of distinct selections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every selection.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over the selections.
    pub fn iter(&self) -> impl Iterator<Item = &Selection> {
        self.entries.values()
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        rmp_serde::to_vec(self).map_err(SnapshotError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        rmp_serde::from_slice(bytes).map_err(SnapshotError::Deserialization)
    }
}

impl FromIterator<Selection> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = Selection>>(iter: I) -> Self {
        let mut set = Self::new();
        for selection in iter {
            set.insert(selection);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_name() -> Selection {
        Selection::root("query").field("user").field("name").build()
    }

    #[test]
    fn builder_records_path_and_leaf() {
        let sel = Selection::root("query")
            .field("user")
            .input(json!({"id": 1}))
            .field("posts")
            .alias("recent")
            .union()
            .build();

        assert_eq!(sel.key, "posts");
        assert_eq!(sel.cache_keys, vec!["query", "user", "posts"]);
        assert_eq!(sel.alias.as_deref(), Some("recent"));
        // input was set on "user", not on the leaf
        assert!(sel.input.is_none());
        assert!(sel.is_union);
    }

    #[test]
    fn set_deduplicates_identical_accesses() {
        let mut set = SelectionSet::new();
        assert!(set.insert(user_name()));
        assert!(!set.insert(user_name()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn input_and_alias_distinguish_selections() {
        let mut set = SelectionSet::new();
        set.insert(Selection::root("query").field("user").input(json!({"id": 1})).build());
        set.insert(Selection::root("query").field("user").input(json!({"id": 2})).build());
        set.insert(Selection::root("query").field("user").alias("me").build());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn snapshot_bytes_restore_the_same_set() {
        let set: SelectionSet = vec![
            user_name(),
            Selection::root("query").field("user").input(json!({"id": "a"})).build(),
        ]
        .into_iter()
        .collect();

        let restored = SelectionSet::from_bytes(&set.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, set);
    }

    #[test]
    fn garbage_snapshot_fails_to_decode() {
        assert!(SelectionSet::from_bytes(&[0xc1, 0x00]).is_err());
    }
}
