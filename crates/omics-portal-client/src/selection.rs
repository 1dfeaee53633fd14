// SPDX-License-Identifier: Apache-2.0

use omics_portal_model::{DatasetId, EntityId, EntityKey, EntityKind};
use std::collections::{BTreeMap, HashSet};

/// Ids that entered or left one kind's selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionChange {
    pub added: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    pub current: Vec<EntityId>,
}

impl SelectionChange {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The ids a user currently has selected, per entity kind. Order is the user's order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    by_kind: BTreeMap<EntityKind, Vec<EntityId>>,
}

impl SelectionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops duplicates, and drops `all` when concrete ids are selected alongside it.
    #[must_use]
    pub fn normalize(ids: Vec<EntityId>) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        let mut out: Vec<EntityId> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        if out.len() > 1 {
            out.retain(|id| !id.is_all());
        }
        out
    }

    pub fn set(&mut self, kind: EntityKind, ids: Vec<EntityId>) -> SelectionChange {
        let next = Self::normalize(ids);
        let previous = self.by_kind.remove(&kind).unwrap_or_default();
        let added = next
            .iter()
            .filter(|id| !previous.contains(id))
            .cloned()
            .collect();
        let removed = previous
            .iter()
            .filter(|id| !next.contains(id))
            .cloned()
            .collect();
        if !next.is_empty() {
            self.by_kind.insert(kind, next.clone());
        }
        SelectionChange {
            added,
            removed,
            current: next,
        }
    }

    #[must_use]
    pub fn get(&self, kind: EntityKind) -> &[EntityId] {
        self.by_kind.get(&kind).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_aggregate(&self, kind: EntityKind) -> bool {
        matches!(self.get(kind), [only] if only.is_all())
    }

    pub fn clear(&mut self) {
        self.by_kind.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    /// Cache keys that must survive pruning for `kind` under `dataset`.
    #[must_use]
    pub fn keep_keys(&self, dataset: &DatasetId, kind: EntityKind) -> HashSet<EntityKey> {
        self.keys(dataset, kind).into_iter().collect()
    }

    #[must_use]
    pub fn keys(&self, dataset: &DatasetId, kind: EntityKind) -> Vec<EntityKey> {
        self.get(kind)
            .iter()
            .map(|id| EntityKey::new(dataset.clone(), kind, id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<EntityId> {
        raw.iter().map(|s| EntityId::parse(s).expect("id")).collect()
    }

    #[test]
    fn set_reports_added_and_removed() {
        let mut sel = SelectionSet::new();
        let first = sel.set(EntityKind::Gene, ids(&["SNCA", "GBA"]));
        assert_eq!(first.added, ids(&["SNCA", "GBA"]));
        let second = sel.set(EntityKind::Gene, ids(&["GBA", "LRRK2"]));
        assert_eq!(second.added, ids(&["LRRK2"]));
        assert_eq!(second.removed, ids(&["SNCA"]));
        assert_eq!(sel.get(EntityKind::Gene), ids(&["GBA", "LRRK2"]).as_slice());
        assert!(sel.get(EntityKind::Sample).is_empty());
    }

    #[test]
    fn all_sentinel_is_dropped_when_mixed() {
        assert_eq!(
            SelectionSet::normalize(ids(&["all", "S1", "S1"])),
            ids(&["S1"])
        );
        let mut sel = SelectionSet::new();
        sel.set(EntityKind::Sample, ids(&["all"]));
        assert!(sel.is_aggregate(EntityKind::Sample));
    }

    #[test]
    fn empty_selection_removes_the_kind() {
        let mut sel = SelectionSet::new();
        sel.set(EntityKind::Cluster, ids(&["3"]));
        let change = sel.set(EntityKind::Cluster, Vec::new());
        assert_eq!(change.removed, ids(&["3"]));
        assert!(sel.is_empty());
    }

    #[test]
    fn keep_keys_are_dataset_scoped() {
        let mut sel = SelectionSet::new();
        sel.set(EntityKind::Gene, ids(&["SNCA"]));
        let a = DatasetId::parse("pd-a").expect("ds");
        let b = DatasetId::parse("pd-b").expect("ds");
        let keep = sel.keep_keys(&a, EntityKind::Gene);
        assert!(keep.contains(&EntityKey::parse(&a, EntityKind::Gene, "SNCA").expect("key")));
        assert!(!keep.contains(&EntityKey::parse(&b, EntityKind::Gene, "SNCA").expect("key")));
    }
}
