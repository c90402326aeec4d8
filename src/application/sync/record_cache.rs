//! Ordered, de-duplicated record list for one collection key.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::domain::SyncRecord;

/// Local copy of one collection, kept sorted ascending by timestamp with at
/// most one record per id.
///
/// The high-water mark is the newest timestamp ever merged in. It never
/// moves backwards, even when records are deleted.
#[derive(Debug, Clone)]
pub struct RecordCache<R: SyncRecord> {
    items: Vec<R>,
    ids: HashSet<R::Id>,
    high_water: Option<DateTime<Utc>>,
}

impl<R: SyncRecord> Default for RecordCache<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            ids: HashSet::new(),
            high_water: None,
        }
    }
}

impl<R: SyncRecord> RecordCache<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn items(&self) -> &[R] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn high_water(&self) -> Option<DateTime<Utc>> {
        self.high_water
    }

    #[must_use]
    pub fn contains(&self, id: &R::Id) -> bool {
        self.ids.contains(id)
    }

    /// Replaces the contents with a full snapshot.
    ///
    /// Cached records newer than the newest snapshot record are kept, since
    /// they were pushed while the snapshot request was in flight. An empty
    /// snapshot covers no point in time, so it keeps every cached record.
    pub fn replace_with_snapshot(&mut self, snapshot: Vec<R>) {
        let snapshot_max = snapshot.iter().map(SyncRecord::timestamp).max();

        let newer: Vec<R> = match snapshot_max {
            Some(max) => self
                .items
                .drain(..)
                .filter(|r| r.timestamp() > max)
                .collect(),
            None => std::mem::take(&mut self.items),
        };

        self.items.clear();
        self.ids.clear();
        for record in snapshot.into_iter().chain(newer) {
            if self.ids.insert(record.id()) {
                self.items.push(record);
            }
        }
        self.items.sort_by_key(SyncRecord::timestamp);
        self.advance_high_water();
    }

    /// Merges an incremental fetch, skipping ids already present.
    /// Returns the number of records added.
    pub fn merge_catch_up(&mut self, records: Vec<R>) -> usize {
        let mut added = 0;
        for record in records {
            if self.ids.insert(record.id()) {
                self.items.push(record);
                added += 1;
            }
        }
        if added > 0 {
            self.items.sort_by_key(SyncRecord::timestamp);
        }
        self.advance_high_water();
        added
    }

    /// Applies a pushed insert. Returns false if the id is already present.
    pub fn apply_insert(&mut self, record: R) -> bool {
        if !self.ids.insert(record.id()) {
            return false;
        }
        let ts = record.timestamp();
        let at = self.items.partition_point(|r| r.timestamp() <= ts);
        self.items.insert(at, record);
        self.advance_high_water();
        true
    }

    /// Replaces the record with the same id. Ignored unless the record type
    /// applies mutations, or if the id is unknown.
    pub fn apply_update(&mut self, record: R) -> bool {
        if !R::POLICY.applies_mutations() {
            return false;
        }
        let id = record.id();
        let Some(pos) = self.items.iter().position(|r| r.id() == id) else {
            return false;
        };
        self.items[pos] = record;
        self.items.sort_by_key(SyncRecord::timestamp);
        self.advance_high_water();
        true
    }

    /// Removes the record with the given id. Ignored unless the record type
    /// applies mutations.
    pub fn apply_delete(&mut self, id: &R::Id) -> bool {
        if !R::POLICY.applies_mutations() || !self.ids.remove(id) {
            return false;
        }
        self.items.retain(|r| &r.id() != id);
        true
    }

    fn advance_high_water(&mut self) {
        let newest = self.items.last().map(SyncRecord::timestamp);
        self.high_water = self.high_water.max(newest);
    }
}
