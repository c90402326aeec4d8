//! Records that can be kept in sync with a remote collection.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// How live change events are applied to a collection's local view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangePolicy {
    /// Only inserts are applied; updates and deletes are ignored.
    #[default]
    InsertsOnly,
    /// Inserts, updates and deletes are all applied.
    Full,
}

impl ChangePolicy {
    /// Returns true if update and delete events should be applied.
    #[must_use]
    pub const fn applies_mutations(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// A row of a remote table that the sync engine can cache, order and merge.
///
/// The associated constants describe the table: where it lives, which column
/// scopes it to a collection key, and which timestamp column orders it.
pub trait SyncRecord: Clone + Debug + Send + Sync + DeserializeOwned + 'static {
    /// Identifier type; two records with the same id are the same record.
    type Id: Clone + Eq + Hash + Debug + Send + Sync + DeserializeOwned;

    /// Remote table name.
    const TABLE: &'static str;
    /// Column holding the collection key, or `None` for an unscoped table.
    const KEY_COLUMN: Option<&'static str>;
    /// Timestamp column used for ordering and incremental fetches.
    const ORDER_COLUMN: &'static str;
    /// Which live change events are applied.
    const POLICY: ChangePolicy;

    /// Returns the record identifier.
    fn id(&self) -> Self::Id;

    /// Returns the ordering timestamp.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Key used for collections whose table has no key column.
pub const UNSCOPED_KEY: &str = "*";
