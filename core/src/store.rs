//! Store adapter seam.
//!
//! Everything above this module manipulates [`Record`]s through the
//! [`Store`] trait; only the backends know what a table or an attribute
//! map is. The trait deliberately exposes no multi-item transactions:
//! every write is a single-item put or delete, optionally guarded by a
//! [`PutCondition`], and all cross-record consistency is built from that
//! primitive by the services.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::types::Entity;

pub mod dynamo;
pub mod memory;

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;

/// Address of a record in the single table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Partition key
    pub pk: String,
    /// Sort key
    pub sk: String,
}

impl RecordKey {
    /// Builds a key from its two components.
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

/// A stored record: key, version counter, and the typed body.
///
/// `version` starts at 1 on first write and is bumped by the caller on
/// every subsequent [`PutCondition::VersionIs`] replacement; the store
/// persists it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Table address
    pub key: RecordKey,
    /// Optimistic-concurrency counter
    pub version: u64,
    /// Typed body
    pub entity: Entity,
}

impl Record {
    /// Creates a first-version record.
    pub fn new(key: RecordKey, entity: Entity) -> Self {
        Self {
            key,
            version: 1,
            entity,
        }
    }
}

/// Guard evaluated atomically with a put or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional write
    None,
    /// Succeed only if no record exists at the key
    NotExists,
    /// Succeed only if a record exists at the key
    Exists,
    /// Succeed only if the stored record's version equals the given value
    VersionIs(u64),
}

/// Single-table record store.
///
/// Implementations must evaluate the write condition atomically with the
/// write itself and report a violated condition as
/// [`StoreError::ConditionFailed`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the record at `key`, or `None` if absent.
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>, StoreError>;

    /// Writes `record`, subject to `condition`.
    async fn put(&self, record: Record, condition: PutCondition) -> Result<(), StoreError>;

    /// Deletes the record at `key`, subject to `condition`. Deleting an
    /// absent record with `PutCondition::None` is not an error.
    async fn delete(&self, key: &RecordKey, condition: PutCondition) -> Result<(), StoreError>;

    /// Returns every record in the partition `pk`, ordered by sort key.
    async fn query_partition(&self, pk: &str) -> Result<Vec<Record>, StoreError>;

    /// Returns the records in partition `pk` whose sort key starts with
    /// `sk_prefix`, ordered by sort key.
    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Record>, StoreError>;

    /// Full-table scan filtered by partition-key prefix. Expensive; meant
    /// for administrative reads only, never for request-path operations.
    async fn scan_pk_prefix(&self, pk_prefix: &str) -> Result<Vec<Record>, StoreError>;
}
