//! In-memory store backend.
//!
//! Backs tests and local development with a `BTreeMap` behind an
//! `RwLock`, which gives the same ordered-by-sort-key query semantics as
//! the hosted table. Condition evaluation happens under the write lock,
//! so conditional puts are atomic exactly like the real backend's.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::store::{PutCondition, Record, RecordKey, Store};

/// Thread-safe in-memory [`Store`]. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<(String, String), Record>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_condition(
        existing: Option<&Record>,
        condition: PutCondition,
    ) -> Result<(), StoreError> {
        let ok = match condition {
            PutCondition::None => true,
            PutCondition::NotExists => existing.is_none(),
            PutCondition::Exists => existing.is_some(),
            PutCondition::VersionIs(v) => existing.is_some_and(|r| r.version == v),
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::ConditionFailed)
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records.get(&(key.pk.clone(), key.sk.clone())).cloned())
    }

    async fn put(&self, record: Record, condition: PutCondition) -> Result<(), StoreError> {
        let mut records = self.records.write().expect("lock poisoned");
        let map_key = (record.key.pk.clone(), record.key.sk.clone());
        Self::check_condition(records.get(&map_key), condition)?;
        records.insert(map_key, record);
        Ok(())
    }

    async fn delete(&self, key: &RecordKey, condition: PutCondition) -> Result<(), StoreError> {
        let mut records = self.records.write().expect("lock poisoned");
        let map_key = (key.pk.clone(), key.sk.clone());
        Self::check_condition(records.get(&map_key), condition)?;
        records.remove(&map_key);
        Ok(())
    }

    async fn query_partition(&self, pk: &str) -> Result<Vec<Record>, StoreError> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records
            .range((pk.to_string(), String::new())..)
            .take_while(|((p, _), _)| p == pk)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Record>, StoreError> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records
            .range((pk.to_string(), sk_prefix.to_string())..)
            .take_while(|((p, s), _)| p == pk && s.starts_with(sk_prefix))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn scan_pk_prefix(&self, pk_prefix: &str) -> Result<Vec<Record>, StoreError> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records
            .values()
            .filter(|r| r.key.pk.starts_with(pk_prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entity, WarehouseMeta};

    fn warehouse_record(id: &str, version: u64) -> Record {
        Record {
            key: RecordKey::new(format!("WAREHOUSE#{id}"), "META"),
            version,
            entity: Entity::Warehouse(WarehouseMeta {
                warehouse_id: id.to_string(),
                name: format!("Warehouse {id}"),
                location: None,
                is_active: true,
                created_at: 0,
                updated_at: 0,
            }),
        }
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = MemoryStore::new();
        let record = warehouse_record("w1", 1);
        store.put(record.clone(), PutCondition::None).await.unwrap();

        let got = store.get(&record.key).await.unwrap().unwrap();
        assert_eq!(got, record);

        store.delete(&record.key, PutCondition::None).await.unwrap();
        assert!(store.get(&record.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn not_exists_condition_rejects_duplicates() {
        let store = MemoryStore::new();
        let record = warehouse_record("w1", 1);
        store
            .put(record.clone(), PutCondition::NotExists)
            .await
            .unwrap();

        let err = store
            .put(record, PutCondition::NotExists)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[tokio::test]
    async fn version_condition_guards_replacement() {
        let store = MemoryStore::new();
        store
            .put(warehouse_record("w1", 1), PutCondition::NotExists)
            .await
            .unwrap();

        // Stale version loses.
        let err = store
            .put(warehouse_record("w1", 3), PutCondition::VersionIs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));

        // Matching version wins.
        store
            .put(warehouse_record("w1", 2), PutCondition::VersionIs(1))
            .await
            .unwrap();
        let got = store
            .get(&RecordKey::new("WAREHOUSE#w1", "META"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version, 2);
    }

    #[tokio::test]
    async fn delete_respects_exists_condition() {
        let store = MemoryStore::new();
        let key = RecordKey::new("WAREHOUSE#w1", "META");

        // Unconditional delete of an absent record is a no-op.
        store.delete(&key, PutCondition::None).await.unwrap();

        let err = store.delete(&key, PutCondition::Exists).await.unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[tokio::test]
    async fn queries_are_ordered_and_prefix_scoped() {
        let store = MemoryStore::new();
        for (pk, sk) in [
            ("CART#u1", "META"),
            ("CART#u1", "ITEM#b"),
            ("CART#u1", "ITEM#a"),
            ("CART#u2", "META"),
        ] {
            let mut record = warehouse_record("x", 1);
            record.key = RecordKey::new(pk, sk);
            store.put(record, PutCondition::None).await.unwrap();
        }

        let all = store.query_partition("CART#u1").await.unwrap();
        let sks: Vec<_> = all.iter().map(|r| r.key.sk.as_str()).collect();
        assert_eq!(sks, vec!["ITEM#a", "ITEM#b", "META"]);

        let items = store.query_prefix("CART#u1", "ITEM#").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|r| r.key.sk.starts_with("ITEM#")));

        let scanned = store.scan_pk_prefix("CART#").await.unwrap();
        assert_eq!(scanned.len(), 4);
    }
}
