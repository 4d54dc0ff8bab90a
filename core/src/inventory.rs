//! Inventory ledger over per-warehouse stock lines.
//!
//! Each line tracks `quantity`, `reserved_quantity`, and the derived
//! `available_quantity`; reserve/release/commit move quantities between
//! those buckets through versioned conditional writes. Every mutation is
//! a read-modify-write loop: read the line, check the business rule
//! against the fresh copy, and replace it guarded on the version read.
//! A lost race re-reads and retries with backoff until the attempt
//! budget runs out.

use std::sync::Arc;

use crate::errors::{CoreError, CoreResult, StoreError};
use crate::keys;
use crate::retry::RetryConfig;
use crate::store::{PutCondition, Record, RecordKey, Store};
use crate::types::{now_millis, Entity, InventoryLine, WarehouseMeta};

/// Inventory service: reservation protocol plus stock administration.
pub struct InventoryLedger {
    store: Arc<dyn Store>,
    retry: RetryConfig,
}

/// Input for creating or replacing a stock line.
#[derive(Debug, Clone)]
pub struct StockInput {
    /// Product
    pub product_id: String,
    /// Variant granularity, when tracked
    pub variant_id: Option<String>,
    /// On-hand quantity
    pub quantity: u32,
    /// Restock threshold
    pub reorder_point: Option<u32>,
    /// Capacity ceiling
    pub max_stock: Option<u32>,
    /// Bin/shelf location
    pub location: Option<String>,
}

/// A line at or below its reorder point.
#[derive(Debug, Clone, PartialEq)]
pub struct LowStockLine {
    /// Warehouse holding the line
    pub warehouse_id: String,
    /// Product
    pub product_id: String,
    /// Variant
    pub variant_id: Option<String>,
    /// Current availability
    pub available_quantity: u32,
    /// Threshold that was crossed
    pub reorder_point: u32,
}

impl InventoryLedger {
    /// Creates a ledger over the given store.
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    fn line_key(
        warehouse_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> CoreResult<RecordKey> {
        Ok(RecordKey::new(
            keys::warehouse_pk(warehouse_id)?,
            keys::inventory_sk(product_id, variant_id)?,
        ))
    }

    async fn read_line(&self, key: &RecordKey) -> CoreResult<Option<(InventoryLine, u64)>> {
        match self.store.get(key).await? {
            Some(record) => match record.entity {
                Entity::Inventory(line) => Ok(Some((line, record.version))),
                other => Err(CoreError::Corrupt(format!(
                    "expected inventory line at {}/{}, found {}",
                    key.pk,
                    key.sk,
                    other.item_type()
                ))),
            },
            None => Ok(None),
        }
    }

    /// Moves `quantity` units from available into reserved.
    ///
    /// Fails with `InsufficientStock` when the line cannot cover the
    /// request, and with `Contention` when every retry loses its race.
    /// Never oversells: the decision is always made against a fresh read
    /// and persisted only if the line is unchanged since.
    pub async fn reserve(
        &self,
        warehouse_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: u32,
    ) -> CoreResult<()> {
        if quantity == 0 {
            return Err(CoreError::invalid("reserve quantity must be positive"));
        }
        let key = Self::line_key(warehouse_id, product_id, variant_id)?;

        for attempt in 1..=self.retry.max_attempts {
            let (mut line, version) = self
                .read_line(&key)
                .await?
                .ok_or_else(|| CoreError::not_found("inventory line"))?;

            if line.available_quantity < quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                    requested: quantity,
                    available: line.available_quantity,
                });
            }

            line.reserved_quantity += quantity;
            line.available_quantity = line.quantity - line.reserved_quantity;
            line.updated_at = now_millis();

            let record = Record {
                key: key.clone(),
                version: version + 1,
                entity: Entity::Inventory(line),
            };
            match self.store.put(record, PutCondition::VersionIs(version)).await {
                Ok(()) => {
                    tracing::debug!(warehouse_id, product_id, quantity, "reserved stock");
                    return Ok(());
                }
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("{}/{}", key.pk, key.sk)))
    }

    /// Returns `quantity` reserved units to available. Compensation path
    /// for failed checkouts.
    pub async fn release(
        &self,
        warehouse_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: u32,
    ) -> CoreResult<()> {
        if quantity == 0 {
            return Err(CoreError::invalid("release quantity must be positive"));
        }
        let key = Self::line_key(warehouse_id, product_id, variant_id)?;

        for attempt in 1..=self.retry.max_attempts {
            let (mut line, version) = self
                .read_line(&key)
                .await?
                .ok_or_else(|| CoreError::not_found("inventory line"))?;

            if line.reserved_quantity < quantity {
                return Err(CoreError::invalid(format!(
                    "cannot release {quantity} units, only {} reserved",
                    line.reserved_quantity
                )));
            }

            line.reserved_quantity -= quantity;
            line.available_quantity = line.quantity - line.reserved_quantity;
            line.updated_at = now_millis();

            let record = Record {
                key: key.clone(),
                version: version + 1,
                entity: Entity::Inventory(line),
            };
            match self.store.put(record, PutCondition::VersionIs(version)).await {
                Ok(()) => {
                    tracing::debug!(warehouse_id, product_id, quantity, "released reservation");
                    return Ok(());
                }
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("{}/{}", key.pk, key.sk)))
    }

    /// Converts `quantity` reserved units into a permanent decrement of
    /// on-hand stock. Runs when payment is captured.
    pub async fn commit(
        &self,
        warehouse_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: u32,
    ) -> CoreResult<()> {
        if quantity == 0 {
            return Err(CoreError::invalid("commit quantity must be positive"));
        }
        let key = Self::line_key(warehouse_id, product_id, variant_id)?;

        for attempt in 1..=self.retry.max_attempts {
            let (mut line, version) = self
                .read_line(&key)
                .await?
                .ok_or_else(|| CoreError::not_found("inventory line"))?;

            if line.reserved_quantity < quantity {
                return Err(CoreError::invalid(format!(
                    "cannot commit {quantity} units, only {} reserved",
                    line.reserved_quantity
                )));
            }

            line.quantity -= quantity;
            line.reserved_quantity -= quantity;
            line.available_quantity = line.quantity - line.reserved_quantity;
            line.updated_at = now_millis();

            let record = Record {
                key: key.clone(),
                version: version + 1,
                entity: Entity::Inventory(line),
            };
            match self.store.put(record, PutCondition::VersionIs(version)).await {
                Ok(()) => {
                    tracing::debug!(warehouse_id, product_id, quantity, "committed reservation");
                    return Ok(());
                }
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("{}/{}", key.pk, key.sk)))
    }

    // -------------------------------------------------------------------------
    // Warehouse administration
    // -------------------------------------------------------------------------

    /// Registers a warehouse. Fails if the id is taken.
    pub async fn create_warehouse(
        &self,
        warehouse_id: &str,
        name: &str,
        location: Option<String>,
    ) -> CoreResult<WarehouseMeta> {
        if name.is_empty() {
            return Err(CoreError::invalid("warehouse name must not be empty"));
        }
        let key = RecordKey::new(keys::warehouse_pk(warehouse_id)?, keys::META_SK);
        let now = now_millis();
        let meta = WarehouseMeta {
            warehouse_id: warehouse_id.to_string(),
            name: name.to_string(),
            location,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let record = Record::new(key, Entity::Warehouse(meta.clone()));
        match self.store.put(record, PutCondition::NotExists).await {
            Ok(()) => Ok(meta),
            Err(StoreError::ConditionFailed) => {
                Err(CoreError::invalid("warehouse already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a warehouse record.
    pub async fn get_warehouse(&self, warehouse_id: &str) -> CoreResult<WarehouseMeta> {
        let key = RecordKey::new(keys::warehouse_pk(warehouse_id)?, keys::META_SK);
        match self.store.get(&key).await? {
            Some(record) => match record.entity {
                Entity::Warehouse(meta) => Ok(meta),
                other => Err(CoreError::Corrupt(format!(
                    "expected warehouse at {}, found {}",
                    key.pk,
                    other.item_type()
                ))),
            },
            None => Err(CoreError::not_found("warehouse")),
        }
    }

    /// Activates or deactivates a warehouse. Inactive warehouses keep
    /// their stock lines but stop receiving allocations.
    pub async fn set_warehouse_active(
        &self,
        warehouse_id: &str,
        is_active: bool,
    ) -> CoreResult<WarehouseMeta> {
        let key = RecordKey::new(keys::warehouse_pk(warehouse_id)?, keys::META_SK);

        for attempt in 1..=self.retry.max_attempts {
            let record = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| CoreError::not_found("warehouse"))?;
            let Entity::Warehouse(mut meta) = record.entity else {
                return Err(CoreError::Corrupt(format!(
                    "expected warehouse at {}",
                    key.pk
                )));
            };
            meta.is_active = is_active;
            meta.updated_at = now_millis();

            let updated = Record {
                key: key.clone(),
                version: record.version + 1,
                entity: Entity::Warehouse(meta.clone()),
            };
            match self
                .store
                .put(updated, PutCondition::VersionIs(record.version))
                .await
            {
                Ok(()) => return Ok(meta),
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("WAREHOUSE#{warehouse_id}")))
    }

    // -------------------------------------------------------------------------
    // Stock administration
    // -------------------------------------------------------------------------

    /// Creates a new stock line. Fails if the line already exists.
    pub async fn create_stock(
        &self,
        warehouse_id: &str,
        input: StockInput,
    ) -> CoreResult<InventoryLine> {
        let key = Self::line_key(warehouse_id, &input.product_id, input.variant_id.as_deref())?;
        let now = now_millis();
        let line = InventoryLine {
            warehouse_id: warehouse_id.to_string(),
            product_id: input.product_id,
            variant_id: input.variant_id,
            quantity: input.quantity,
            reserved_quantity: 0,
            available_quantity: input.quantity,
            reorder_point: input.reorder_point,
            max_stock: input.max_stock,
            location: input.location,
            created_at: now,
            updated_at: now,
        };

        let record = Record::new(key, Entity::Inventory(line.clone()));
        match self.store.put(record, PutCondition::NotExists).await {
            Ok(()) => Ok(line),
            Err(StoreError::ConditionFailed) => {
                Err(CoreError::invalid("stock line already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a single stock line.
    pub async fn get_stock(
        &self,
        warehouse_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> CoreResult<InventoryLine> {
        let key = Self::line_key(warehouse_id, product_id, variant_id)?;
        self.read_line(&key)
            .await?
            .map(|(line, _)| line)
            .ok_or_else(|| CoreError::not_found("inventory line"))
    }

    /// Lists every stock line in a warehouse, ordered by sort key.
    pub async fn list_stock(&self, warehouse_id: &str) -> CoreResult<Vec<InventoryLine>> {
        let pk = keys::warehouse_pk(warehouse_id)?;
        let records = self.store.query_prefix(&pk, keys::PRODUCT_PREFIX).await?;
        records
            .into_iter()
            .map(|r| match r.entity {
                Entity::Inventory(line) => Ok(line),
                other => Err(CoreError::Corrupt(format!(
                    "expected inventory line, found {}",
                    other.item_type()
                ))),
            })
            .collect()
    }

    /// Deletes a stock line. Refuses while reservations are outstanding.
    pub async fn delete_stock(
        &self,
        warehouse_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> CoreResult<()> {
        let key = Self::line_key(warehouse_id, product_id, variant_id)?;
        let (line, version) = self
            .read_line(&key)
            .await?
            .ok_or_else(|| CoreError::not_found("inventory line"))?;
        if line.reserved_quantity > 0 {
            return Err(CoreError::invalid(format!(
                "cannot delete line with {} reserved units",
                line.reserved_quantity
            )));
        }

        match self.store.delete(&key, PutCondition::VersionIs(version)).await {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionFailed) => {
                Err(CoreError::Contention(format!("{}/{}", key.pk, key.sk)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Adjusts on-hand quantity by `delta` (restocks and corrections).
    /// The result may not drop below the reserved quantity.
    pub async fn adjust_quantity(
        &self,
        warehouse_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        delta: i64,
    ) -> CoreResult<InventoryLine> {
        if delta == 0 {
            return self.get_stock(warehouse_id, product_id, variant_id).await;
        }
        let key = Self::line_key(warehouse_id, product_id, variant_id)?;

        for attempt in 1..=self.retry.max_attempts {
            let (mut line, version) = self
                .read_line(&key)
                .await?
                .ok_or_else(|| CoreError::not_found("inventory line"))?;

            let new_quantity = line.quantity as i64 + delta;
            if new_quantity < line.reserved_quantity as i64 {
                return Err(CoreError::invalid(format!(
                    "adjustment would drop quantity below {} reserved units",
                    line.reserved_quantity
                )));
            }
            if let Some(max) = line.max_stock {
                if new_quantity > max as i64 {
                    return Err(CoreError::invalid(format!(
                        "adjustment would exceed max stock of {max}"
                    )));
                }
            }

            line.quantity = new_quantity as u32;
            line.available_quantity = line.quantity - line.reserved_quantity;
            line.updated_at = now_millis();

            let record = Record {
                key: key.clone(),
                version: version + 1,
                entity: Entity::Inventory(line.clone()),
            };
            match self.store.put(record, PutCondition::VersionIs(version)).await {
                Ok(()) => return Ok(line),
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("{}/{}", key.pk, key.sk)))
    }

    /// Lines at or below their reorder point, across all warehouses.
    /// Backed by a table scan; administrative use only.
    pub async fn low_stock_report(&self) -> CoreResult<Vec<LowStockLine>> {
        let records = self.store.scan_pk_prefix("WAREHOUSE#").await?;
        let mut report = Vec::new();
        for record in records {
            if !record.key.sk.starts_with(keys::PRODUCT_PREFIX) {
                continue;
            }
            if let Entity::Inventory(line) = record.entity {
                if let Some(reorder_point) = line.reorder_point {
                    if line.available_quantity <= reorder_point {
                        report.push(LowStockLine {
                            warehouse_id: line.warehouse_id,
                            product_id: line.product_id,
                            variant_id: line.variant_id,
                            available_quantity: line.available_quantity,
                            reorder_point,
                        });
                    }
                }
            }
        }
        report.sort_by(|a, b| {
            (a.warehouse_id.as_str(), a.product_id.as_str())
                .cmp(&(b.warehouse_id.as_str(), b.product_id.as_str()))
        });
        Ok(report)
    }
}
