//! Collaborator seams for the checkout orchestrator.
//!
//! Shipping, payment, notification, warehouse discovery, and
//! reconciliation are injected as trait objects so the orchestrator stays
//! testable and the production wiring stays swappable. The default
//! implementations here are the ones the service ships with; tests
//! substitute their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::{CoreError, CoreResult};
use crate::keys;
use crate::store::Store;
use crate::types::{new_id, now_millis, Entity, WarehouseMeta};

/// Quotes a shipping charge for an order.
#[async_trait]
pub trait ShippingRates: Send + Sync {
    /// Returns the shipping charge for an order with the given subtotal
    /// and destination.
    async fn quote(
        &self,
        subtotal: f64,
        shipping_address: &HashMap<String, String>,
    ) -> CoreResult<f64>;
}

/// Flat-rate shipping: one fixed charge for any non-empty order.
#[derive(Debug, Clone)]
pub struct FlatRateShipping {
    rate: f64,
}

impl FlatRateShipping {
    /// Creates a quoter with the given flat rate.
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl ShippingRates for FlatRateShipping {
    async fn quote(
        &self,
        subtotal: f64,
        _shipping_address: &HashMap<String, String>,
    ) -> CoreResult<f64> {
        if subtotal > 0.0 {
            Ok(self.rate)
        } else {
            Ok(0.0)
        }
    }
}

/// Result of initiating a payment with a provider.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    /// Provider name
    pub provider: String,
    /// Provider-side transaction reference
    pub transaction_id: String,
}

/// Starts payment collection for a committed order.
///
/// Payment is initiated after the order is durably written; a failure
/// here leaves the order awaiting payment rather than failing checkout.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Initiates collection of `amount` for `order_id`.
    async fn initiate(&self, order_id: &str, amount: f64, currency: &str)
        -> CoreResult<PaymentIntent>;
}

/// Payment provider that records an intent without charging anything.
/// Stands in until a real processor is wired up.
#[derive(Debug, Clone, Default)]
pub struct ManualPayment;

#[async_trait]
impl PaymentProvider for ManualPayment {
    async fn initiate(
        &self,
        order_id: &str,
        amount: f64,
        currency: &str,
    ) -> CoreResult<PaymentIntent> {
        tracing::info!(order_id, amount, currency, "payment intent recorded for manual capture");
        Ok(PaymentIntent {
            provider: "manual".to_string(),
            transaction_id: new_id(),
        })
    }
}

/// Customer-facing notifications. Failures are logged, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifies the user that their order was placed.
    async fn order_placed(&self, user_id: &str, order_id: &str, total: f64);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn order_placed(&self, user_id: &str, order_id: &str, total: f64) {
        tracing::info!(user_id, order_id, total, "order placed");
    }
}

/// Lists the warehouses eligible for allocation.
///
/// Kept behind a trait because the store-backed listing is a scan, which
/// must never run per checkout request against the hosted table without
/// a cache in front of it.
#[async_trait]
pub trait WarehouseDirectory: Send + Sync {
    /// Active warehouses, in allocation-preference order.
    async fn active_warehouses(&self) -> CoreResult<Vec<WarehouseMeta>>;
}

/// Directory that reads warehouse records from the store.
pub struct StoreWarehouseDirectory {
    store: Arc<dyn Store>,
}

impl StoreWarehouseDirectory {
    /// Creates a directory over the given store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WarehouseDirectory for StoreWarehouseDirectory {
    async fn active_warehouses(&self) -> CoreResult<Vec<WarehouseMeta>> {
        let records = self.store.scan_pk_prefix("WAREHOUSE#").await?;
        let mut warehouses: Vec<WarehouseMeta> = records
            .into_iter()
            .filter(|r| r.key.sk == keys::META_SK)
            .filter_map(|r| match r.entity {
                Entity::Warehouse(meta) if meta.is_active => Some(meta),
                _ => None,
            })
            .collect();
        warehouses.sort_by(|a, b| a.warehouse_id.cmp(&b.warehouse_id));
        Ok(warehouses)
    }
}

/// A compensation step that failed and needs operator attention.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationEntry {
    /// What needs to be undone, e.g. `release-reservation`
    pub action: String,
    /// Key of the record involved
    pub detail: String,
    /// Error that stopped the compensation
    pub error: String,
    /// When the failure happened (epoch millis)
    pub occurred_at: i64,
}

impl ReconciliationEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(action: impl Into<String>, detail: impl Into<String>, error: &CoreError) -> Self {
        Self {
            action: action.into(),
            detail: detail.into(),
            error: error.to_string(),
            occurred_at: now_millis(),
        }
    }
}

/// Receives compensation failures so they are never silently dropped.
#[async_trait]
pub trait ReconciliationSink: Send + Sync {
    /// Records a failed compensation for later repair.
    async fn record(&self, entry: ReconciliationEntry);
}

/// Sink that logs each entry at error level.
#[derive(Debug, Clone, Default)]
pub struct LoggingReconciliation;

#[async_trait]
impl ReconciliationSink for LoggingReconciliation {
    async fn record(&self, entry: ReconciliationEntry) {
        tracing::error!(
            action = %entry.action,
            detail = %entry.detail,
            error = %entry.error,
            "compensation failed; manual reconciliation required"
        );
    }
}

/// Sink that collects entries in memory, for tests and for draining into
/// an operator queue.
#[derive(Debug, Clone, Default)]
pub struct CollectingReconciliation {
    entries: Arc<Mutex<Vec<ReconciliationEntry>>>,
}

impl CollectingReconciliation {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<ReconciliationEntry> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        std::mem::take(&mut *entries)
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReconciliationSink for CollectingReconciliation {
    async fn record(&self, entry: ReconciliationEntry) {
        self.entries.lock().expect("lock poisoned").push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PutCondition, Record, RecordKey};

    #[tokio::test]
    async fn flat_rate_is_zero_for_empty_orders() {
        let shipping = FlatRateShipping::new(10.0);
        let address = HashMap::new();
        assert_eq!(shipping.quote(55.0, &address).await.unwrap(), 10.0);
        assert_eq!(shipping.quote(0.0, &address).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn directory_lists_active_warehouses_in_order() {
        let store = Arc::new(MemoryStore::new());
        for (id, active) in [("w2", true), ("w1", true), ("w3", false)] {
            let record = Record::new(
                RecordKey::new(format!("WAREHOUSE#{id}"), keys::META_SK),
                Entity::Warehouse(WarehouseMeta {
                    warehouse_id: id.to_string(),
                    name: id.to_string(),
                    location: None,
                    is_active: active,
                    created_at: 0,
                    updated_at: 0,
                }),
            );
            store.put(record, PutCondition::None).await.unwrap();
        }

        let directory = StoreWarehouseDirectory::new(store);
        let warehouses = directory.active_warehouses().await.unwrap();
        let ids: Vec<_> = warehouses.iter().map(|w| w.warehouse_id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "w2"]);
    }

    #[tokio::test]
    async fn collecting_sink_drains() {
        let sink = CollectingReconciliation::new();
        sink.record(ReconciliationEntry::new(
            "release-reservation",
            "WAREHOUSE#w1/PRODUCT#p1",
            &CoreError::Unavailable("timeout".to_string()),
        ))
        .await;

        assert_eq!(sink.len(), 1);
        let drained = sink.drain();
        assert_eq!(drained[0].action, "release-reservation");
        assert!(sink.is_empty());
    }
}
