//! Order views and lifecycle transitions.
//!
//! Orders live under `USER#<uid>#ORDER#<oid>` with a locator copy of the
//! meta under `ORDER#<oid>` for id-only lookups. The `META` record is
//! written last at checkout, so its presence defines the order's
//! existence; reads treat a partition without it as not found.
//!
//! Status moves along a fixed transition graph. Payment capture commits
//! the inventory reservations recorded on the order items, cancellation
//! before capture releases them, and a processed return puts delivered
//! stock back on hand. Ledger lines that fail after the status change
//! are handed to the reconciliation sink rather than dropped.

use std::sync::Arc;

use crate::errors::{CoreError, CoreResult, StoreError};
use crate::inventory::InventoryLedger;
use crate::keys;
use crate::providers::{ReconciliationEntry, ReconciliationSink};
use crate::retry::RetryConfig;
use crate::store::{PutCondition, Record, RecordKey, Store};
use crate::types::{
    now_millis, Entity, OrderDiscount, OrderItem, OrderMeta, OrderPayment, OrderStatus,
    PaymentStatus,
};

/// A fully assembled order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderView {
    /// Meta record
    pub meta: OrderMeta,
    /// Lines with their allocations, ordered by item id
    pub items: Vec<OrderItem>,
    /// Payment record, if payment was initiated
    pub payment: Option<OrderPayment>,
    /// Discount record, if a coupon was applied
    pub discount: Option<OrderDiscount>,
}

/// Order service.
pub struct OrderRepository {
    store: Arc<dyn Store>,
    ledger: Arc<InventoryLedger>,
    retry: RetryConfig,
    reconciliation: Arc<dyn ReconciliationSink>,
}

/// True when `from -> to` is a permitted status move.
fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Paid)
            | (Pending, Failed)
            | (Pending, Cancelled)
            | (Failed, Pending)
            | (Failed, Cancelled)
            | (Paid, Shipped)
            | (Paid, Cancelled)
            | (Shipped, Delivered)
            | (Delivered, Returned)
    )
}

impl OrderRepository {
    /// Creates a repository over the given store and ledger.
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<InventoryLedger>,
        retry: RetryConfig,
        reconciliation: Arc<dyn ReconciliationSink>,
    ) -> Self {
        Self {
            store,
            ledger,
            retry,
            reconciliation,
        }
    }

    async fn read_meta(&self, pk: &str) -> CoreResult<Option<(OrderMeta, u64)>> {
        let key = RecordKey::new(pk, keys::META_SK);
        match self.store.get(&key).await? {
            Some(record) => match record.entity {
                Entity::Order(meta) => Ok(Some((meta, record.version))),
                other => Err(CoreError::Corrupt(format!(
                    "expected order at {pk}, found {}",
                    other.item_type()
                ))),
            },
            None => Ok(None),
        }
    }

    /// Reads a fully assembled order. A partition without a `META` record
    /// does not count as an order.
    pub async fn get(&self, user_id: &str, order_id: &str) -> CoreResult<OrderView> {
        let pk = keys::user_order_pk(user_id, order_id)?;
        let records = self.store.query_partition(&pk).await?;

        let mut meta = None;
        let mut items = Vec::new();
        let mut payment = None;
        let mut discount = None;
        for record in records {
            match record.entity {
                Entity::Order(m) => meta = Some(m),
                Entity::OrderItem(item) => items.push(item),
                Entity::OrderPayment(p) => payment = Some(p),
                Entity::OrderDiscount(d) => discount = Some(d),
                other => {
                    return Err(CoreError::Corrupt(format!(
                        "unexpected {} in order partition {pk}",
                        other.item_type()
                    )));
                }
            }
        }

        let meta = meta.ok_or_else(|| CoreError::not_found("order"))?;
        Ok(OrderView {
            meta,
            items,
            payment,
            discount,
        })
    }

    /// Resolves an order by id alone through the locator partition.
    pub async fn find(&self, order_id: &str) -> CoreResult<OrderView> {
        let locator_pk = keys::order_pk(order_id)?;
        let (meta, _) = self
            .read_meta(&locator_pk)
            .await?
            .ok_or_else(|| CoreError::not_found("order"))?;
        self.get(&meta.user_id, order_id).await
    }

    /// A user's order metas, newest first. Backed by a scan over the
    /// user's order partitions; administrative and account-page use.
    pub async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<OrderMeta>> {
        let prefix = keys::user_order_pk_prefix(user_id)?;
        let records = self.store.scan_pk_prefix(&prefix).await?;
        let mut orders: Vec<OrderMeta> = records
            .into_iter()
            .filter(|r| r.key.sk == keys::META_SK)
            .filter_map(|r| match r.entity {
                Entity::Order(meta) => Some(meta),
                _ => None,
            })
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    /// Moves an order to `new_status`, enforcing the transition graph.
    ///
    /// Cancelling or failing an unpaid order releases its reservations.
    pub async fn update_status(
        &self,
        user_id: &str,
        order_id: &str,
        new_status: OrderStatus,
    ) -> CoreResult<OrderMeta> {
        let view = self.get(user_id, order_id).await?;
        let current = view.meta.status;
        if !transition_allowed(current, new_status) {
            return Err(CoreError::invalid(format!(
                "cannot move order from {current:?} to {new_status:?}"
            )));
        }

        let meta = self
            .mutate_meta(user_id, order_id, |meta| {
                meta.status = new_status;
            })
            .await?;

        // Reservations are still held while the order awaits payment.
        if current == OrderStatus::Pending
            && matches!(new_status, OrderStatus::Cancelled | OrderStatus::Failed)
        {
            self.release_allocations(order_id, &view.items).await;
        }

        tracing::info!(order_id, ?current, ?new_status, "order status updated");
        Ok(meta)
    }

    /// Records the outcome of a payment attempt.
    ///
    /// A successful capture moves the order to paid and converts every
    /// reservation on its items into a permanent stock decrement; a
    /// failure moves it to failed and releases them.
    pub async fn mark_payment(
        &self,
        user_id: &str,
        order_id: &str,
        status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> CoreResult<OrderMeta> {
        let view = self.get(user_id, order_id).await?;
        if view.meta.status != OrderStatus::Pending {
            return Err(CoreError::invalid(format!(
                "payment outcome for order in status {:?}",
                view.meta.status
            )));
        }

        self.upsert_payment(user_id, order_id, status, transaction_id, view.meta.total_amount)
            .await?;

        let order_status = match status {
            PaymentStatus::Paid => OrderStatus::Paid,
            PaymentStatus::Failed => OrderStatus::Failed,
            PaymentStatus::Pending | PaymentStatus::Refunded => {
                return Err(CoreError::invalid("payment outcome must be paid or failed"));
            }
        };

        let meta = self
            .mutate_meta(user_id, order_id, |meta| {
                meta.status = order_status;
                meta.payment_status = status;
            })
            .await?;

        match status {
            PaymentStatus::Paid => self.commit_allocations(order_id, &view.items).await,
            PaymentStatus::Failed => self.release_allocations(order_id, &view.items).await,
            _ => unreachable!("rejected above"),
        }

        tracing::info!(order_id, ?status, "payment outcome recorded");
        Ok(meta)
    }

    /// Assigns the order to a staff member.
    pub async fn assign(
        &self,
        user_id: &str,
        order_id: &str,
        staff_id: &str,
    ) -> CoreResult<OrderMeta> {
        if staff_id.is_empty() {
            return Err(CoreError::invalid("staff id must not be empty"));
        }
        let staff_id = staff_id.to_string();
        self.mutate_meta(user_id, order_id, move |meta| {
            meta.assigned_to = Some(staff_id.clone());
        })
        .await
    }

    /// Processes a return of a delivered order: moves it to returned and
    /// puts the delivered quantities back on hand.
    pub async fn process_return(&self, user_id: &str, order_id: &str) -> CoreResult<OrderMeta> {
        let view = self.get(user_id, order_id).await?;
        if view.meta.status != OrderStatus::Delivered {
            return Err(CoreError::invalid(format!(
                "only delivered orders can be returned, order is {:?}",
                view.meta.status
            )));
        }

        let meta = self
            .mutate_meta(user_id, order_id, |meta| {
                meta.status = OrderStatus::Returned;
            })
            .await?;

        // The order is already marked returned; a restock line that fails
        // goes to the reconciliation sink instead of aborting the rest.
        for item in &view.items {
            for allocation in &item.allocations {
                if let Err(err) = self
                    .ledger
                    .adjust_quantity(
                        &allocation.warehouse_id,
                        &item.line.product_id,
                        allocation.variant_id.as_deref(),
                        allocation.quantity as i64,
                    )
                    .await
                {
                    self.reconciliation
                        .record(ReconciliationEntry::new(
                            "restock-return",
                            format!(
                                "{order_id}: {}/{}/{:?} x{}",
                                allocation.warehouse_id,
                                item.line.product_id,
                                allocation.variant_id,
                                allocation.quantity
                            ),
                            &err,
                        ))
                        .await;
                }
            }
        }

        tracing::info!(order_id, "return processed, stock restored");
        Ok(meta)
    }

    /// Applies `change` to both copies of the order meta through versioned
    /// replacements, canonical partition first.
    async fn mutate_meta(
        &self,
        user_id: &str,
        order_id: &str,
        change: impl Fn(&mut OrderMeta),
    ) -> CoreResult<OrderMeta> {
        let canonical_pk = keys::user_order_pk(user_id, order_id)?;
        let locator_pk = keys::order_pk(order_id)?;

        let mut updated = None;
        for pk in [canonical_pk.as_str(), locator_pk.as_str()] {
            'cas: for attempt in 1..=self.retry.max_attempts {
                let (mut meta, version) = self
                    .read_meta(pk)
                    .await?
                    .ok_or_else(|| CoreError::not_found("order"))?;
                change(&mut meta);
                meta.updated_at = now_millis();

                let record = Record {
                    key: RecordKey::new(pk, keys::META_SK),
                    version: version + 1,
                    entity: Entity::Order(meta.clone()),
                };
                match self.store.put(record, PutCondition::VersionIs(version)).await {
                    Ok(()) => {
                        updated = Some(meta);
                        break 'cas;
                    }
                    Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                        self.retry.backoff(attempt).await;
                    }
                    Err(StoreError::ConditionFailed) => {
                        return Err(CoreError::Contention(pk.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        updated.ok_or_else(|| CoreError::Contention(canonical_pk))
    }

    async fn upsert_payment(
        &self,
        user_id: &str,
        order_id: &str,
        status: PaymentStatus,
        transaction_id: Option<String>,
        amount: f64,
    ) -> CoreResult<()> {
        let key = RecordKey::new(keys::user_order_pk(user_id, order_id)?, keys::PAYMENT_SK);
        let now = now_millis();
        match self.store.get(&key).await? {
            Some(record) => {
                let Entity::OrderPayment(mut payment) = record.entity else {
                    return Err(CoreError::Corrupt(format!(
                        "expected payment at {}/{}",
                        key.pk, key.sk
                    )));
                };
                payment.status = status;
                if transaction_id.is_some() {
                    payment.transaction_id = transaction_id;
                }
                payment.updated_at = now;
                let updated = Record {
                    key,
                    version: record.version + 1,
                    entity: Entity::OrderPayment(payment),
                };
                match self
                    .store
                    .put(updated, PutCondition::VersionIs(record.version))
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(StoreError::ConditionFailed) => {
                        Err(CoreError::Contention(format!("payment for {order_id}")))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            None => {
                let record = Record::new(
                    key,
                    Entity::OrderPayment(OrderPayment {
                        order_id: order_id.to_string(),
                        provider: "manual".to_string(),
                        status,
                        transaction_id,
                        amount,
                        created_at: now,
                        updated_at: now,
                    }),
                );
                self.store
                    .put(record, PutCondition::NotExists)
                    .await
                    .map_err(CoreError::from)
            }
        }
    }

    /// Converts every reservation on the items into a permanent stock
    /// decrement. The order's status already changed, so a line that
    /// fails is handed to the reconciliation sink and the rest continue;
    /// aborting here would leave the remaining lines both counted and
    /// reserved with nothing flagging them.
    async fn commit_allocations(&self, order_id: &str, items: &[OrderItem]) {
        for item in items {
            for allocation in &item.allocations {
                if let Err(err) = self
                    .ledger
                    .commit(
                        &allocation.warehouse_id,
                        &item.line.product_id,
                        allocation.variant_id.as_deref(),
                        allocation.quantity,
                    )
                    .await
                {
                    self.reconciliation
                        .record(ReconciliationEntry::new(
                            "commit-reservation",
                            format!(
                                "{order_id}: {}/{}/{:?} x{}",
                                allocation.warehouse_id,
                                item.line.product_id,
                                allocation.variant_id,
                                allocation.quantity
                            ),
                            &err,
                        ))
                        .await;
                }
            }
        }
    }

    /// Releases every reservation on the items, reporting failed lines to
    /// the reconciliation sink.
    async fn release_allocations(&self, order_id: &str, items: &[OrderItem]) {
        for item in items {
            for allocation in &item.allocations {
                if let Err(err) = self
                    .ledger
                    .release(
                        &allocation.warehouse_id,
                        &item.line.product_id,
                        allocation.variant_id.as_deref(),
                        allocation.quantity,
                    )
                    .await
                {
                    self.reconciliation
                        .record(ReconciliationEntry::new(
                            "release-reservation",
                            format!(
                                "{order_id}: {}/{}/{:?} x{}",
                                allocation.warehouse_id,
                                item.line.product_id,
                                allocation.variant_id,
                                allocation.quantity
                            ),
                            &err,
                        ))
                        .await;
                }
            }
        }
    }
}
