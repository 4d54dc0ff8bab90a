//! Checkout orchestration.
//!
//! Converts a cart into an order through a fixed sequence of single-item
//! writes: reserve stock line by line, apply the coupon, quote shipping,
//! then write the order records with the canonical `META` last. Since the
//! store offers no multi-item transactions, partial progress is undone by
//! compensating in reverse order; an order only becomes visible once its
//! `META` record lands, so a failed checkout never leaves a readable
//! order behind. A checkout future dropped mid-flight (a caller-imposed
//! timeout) releases its reservations through a drop guard. Compensations
//! that themselves fail are handed to the reconciliation sink instead of
//! being dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cart::{CartOwner, CartService};
use crate::coupon::{CouponEngine, EligibleLine, OrderContext};
use crate::errors::{CoreError, CoreResult};
use crate::inventory::InventoryLedger;
use crate::keys;
use crate::providers::{
    Notifier, PaymentProvider, ReconciliationEntry, ReconciliationSink, ShippingRates,
    WarehouseDirectory,
};
use crate::store::{PutCondition, Record, RecordKey, Store};
use crate::types::{
    new_id, now_millis, round_cents, Allocation, Entity, LineItem, OrderDiscount, OrderItem,
    OrderMeta, OrderPayment, OrderStatus, PaymentStatus,
};

/// A checkout request for an authenticated user's cart.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Purchasing user; guests must sign in before checkout
    pub user_id: String,
    /// Destination address fields
    pub shipping_address: HashMap<String, String>,
    /// Payment method label recorded on the order
    pub payment_method: Option<String>,
    /// Coupon code to apply, if any
    pub coupon_code: Option<String>,
}

/// The committed order, as returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSummary {
    /// New order id
    pub order_id: String,
    /// Sum of line totals
    pub subtotal: f64,
    /// Shipping charge
    pub shipping_amount: f64,
    /// Coupon discount
    pub discount_amount: f64,
    /// `subtotal + shipping - discount`
    pub total_amount: f64,
    /// Initial status, always awaiting payment
    pub status: OrderStatus,
}

/// One planned reservation against a specific inventory line.
#[derive(Debug, Clone, PartialEq)]
struct PlannedReservation {
    warehouse_id: String,
    product_id: String,
    /// Granularity of the inventory line, which may be product-level even
    /// for a variant item
    variant_id: Option<String>,
    quantity: u32,
}

/// Currency used when initiating payments.
const CURRENCY: &str = "USD";

/// Holds the reservations of an in-flight checkout and releases them
/// unless the order takes ownership first. Dropping the guard with
/// reservations still inside (the checkout future was cancelled) spawns
/// the release instead of stranding the stock.
struct ReservationGuard {
    ledger: Arc<InventoryLedger>,
    reconciliation: Arc<dyn ReconciliationSink>,
    reserved: Vec<PlannedReservation>,
}

impl ReservationGuard {
    fn new(ledger: Arc<InventoryLedger>, reconciliation: Arc<dyn ReconciliationSink>) -> Self {
        Self {
            ledger,
            reconciliation,
            reserved: Vec::new(),
        }
    }

    /// The committed order owns the reservations now; nothing to undo.
    fn disarm(&mut self) {
        self.reserved.clear();
    }

    /// Releases everything reserved so far, in reverse order.
    async fn release(&mut self) {
        let reserved = std::mem::take(&mut self.reserved);
        release_reservations(&self.ledger, self.reconciliation.as_ref(), &reserved).await;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if self.reserved.is_empty() {
            return;
        }
        let reserved = std::mem::take(&mut self.reserved);
        let ledger = Arc::clone(&self.ledger);
        let reconciliation = Arc::clone(&self.reconciliation);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tracing::warn!(
                        count = reserved.len(),
                        "checkout dropped mid-flight, releasing its reservations"
                    );
                    release_reservations(&ledger, reconciliation.as_ref(), &reserved).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    count = reserved.len(),
                    "checkout dropped outside a runtime, reservations need manual release"
                );
            }
        }
    }
}

/// Releases reservations in reverse order. Failures are reported to the
/// reconciliation sink; this never fails because it only runs when the
/// checkout itself is already failing.
async fn release_reservations(
    ledger: &InventoryLedger,
    reconciliation: &dyn ReconciliationSink,
    reserved: &[PlannedReservation],
) {
    for split in reserved.iter().rev() {
        if let Err(err) = ledger
            .release(
                &split.warehouse_id,
                &split.product_id,
                split.variant_id.as_deref(),
                split.quantity,
            )
            .await
        {
            reconciliation
                .record(ReconciliationEntry::new(
                    "release-reservation",
                    format!(
                        "{}/{}/{:?} x{}",
                        split.warehouse_id, split.product_id, split.variant_id, split.quantity
                    ),
                    &err,
                ))
                .await;
        }
    }
}

/// Checkout service.
pub struct CheckoutOrchestrator {
    store: Arc<dyn Store>,
    carts: Arc<CartService>,
    ledger: Arc<InventoryLedger>,
    coupons: Arc<CouponEngine>,
    shipping: Arc<dyn ShippingRates>,
    payments: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn Notifier>,
    warehouses: Arc<dyn WarehouseDirectory>,
    reconciliation: Arc<dyn ReconciliationSink>,
}

impl CheckoutOrchestrator {
    /// Wires an orchestrator from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        carts: Arc<CartService>,
        ledger: Arc<InventoryLedger>,
        coupons: Arc<CouponEngine>,
        shipping: Arc<dyn ShippingRates>,
        payments: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
        warehouses: Arc<dyn WarehouseDirectory>,
        reconciliation: Arc<dyn ReconciliationSink>,
    ) -> Self {
        Self {
            store,
            carts,
            ledger,
            coupons,
            shipping,
            payments,
            notifier,
            warehouses,
            reconciliation,
        }
    }

    /// Runs a checkout end to end and returns the committed order.
    pub async fn checkout(&self, request: CheckoutRequest) -> CoreResult<CheckoutSummary> {
        if request.user_id.is_empty() {
            return Err(CoreError::invalid("checkout requires a signed-in user"));
        }
        if request.shipping_address.is_empty() {
            return Err(CoreError::invalid("shipping address is required"));
        }

        let owner = CartOwner::User(request.user_id.clone());
        let cart = self.carts.view(&owner).await?;
        if cart.items.is_empty() {
            return Err(CoreError::EmptyCart);
        }
        let subtotal = round_cents(cart.items.iter().map(|i| i.item_total).sum());

        let plan = self.plan_allocations(&cart.items).await?;
        let mut reservations = self.execute_reservations(&plan).await?;

        let order_id = new_id();

        // Coupon, with everything reserved so far released on rejection.
        let discount_amount = match request.coupon_code.as_deref() {
            Some(code) => {
                let context = OrderContext {
                    user_id: Some(request.user_id.clone()),
                    order_total: subtotal,
                    lines: cart
                        .items
                        .iter()
                        .map(|i| EligibleLine {
                            product_id: i.product_id.clone(),
                            category_id: i.category_id.clone(),
                        })
                        .collect(),
                };
                match self.coupons.apply(code, &order_id, &context).await {
                    Ok(discount) => discount,
                    Err(err) => {
                        reservations.release().await;
                        return Err(err);
                    }
                }
            }
            None => 0.0,
        };

        let shipping_amount = match self
            .shipping
            .quote(subtotal, &request.shipping_address)
            .await
        {
            Ok(amount) => amount,
            Err(err) => {
                self.compensate_coupon(&request, &order_id).await;
                reservations.release().await;
                return Err(CoreError::ShippingUnavailable(err.to_string()));
            }
        };

        let total_amount = round_cents(subtotal + shipping_amount - discount_amount);

        if let Err(err) = self
            .write_order(&request, &order_id, &cart.items, &plan, subtotal, shipping_amount, discount_amount, total_amount)
            .await
        {
            self.compensate_coupon(&request, &order_id).await;
            reservations.release().await;
            return Err(err);
        }

        // The order is durable and owns its reservations from here on;
        // the rest must not fail it.
        reservations.disarm();
        if let Err(err) = self.carts.clear(&owner).await {
            tracing::warn!(order_id, error = %err, "failed to clear cart after checkout");
        }

        self.initiate_payment(&request, &order_id, total_amount).await;
        self.notifier
            .order_placed(&request.user_id, &order_id, total_amount)
            .await;

        tracing::info!(
            order_id,
            user_id = %request.user_id,
            subtotal,
            shipping_amount,
            discount_amount,
            total_amount,
            "checkout committed"
        );

        Ok(CheckoutSummary {
            order_id,
            subtotal,
            shipping_amount,
            discount_amount,
            total_amount,
            status: OrderStatus::Pending,
        })
    }

    /// Splits each line across warehouses, preferring a variant-level
    /// stock line and falling back to product-level. Planning tracks what
    /// earlier lines already claimed so one availability is never promised
    /// twice within the same checkout.
    async fn plan_allocations(
        &self,
        items: &[LineItem],
    ) -> CoreResult<Vec<(String, Vec<PlannedReservation>)>> {
        // Two cart lines drawing on the same stock granularity (same
        // product and variant, differing only in size) must be merged
        // before checkout; allocating them independently would promise
        // one availability twice.
        let mut granularities = HashSet::new();
        for item in items {
            if !granularities.insert((item.product_id.as_str(), item.variant_id.as_deref())) {
                return Err(CoreError::invalid(format!(
                    "cart has multiple lines drawing on the same stock for product {}; merge them before checkout",
                    item.product_id
                )));
            }
        }

        let warehouses = self.warehouses.active_warehouses().await?;
        if warehouses.is_empty() {
            return Err(CoreError::Unavailable("no active warehouses".to_string()));
        }

        let mut claimed: HashMap<(String, String, Option<String>), u32> = HashMap::new();
        let mut plan = Vec::with_capacity(items.len());

        for item in items {
            let mut remaining = item.quantity;
            let mut splits = Vec::new();
            let mut total_seen: u32 = 0;

            for warehouse in &warehouses {
                if remaining == 0 {
                    break;
                }
                let mut candidates: Vec<Option<&str>> = Vec::with_capacity(2);
                if let Some(variant) = item.variant_id.as_deref() {
                    candidates.push(Some(variant));
                }
                candidates.push(None);
                for granularity in candidates {
                    if remaining == 0 {
                        break;
                    }
                    let line = match self
                        .ledger
                        .get_stock(&warehouse.warehouse_id, &item.product_id, granularity)
                        .await
                    {
                        Ok(line) => line,
                        Err(CoreError::NotFound(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    let claim_key = (
                        warehouse.warehouse_id.clone(),
                        item.product_id.clone(),
                        granularity.map(str::to_string),
                    );
                    let already = claimed.get(&claim_key).copied().unwrap_or(0);
                    let available = line.available_quantity.saturating_sub(already);
                    total_seen += available;
                    if available == 0 {
                        continue;
                    }
                    let take = remaining.min(available);
                    claimed.insert(claim_key, already + take);
                    splits.push(PlannedReservation {
                        warehouse_id: warehouse.warehouse_id.clone(),
                        product_id: item.product_id.clone(),
                        variant_id: granularity.map(str::to_string),
                        quantity: take,
                    });
                    remaining -= take;
                }
            }

            if remaining > 0 {
                return Err(CoreError::InsufficientStock {
                    product_id: item.product_id.clone(),
                    requested: item.quantity,
                    available: total_seen,
                });
            }
            plan.push((item.item_id.clone(), splits));
        }
        Ok(plan)
    }

    /// Reserves the planned quantities in order, accumulating them inside
    /// a [`ReservationGuard`] so even a cancellation mid-loop releases
    /// what was already taken. On any failure the reservations made so
    /// far are released in reverse and the original error is returned.
    async fn execute_reservations(
        &self,
        plan: &[(String, Vec<PlannedReservation>)],
    ) -> CoreResult<ReservationGuard> {
        let mut guard =
            ReservationGuard::new(Arc::clone(&self.ledger), Arc::clone(&self.reconciliation));
        for (_, splits) in plan {
            for split in splits {
                match self
                    .ledger
                    .reserve(
                        &split.warehouse_id,
                        &split.product_id,
                        split.variant_id.as_deref(),
                        split.quantity,
                    )
                    .await
                {
                    Ok(()) => guard.reserved.push(split.clone()),
                    Err(err) => {
                        guard.release().await;
                        return Err(err);
                    }
                }
            }
        }
        Ok(guard)
    }

    async fn compensate_coupon(&self, request: &CheckoutRequest, order_id: &str) {
        if let Some(code) = request.coupon_code.as_deref() {
            if let Err(err) = self.coupons.rollback_usage(code, order_id).await {
                self.reconciliation
                    .record(ReconciliationEntry::new(
                        "rollback-coupon-usage",
                        format!("{code}/{order_id}"),
                        &err,
                    ))
                    .await;
            }
        }
    }

    /// Writes the order records. Items first, then the discount, the
    /// locator copy, and the canonical `META` last; readers require the
    /// `META`, so nothing is visible until the final write lands. On
    /// failure the records already written are removed best-effort.
    #[allow(clippy::too_many_arguments)]
    async fn write_order(
        &self,
        request: &CheckoutRequest,
        order_id: &str,
        items: &[LineItem],
        plan: &[(String, Vec<PlannedReservation>)],
        subtotal: f64,
        shipping_amount: f64,
        discount_amount: f64,
        total_amount: f64,
    ) -> CoreResult<()> {
        let pk = keys::user_order_pk(&request.user_id, order_id)?;
        let now = now_millis();
        let mut written: Vec<RecordKey> = Vec::new();

        let result = async {
            for item in items {
                let allocations = plan
                    .iter()
                    .find(|(item_id, _)| item_id == &item.item_id)
                    .map(|(_, splits)| {
                        splits
                            .iter()
                            .map(|s| Allocation {
                                warehouse_id: s.warehouse_id.clone(),
                                variant_id: s.variant_id.clone(),
                                quantity: s.quantity,
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let key = RecordKey::new(pk.clone(), keys::item_sk(&item.item_id)?);
                let record = Record::new(
                    key.clone(),
                    Entity::OrderItem(OrderItem {
                        line: item.clone(),
                        allocations,
                    }),
                );
                self.store.put(record, PutCondition::NotExists).await?;
                written.push(key);
            }

            if discount_amount > 0.0 {
                if let Some(code) = request.coupon_code.as_deref() {
                    let key = RecordKey::new(pk.clone(), keys::DISCOUNT_SK);
                    let record = Record::new(
                        key.clone(),
                        Entity::OrderDiscount(OrderDiscount {
                            order_id: order_id.to_string(),
                            coupon_code: crate::coupon::normalize_code(code),
                            discount_amount,
                            created_at: now,
                        }),
                    );
                    self.store.put(record, PutCondition::NotExists).await?;
                    written.push(key);
                }
            }

            let meta = OrderMeta {
                order_id: order_id.to_string(),
                user_id: request.user_id.clone(),
                status: OrderStatus::Pending,
                subtotal,
                shipping_amount,
                discount_amount,
                total_amount,
                cart_id: Some(keys::cart_pk(&request.user_id)?),
                shipping_address: request.shipping_address.clone(),
                payment_method: request.payment_method.clone(),
                payment_status: PaymentStatus::Pending,
                assigned_to: None,
                notes: None,
                created_at: now,
                updated_at: now,
            };

            let locator_key = RecordKey::new(keys::order_pk(order_id)?, keys::META_SK);
            let record = Record::new(locator_key.clone(), Entity::Order(meta.clone()));
            self.store.put(record, PutCondition::NotExists).await?;
            written.push(locator_key);

            let meta_key = RecordKey::new(pk.clone(), keys::META_SK);
            let record = Record::new(meta_key, Entity::Order(meta));
            self.store.put(record, PutCondition::NotExists).await?;

            Ok(())
        }
        .await;

        if let Err(err) = &result {
            tracing::warn!(order_id, error = %err, "order write failed, removing partial records");
            for key in written.iter().rev() {
                if let Err(cleanup) = self.store.delete(key, PutCondition::None).await {
                    let cleanup = CoreError::from(cleanup);
                    self.reconciliation
                        .record(ReconciliationEntry::new(
                            "delete-orphaned-order-record",
                            format!("{}/{}", key.pk, key.sk),
                            &cleanup,
                        ))
                        .await;
                }
            }
        }
        result
    }

    /// Records a payment intent for the committed order. The order stays
    /// awaiting payment if the provider call fails.
    async fn initiate_payment(&self, request: &CheckoutRequest, order_id: &str, amount: f64) {
        let intent = match self.payments.initiate(order_id, amount, CURRENCY).await {
            Ok(intent) => intent,
            Err(err) => {
                tracing::warn!(order_id, error = %err, "payment initiation failed; order awaits manual payment");
                return;
            }
        };

        let pk = match keys::user_order_pk(&request.user_id, order_id) {
            Ok(pk) => pk,
            Err(err) => {
                tracing::error!(order_id, error = %err, "invalid order key for payment record");
                return;
            }
        };
        let now = now_millis();
        let record = Record::new(
            RecordKey::new(pk, keys::PAYMENT_SK),
            Entity::OrderPayment(OrderPayment {
                order_id: order_id.to_string(),
                provider: intent.provider,
                status: PaymentStatus::Pending,
                transaction_id: Some(intent.transaction_id),
                amount,
                created_at: now,
                updated_at: now,
            }),
        );
        if let Err(err) = self.store.put(record, PutCondition::NotExists).await {
            tracing::warn!(order_id, error = %err, "failed to record payment intent");
        }
    }
}
