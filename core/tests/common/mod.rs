//! Shared fixtures for the integration tests: an in-memory service stack
//! plus fault-injecting doubles for the store and the shipping quoter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use leafshop_core::{
    AddItemInput, CartOwner, CartService, CheckoutOrchestrator, CheckoutRequest,
    CollectingReconciliation, CoreError, CoreResult, CouponEngine, CouponInput, DiscountType,
    FlatRateShipping, InventoryLedger, LoggingNotifier, ManualPayment, MemoryStore,
    OrderRepository, PutCondition, Record, RecordKey, RetryConfig, ShippingRates, StockInput,
    Store, StoreError, StoreWarehouseDirectory,
};

/// Everything a test needs, wired over one shared store.
pub struct Stack {
    pub store: Arc<dyn Store>,
    pub carts: Arc<CartService>,
    pub ledger: Arc<InventoryLedger>,
    pub coupons: Arc<CouponEngine>,
    pub orders: Arc<OrderRepository>,
    pub checkout: Arc<CheckoutOrchestrator>,
    pub reconciliation: Arc<CollectingReconciliation>,
}

pub fn stack() -> Stack {
    stack_with(Arc::new(MemoryStore::new()), 10.0, RetryConfig::default())
}

pub fn stack_with(store: Arc<dyn Store>, shipping_rate: f64, retry: RetryConfig) -> Stack {
    stack_with_shipping(store, Arc::new(FlatRateShipping::new(shipping_rate)), retry)
}

pub fn stack_with_shipping(
    store: Arc<dyn Store>,
    shipping: Arc<dyn ShippingRates>,
    retry: RetryConfig,
) -> Stack {
    let carts = Arc::new(CartService::new(store.clone(), retry.clone()));
    let ledger = Arc::new(InventoryLedger::new(store.clone(), retry.clone()));
    let coupons = Arc::new(CouponEngine::new(store.clone(), retry.clone()));
    let reconciliation = Arc::new(CollectingReconciliation::new());
    let orders = Arc::new(OrderRepository::new(
        store.clone(),
        ledger.clone(),
        retry,
        reconciliation.clone(),
    ));
    let checkout = Arc::new(CheckoutOrchestrator::new(
        store.clone(),
        carts.clone(),
        ledger.clone(),
        coupons.clone(),
        shipping,
        Arc::new(ManualPayment),
        Arc::new(LoggingNotifier),
        Arc::new(StoreWarehouseDirectory::new(store.clone())),
        reconciliation.clone(),
    ));
    Stack {
        store,
        carts,
        ledger,
        coupons,
        orders,
        checkout,
        reconciliation,
    }
}

/// Store wrapper that fails writes whose partition key matches a prefix
/// predicate, for exercising the compensation paths.
pub struct FailingStore {
    inner: Arc<dyn Store>,
    fail_put_when: Box<dyn Fn(&RecordKey) -> bool + Send + Sync>,
}

impl FailingStore {
    pub fn new(
        inner: Arc<dyn Store>,
        fail_put_when: impl Fn(&RecordKey) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            fail_put_when: Box::new(fail_put_when),
        }
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, record: Record, condition: PutCondition) -> Result<(), StoreError> {
        if (self.fail_put_when)(&record.key) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.inner.put(record, condition).await
    }

    async fn delete(&self, key: &RecordKey, condition: PutCondition) -> Result<(), StoreError> {
        self.inner.delete(key, condition).await
    }

    async fn query_partition(&self, pk: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.query_partition(pk).await
    }

    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.query_prefix(pk, sk_prefix).await
    }

    async fn scan_pk_prefix(&self, pk_prefix: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.scan_pk_prefix(pk_prefix).await
    }
}

/// Shipping quoter that never answers, for driving callers into their
/// own timeouts.
pub struct StalledShipping;

#[async_trait]
impl ShippingRates for StalledShipping {
    async fn quote(
        &self,
        _subtotal: f64,
        _shipping_address: &HashMap<String, String>,
    ) -> CoreResult<f64> {
        std::future::pending::<CoreResult<f64>>().await
    }
}

/// Shipping quoter that always fails.
pub struct BrokenShipping;

#[async_trait]
impl ShippingRates for BrokenShipping {
    async fn quote(
        &self,
        _subtotal: f64,
        _shipping_address: &HashMap<String, String>,
    ) -> CoreResult<f64> {
        Err(CoreError::Unavailable("carrier api down".to_string()))
    }
}

pub async fn seed_warehouse_stock(
    stack: &Stack,
    warehouse_id: &str,
    product_id: &str,
    quantity: u32,
) {
    if stack.ledger.get_warehouse(warehouse_id).await.is_err() {
        stack
            .ledger
            .create_warehouse(warehouse_id, warehouse_id, None)
            .await
            .unwrap();
    }
    stack
        .ledger
        .create_stock(
            warehouse_id,
            StockInput {
                product_id: product_id.to_string(),
                variant_id: None,
                quantity,
                reorder_point: None,
                max_stock: None,
                location: None,
            },
        )
        .await
        .unwrap();
}

pub async fn fill_cart(stack: &Stack, user_id: &str, product_id: &str, quantity: u32, price: f64) {
    stack
        .carts
        .add_item(
            &CartOwner::User(user_id.to_string()),
            AddItemInput {
                product_id: product_id.to_string(),
                variant_id: None,
                product_name: Some("Loose Leaf Tea".to_string()),
                size: None,
                category_id: Some("tea".to_string()),
                quantity,
                unit_price: price,
            },
        )
        .await
        .unwrap();
}

pub fn save10_coupon() -> CouponInput {
    CouponInput {
        coupon_code: "SAVE10".to_string(),
        coupon_name: "Ten percent off".to_string(),
        description: None,
        discount_type: DiscountType::Percentage,
        discount_value: 10.0,
        min_purchase_amount: Some(50.0),
        max_discount_amount: None,
        usage_limit: Some(100),
        usage_limit_per_user: None,
        valid_from: None,
        valid_until: None,
        is_active: true,
        applicable_products: vec![],
        applicable_categories: vec![],
        excluded_products: vec![],
    }
}

pub fn checkout_request(user_id: &str, coupon: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        user_id: user_id.to_string(),
        shipping_address: HashMap::from([
            ("fullName".to_string(), "Alex Doe".to_string()),
            ("addressLine1".to_string(), "1 Tea Lane".to_string()),
            ("city".to_string(), "Portland".to_string()),
        ]),
        payment_method: Some("card".to_string()),
        coupon_code: coupon.map(str::to_string),
    }
}
