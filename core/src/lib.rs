//! Retail backend core over a single wide-column table.
//!
//! Carts, inventory reservations, coupons, checkout, and orders share one
//! physical key-value table addressed by composite partition and sort
//! keys. The store offers per-item conditional writes only; every
//! cross-record guarantee in this crate is built from versioned
//! read-modify-write loops and compensation, never from transactions.
//!
//! Module map:
//! - [`keys`] — key schema codec for the single-table layout
//! - [`store`] — store seam with DynamoDB and in-memory backends
//! - [`inventory`] — stock lines and the reserve/release/commit protocol
//! - [`coupon`] — coupon definitions, validation, race-safe application
//! - [`cart`] — user and guest carts
//! - [`checkout`] — the cart-to-order saga
//! - [`orders`] — order views and lifecycle transitions
//! - [`providers`] — shipping, payment, notification, reconciliation seams
//! - [`config`], [`retry`], [`errors`] — ambient plumbing

pub mod cart;
pub mod checkout;
pub mod config;
pub mod coupon;
pub mod errors;
pub mod inventory;
pub mod keys;
pub mod orders;
pub mod providers;
pub mod retry;
pub mod store;
pub mod types;

pub use cart::{AddItemInput, CartOwner, CartService, CartView};
pub use checkout::{CheckoutOrchestrator, CheckoutRequest, CheckoutSummary};
pub use config::{AwsConfig, ServiceConfig};
pub use coupon::{normalize_code, CouponEngine, CouponInput, EligibleLine, OrderContext};
pub use errors::{CoreError, CoreResult, CouponRejection, StoreError};
pub use inventory::{InventoryLedger, LowStockLine, StockInput};
pub use orders::{OrderRepository, OrderView};
pub use providers::{
    CollectingReconciliation, FlatRateShipping, LoggingNotifier, LoggingReconciliation,
    ManualPayment, Notifier, PaymentIntent, PaymentProvider, ReconciliationEntry,
    ReconciliationSink, ShippingRates, StoreWarehouseDirectory, WarehouseDirectory,
};
pub use retry::RetryConfig;
pub use store::{DynamoStore, MemoryStore, PutCondition, Record, RecordKey, Store};
pub use types::{
    new_id, now_millis, round_cents, Account, Address, Allocation, AuthToken, CartMeta,
    CouponMeta, CouponUsage, DiscountType, Entity, InventoryLine, LineItem, OrderDiscount,
    OrderItem, OrderMeta, OrderPayment, OrderStatus, PaymentStatus, Role, TokenKind, UserMeta,
    WarehouseMeta,
};
