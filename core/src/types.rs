//! Entity records stored in the single table.
//!
//! All entities share one physical keyspace; a record's body is a tagged
//! variant of [`Entity`] whose `itemType` discriminant is persisted as an
//! item attribute. Decoding into this closed set happens at the store
//! adapter boundary so raw key strings and attribute maps never leak into
//! the services.
//!
//! Money is carried as `f64` (matching the upstream data) and computed
//! amounts are rounded to cents with [`round_cents`] before persisting so
//! totals round-trip exactly. Timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Rounds a monetary amount to cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Generates a new random identifier (UUID v4).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// User role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Regular shopper
    Customer,
    /// Store staff
    Staff,
    /// Administrator
    Admin,
}

/// Kind of a stored token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    /// Refresh token for session renewal
    Refresh,
    /// Password-reset token
    Reset,
}

/// Order lifecycle status. A committed checkout produces `Pending`
/// (awaiting payment); payment confirmation moves it to `Paid` or
/// `Failed`, fulfilment to the remaining states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Awaiting payment
    Pending,
    /// Payment captured
    Paid,
    /// Payment failed
    Failed,
    /// Handed to the carrier
    Shipped,
    /// Received by the customer
    Delivered,
    /// Cancelled before fulfilment
    Cancelled,
    /// Returned after delivery
    Returned,
}

/// Payment status on the order meta and payment records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// No successful capture yet
    Pending,
    /// Captured
    Paid,
    /// Capture failed
    Failed,
    /// Refunded after capture
    Refunded,
}

/// Coupon discount rule type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// `discountValue` percent of the order total, optionally capped
    Percentage,
    /// Flat amount, floored at the order total
    FixedAmount,
}

/// User profile record (`USER#<id>` / `META`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMeta {
    /// User identifier
    pub user_id: String,
    /// Email address
    pub email: String,
    /// Display name
    pub full_name: String,
    /// Phone number
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub phone: Option<String>,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
    /// Account active flag
    pub is_active: bool,
}

/// Credentials record (`USER#<id>` / `ACCOUNT`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    /// Owning user
    pub user_id: String,
    /// Login name
    pub username: String,
    /// Password hash (opaque to the core)
    pub password_hash: String,
    /// Role granted to the account
    pub role: Role,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
}

/// Refresh/reset token record (`USER#<id>` / `TOKEN#<tokenId>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthToken {
    /// Owning user
    pub user_id: String,
    /// Token identifier
    pub token_id: String,
    /// Token value (opaque)
    pub value: String,
    /// Token kind
    pub kind: TokenKind,
    /// Expiry (epoch millis)
    pub expires_at: i64,
}

/// Address record (`USER#<id>` / `ADDRESS#<addrId>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    /// Owning user
    pub user_id: String,
    /// Address identifier
    pub address_id: String,
    /// Free-form address fields (fullName, addressLine1, city, ...)
    pub fields: HashMap<String, String>,
    /// Default shipping address flag
    pub is_default: bool,
}

/// Warehouse record (`WAREHOUSE#<id>` / `META`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarehouseMeta {
    /// Warehouse identifier
    pub warehouse_id: String,
    /// Display name
    pub name: String,
    /// Physical location
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,
    /// Whether the warehouse participates in allocation
    pub is_active: bool,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
}

/// Inventory line (`WAREHOUSE#<id>` / `PRODUCT#<pid>[#VARIANT#<vid>]`).
///
/// Invariant: `available_quantity == quantity - reserved_quantity`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryLine {
    /// Warehouse holding the stock
    pub warehouse_id: String,
    /// Product
    pub product_id: String,
    /// Variant, when stock is tracked per variant
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variant_id: Option<String>,
    /// On-hand quantity
    pub quantity: u32,
    /// Quantity held by in-flight checkouts
    pub reserved_quantity: u32,
    /// `quantity - reserved_quantity`
    pub available_quantity: u32,
    /// Restock threshold for the low-stock report
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reorder_point: Option<u32>,
    /// Capacity ceiling
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_stock: Option<u32>,
    /// Bin/shelf location within the warehouse
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
}

/// Cart meta record (`CART#<userId>` or `CART#GUEST#<sessionId>` / `META`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartMeta {
    /// The cart's partition key, doubling as its identifier
    pub cart_id: String,
    /// Owning user, absent for guest carts
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    /// Guest session, absent for user carts
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    /// Sum of item totals
    pub subtotal: f64,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
}

/// A cart or order line (`ITEM#<itemId>` under the respective partition).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    /// Item identifier
    pub item_id: String,
    /// Product
    pub product_id: String,
    /// Variant
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variant_id: Option<String>,
    /// Denormalized product name for display
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub product_name: Option<String>,
    /// Size choice
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<String>,
    /// Category, used for coupon eligibility
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category_id: Option<String>,
    /// Quantity
    pub quantity: u32,
    /// Unit price
    pub unit_price: f64,
    /// `unit_price * quantity`
    pub item_total: f64,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
}

/// One warehouse's share of an order item's reservation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    /// Warehouse the quantity was reserved in
    pub warehouse_id: String,
    /// Variant granularity the inventory line is tracked at; may differ
    /// from the item's variant when only product-level stock exists
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variant_id: Option<String>,
    /// Reserved quantity
    pub quantity: u32,
}

/// Order meta record (`USER#<uid>#ORDER#<oid>` / `META`, duplicated under
/// the `ORDER#<oid>` locator partition).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderMeta {
    /// Order identifier
    pub order_id: String,
    /// Purchasing user
    pub user_id: String,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Sum of item totals
    pub subtotal: f64,
    /// Shipping charge
    pub shipping_amount: f64,
    /// Applied discount
    pub discount_amount: f64,
    /// `subtotal + shipping_amount - discount_amount`
    pub total_amount: f64,
    /// Cart the order was created from
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cart_id: Option<String>,
    /// Shipping address fields
    pub shipping_address: HashMap<String, String>,
    /// Payment method chosen at checkout
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payment_method: Option<String>,
    /// Payment status mirror
    pub payment_status: PaymentStatus,
    /// Staff member the order is assigned to
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assigned_to: Option<String>,
    /// Operator notes
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
}

/// An order line with its warehouse allocations
/// (`USER#<uid>#ORDER#<oid>` / `ITEM#<itemId>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    /// The line as captured from the cart
    #[serde(flatten)]
    pub line: LineItem,
    /// Warehouse allocation splits backing the line's reservation; used to
    /// convert the reservation into a permanent decrement on payment capture
    pub allocations: Vec<Allocation>,
}

/// Order payment record (`USER#<uid>#ORDER#<oid>` / `PAYMENT`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderPayment {
    /// Order the payment belongs to
    pub order_id: String,
    /// Payment provider name
    pub provider: String,
    /// Capture status
    pub status: PaymentStatus,
    /// Provider transaction reference
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transaction_id: Option<String>,
    /// Captured amount
    pub amount: f64,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
}

/// Order discount record (`USER#<uid>#ORDER#<oid>` / `DISCOUNT`).
///
/// Exists iff a matching `USAGE#<orderId>` record exists under the coupon,
/// with the same amount; the checkout orchestrator enforces that pairing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderDiscount {
    /// Order the discount belongs to
    pub order_id: String,
    /// Normalized coupon code
    pub coupon_code: String,
    /// Discount amount, rounded to cents
    pub discount_amount: f64,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
}

/// Coupon meta record (`COUPON#<code>` / `META`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CouponMeta {
    /// Normalized (trimmed, uppercased) code
    pub coupon_code: String,
    /// Display name
    pub coupon_name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// Discount rule type
    pub discount_type: DiscountType,
    /// Percent (for `Percentage`) or amount (for `FixedAmount`)
    pub discount_value: f64,
    /// Minimum order total for the coupon to apply
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_purchase_amount: Option<f64>,
    /// Cap on a percentage discount
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_discount_amount: Option<f64>,
    /// Global usage cap
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage_limit: Option<u32>,
    /// Per-user usage cap, derived from usage records at validation time
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage_limit_per_user: Option<u32>,
    /// Monotonic usage counter, bounded by `usage_limit`
    pub used_count: u32,
    /// Window start (epoch millis)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub valid_from: Option<i64>,
    /// Window end (epoch millis)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub valid_until: Option<i64>,
    /// Active flag
    pub is_active: bool,
    /// Eligible products; empty means unrestricted
    #[serde(default)]
    pub applicable_products: Vec<String>,
    /// Eligible categories; empty means unrestricted
    #[serde(default)]
    pub applicable_categories: Vec<String>,
    /// Products the coupon never applies to
    #[serde(default)]
    pub excluded_products: Vec<String>,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
}

/// Coupon usage record (`COUPON#<code>` / `USAGE#<orderId>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CouponUsage {
    /// Coupon code
    pub coupon_code: String,
    /// Order the coupon was applied to
    pub order_id: String,
    /// Applying user
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    /// Discount granted
    pub applied_amount: f64,
    /// Order total at application time
    pub order_total: f64,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
}

/// Closed set of record bodies, discriminated by the persisted `itemType`
/// attribute. The store adapter decodes into this enum and nothing above
/// it sees raw attribute maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "itemType")]
pub enum Entity {
    /// User profile
    User(UserMeta),
    /// Login credentials
    Account(Account),
    /// Refresh/reset token
    Token(AuthToken),
    /// Shipping address
    Address(Address),
    /// Warehouse
    Warehouse(WarehouseMeta),
    /// Inventory line
    Inventory(InventoryLine),
    /// Cart meta
    Cart(CartMeta),
    /// Cart line
    CartItem(LineItem),
    /// Order meta
    Order(OrderMeta),
    /// Order line
    OrderItem(OrderItem),
    /// Order payment
    OrderPayment(OrderPayment),
    /// Order discount
    OrderDiscount(OrderDiscount),
    /// Coupon meta
    Coupon(CouponMeta),
    /// Coupon usage
    CouponUsage(CouponUsage),
}

impl Entity {
    /// The persisted discriminant value.
    pub fn item_type(&self) -> &'static str {
        match self {
            Entity::User(_) => "User",
            Entity::Account(_) => "Account",
            Entity::Token(_) => "Token",
            Entity::Address(_) => "Address",
            Entity::Warehouse(_) => "Warehouse",
            Entity::Inventory(_) => "Inventory",
            Entity::Cart(_) => "Cart",
            Entity::CartItem(_) => "CartItem",
            Entity::Order(_) => "Order",
            Entity::OrderItem(_) => "OrderItem",
            Entity::OrderPayment(_) => "OrderPayment",
            Entity::OrderDiscount(_) => "OrderDiscount",
            Entity::Coupon(_) => "Coupon",
            Entity::CouponUsage(_) => "CouponUsage",
        }
    }
}
