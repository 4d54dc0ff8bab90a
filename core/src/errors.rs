//! Error handling for the leafshop retail core.
//!
//! Two layers of errors exist: `StoreError` at the store-adapter boundary
//! (the only component talking to the backing store) and `CoreError` for
//! everything above it. `CoreError` is the type callers of the checkout,
//! inventory, coupon, cart, and order services see; every variant maps to a
//! stable error code suitable for client responses.

use thiserror::Error;

/// Errors raised by the store adapter.
///
/// Absence of a record is not an error at this layer; reads return
/// `Option::None` and callers decide whether that is exceptional.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// A conditional write was rejected because the condition did not hold.
    /// Callers retry their read-modify-write or abort.
    #[error("conditional write rejected")]
    ConditionFailed,

    /// Transient infrastructure failure; callers may retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record could not be encoded or decoded.
    #[error("record serialization failed: {0}")]
    Serialization(String),
}

/// Reasons a coupon is rejected during validation or application.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    /// No coupon exists for the given code
    #[error("coupon not found")]
    NotFound,

    /// Coupon is disabled
    #[error("coupon is not active")]
    Inactive,

    /// Current time is before the coupon's validity window
    #[error("coupon is not yet valid")]
    NotYetValid,

    /// Current time is past the coupon's validity window
    #[error("coupon has expired")]
    Expired,

    /// Order total is below the coupon's minimum purchase amount
    #[error("order does not meet the minimum purchase amount")]
    MinPurchaseNotMet,

    /// No cart line matches the coupon's product/category eligibility rules
    #[error("coupon is not applicable to the items in this order")]
    NotEligible,

    /// Global usage limit already reached at validation time
    #[error("coupon usage limit reached")]
    UsageLimitReached,

    /// This user has exhausted their per-user allowance
    #[error("coupon usage limit per user reached")]
    PerUserLimitReached,

    /// The computed discount is zero or negative
    #[error("coupon does not provide any discount")]
    NoDiscount,

    /// A usage record for this order already exists
    #[error("coupon already applied to this order")]
    AlreadyApplied,
}

/// Main error type for the retail core.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Malformed input; the caller's fault, never retried
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced entity is absent
    #[error("{0} not found")]
    NotFound(String),

    /// Checkout was attempted against an empty cart
    #[error("cart is empty")]
    EmptyCart,

    /// An inventory line cannot cover the requested quantity
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Product whose stock ran out
        product_id: String,
        /// Quantity the caller asked for
        requested: u32,
        /// Quantity actually available at read time
        available: u32,
    },

    /// A coupon failed validation or application
    #[error("coupon rejected: {0}")]
    CouponRejected(#[from] CouponRejection),

    /// The coupon's global usage limit was hit while applying it
    #[error("coupon is exhausted")]
    CouponExhausted,

    /// Optimistic-concurrency retries were exhausted; the whole operation
    /// may be retried by the caller
    #[error("write contention on {0}")]
    Contention(String),

    /// The shipping-rate collaborator failed; terminal for the checkout
    #[error("shipping rate unavailable: {0}")]
    ShippingUnavailable(String),

    /// Transient store failure; retry with backoff at the caller's discretion
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A compensating action itself failed after a primary failure. Logged
    /// and queued for reconciliation, never silently dropped.
    #[error("compensation failed: {0}")]
    PartialCompensationFailure(String),

    /// A stored record failed to decode into a known entity
    #[error("record corrupt: {0}")]
    Corrupt(String),
}

/// Result type alias for retail core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            // A condition failure reaching this blanket conversion means the
            // caller did not handle it as part of a CAS loop.
            StoreError::ConditionFailed => CoreError::Contention("unexpected condition failure".to_string()),
            StoreError::Unavailable(msg) => CoreError::Unavailable(msg),
            StoreError::Serialization(msg) => CoreError::Corrupt(msg),
        }
    }
}

impl CoreError {
    /// Creates an invalid-argument error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Creates a not-found error for the named entity.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound(entity.into())
    }

    /// Returns the stable error code for client responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::EmptyCart => "EMPTY_CART",
            CoreError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            CoreError::CouponRejected(_) => "COUPON_REJECTED",
            CoreError::CouponExhausted => "COUPON_EXHAUSTED",
            CoreError::Contention(_) => "CONTENTION",
            CoreError::ShippingUnavailable(_) => "SHIPPING_UNAVAILABLE",
            CoreError::Unavailable(_) => "STORE_UNAVAILABLE",
            CoreError::PartialCompensationFailure(_) => "COMPENSATION_FAILURE",
            CoreError::Corrupt(_) => "RECORD_CORRUPT",
        }
    }

    /// Returns true when the whole operation may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Contention(_) | CoreError::Unavailable(_)
        )
    }
}
