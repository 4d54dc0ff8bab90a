//! Coupon engine: definitions, validation, and race-safe application.
//!
//! A coupon lives in its own partition: a `META` record with the rule and
//! the `used_count` counter, plus one `USAGE#<orderId>` record per order
//! it was applied to. Applying a coupon is two conditional writes:
//!
//! 1. put the usage record guarded on absence — duplicates for the same
//!    order lose here and surface as already-applied;
//! 2. increment `used_count` on the meta guarded on its version, with the
//!    usage limit re-checked against the freshly read counter. A loser
//!    whose re-read shows the limit already reached deletes its own usage
//!    record and reports the coupon exhausted.
//!
//! The pairing with the order's `DISCOUNT` record is the checkout
//! orchestrator's job; this module only manages the coupon partition.

use std::sync::Arc;

use crate::errors::{CoreError, CoreResult, CouponRejection, StoreError};
use crate::keys;
use crate::retry::RetryConfig;
use crate::store::{PutCondition, Record, RecordKey, Store};
use crate::types::{now_millis, round_cents, CouponMeta, CouponUsage, DiscountType, Entity};

/// Coupon service.
pub struct CouponEngine {
    store: Arc<dyn Store>,
    retry: RetryConfig,
}

/// One order line as the coupon engine sees it.
#[derive(Debug, Clone)]
pub struct EligibleLine {
    /// Product on the line
    pub product_id: String,
    /// Category, when known
    pub category_id: Option<String>,
}

/// The order being validated against a coupon.
#[derive(Debug, Clone)]
pub struct OrderContext {
    /// Purchasing user, when authenticated
    pub user_id: Option<String>,
    /// Order total before the discount
    pub order_total: f64,
    /// Lines in the order
    pub lines: Vec<EligibleLine>,
}

/// Input for creating or updating a coupon definition.
#[derive(Debug, Clone)]
pub struct CouponInput {
    /// Code as entered by the operator; normalized before storage
    pub coupon_code: String,
    /// Display name
    pub coupon_name: String,
    /// Description
    pub description: Option<String>,
    /// Rule type
    pub discount_type: DiscountType,
    /// Percent or amount, per the rule type
    pub discount_value: f64,
    /// Minimum order total
    pub min_purchase_amount: Option<f64>,
    /// Cap on percentage discounts
    pub max_discount_amount: Option<f64>,
    /// Global usage cap
    pub usage_limit: Option<u32>,
    /// Per-user usage cap
    pub usage_limit_per_user: Option<u32>,
    /// Window start (epoch millis)
    pub valid_from: Option<i64>,
    /// Window end (epoch millis)
    pub valid_until: Option<i64>,
    /// Active flag
    pub is_active: bool,
    /// Eligible products; empty means unrestricted
    pub applicable_products: Vec<String>,
    /// Eligible categories; empty means unrestricted
    pub applicable_categories: Vec<String>,
    /// Products the coupon never applies to
    pub excluded_products: Vec<String>,
}

/// Trims surrounding whitespace and uppercases a code. All lookups and
/// writes go through this, so `save10` and ` SAVE10 ` address the same
/// coupon.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl CouponEngine {
    /// Creates an engine over the given store.
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    fn meta_key(code: &str) -> CoreResult<RecordKey> {
        Ok(RecordKey::new(keys::coupon_pk(code)?, keys::META_SK))
    }

    async fn read_meta(&self, code: &str) -> CoreResult<Option<(CouponMeta, u64)>> {
        let key = Self::meta_key(code)?;
        match self.store.get(&key).await? {
            Some(record) => match record.entity {
                Entity::Coupon(meta) => Ok(Some((meta, record.version))),
                other => Err(CoreError::Corrupt(format!(
                    "expected coupon at {}, found {}",
                    key.pk,
                    other.item_type()
                ))),
            },
            None => Ok(None),
        }
    }

    /// Creates a coupon. The code is normalized; an existing coupon under
    /// the same normalized code is rejected.
    pub async fn create(&self, input: CouponInput) -> CoreResult<CouponMeta> {
        let code = normalize_code(&input.coupon_code);
        if input.discount_value <= 0.0 {
            return Err(CoreError::invalid("discount value must be positive"));
        }
        if let (Some(from), Some(until)) = (input.valid_from, input.valid_until) {
            if from > until {
                return Err(CoreError::invalid("validity window is inverted"));
            }
        }

        let now = now_millis();
        let meta = CouponMeta {
            coupon_code: code.clone(),
            coupon_name: input.coupon_name,
            description: input.description,
            discount_type: input.discount_type,
            discount_value: input.discount_value,
            min_purchase_amount: input.min_purchase_amount,
            max_discount_amount: input.max_discount_amount,
            usage_limit: input.usage_limit,
            usage_limit_per_user: input.usage_limit_per_user,
            used_count: 0,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            is_active: input.is_active,
            applicable_products: input.applicable_products,
            applicable_categories: input.applicable_categories,
            excluded_products: input.excluded_products,
            created_at: now,
            updated_at: now,
        };

        let record = Record::new(Self::meta_key(&code)?, Entity::Coupon(meta.clone()));
        match self.store.put(record, PutCondition::NotExists).await {
            Ok(()) => Ok(meta),
            Err(StoreError::ConditionFailed) => Err(CoreError::invalid("coupon already exists")),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces a coupon's definition, preserving its usage counter.
    pub async fn update(&self, input: CouponInput) -> CoreResult<CouponMeta> {
        let code = normalize_code(&input.coupon_code);
        if input.discount_value <= 0.0 {
            return Err(CoreError::invalid("discount value must be positive"));
        }

        for attempt in 1..=self.retry.max_attempts {
            let (existing, version) = self
                .read_meta(&code)
                .await?
                .ok_or_else(|| CoreError::not_found("coupon"))?;

            let meta = CouponMeta {
                coupon_code: code.clone(),
                coupon_name: input.coupon_name.clone(),
                description: input.description.clone(),
                discount_type: input.discount_type,
                discount_value: input.discount_value,
                min_purchase_amount: input.min_purchase_amount,
                max_discount_amount: input.max_discount_amount,
                usage_limit: input.usage_limit,
                usage_limit_per_user: input.usage_limit_per_user,
                used_count: existing.used_count,
                valid_from: input.valid_from,
                valid_until: input.valid_until,
                is_active: input.is_active,
                applicable_products: input.applicable_products.clone(),
                applicable_categories: input.applicable_categories.clone(),
                excluded_products: input.excluded_products.clone(),
                created_at: existing.created_at,
                updated_at: now_millis(),
            };

            let record = Record {
                key: Self::meta_key(&code)?,
                version: version + 1,
                entity: Entity::Coupon(meta.clone()),
            };
            match self.store.put(record, PutCondition::VersionIs(version)).await {
                Ok(()) => return Ok(meta),
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("COUPON#{code}")))
    }

    /// Reads a coupon by code.
    pub async fn get(&self, code: &str) -> CoreResult<CouponMeta> {
        let code = normalize_code(code);
        self.read_meta(&code)
            .await?
            .map(|(meta, _)| meta)
            .ok_or_else(|| CoreError::not_found("coupon"))
    }

    /// Lists every coupon. Backed by a scan; administrative use only.
    pub async fn list(&self) -> CoreResult<Vec<CouponMeta>> {
        let records = self.store.scan_pk_prefix("COUPON#").await?;
        let mut coupons: Vec<CouponMeta> = records
            .into_iter()
            .filter(|r| r.key.sk == keys::META_SK)
            .filter_map(|r| match r.entity {
                Entity::Coupon(meta) => Some(meta),
                _ => None,
            })
            .collect();
        coupons.sort_by(|a, b| a.coupon_code.cmp(&b.coupon_code));
        Ok(coupons)
    }

    /// Deletes a coupon definition. Usage records are kept for audit.
    pub async fn delete(&self, code: &str) -> CoreResult<()> {
        let code = normalize_code(code);
        let key = Self::meta_key(&code)?;
        match self.store.delete(&key, PutCondition::Exists).await {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionFailed) => Err(CoreError::not_found("coupon")),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the usage records of a coupon, ordered by order id.
    pub async fn list_usages(&self, code: &str) -> CoreResult<Vec<CouponUsage>> {
        let code = normalize_code(code);
        let pk = keys::coupon_pk(&code)?;
        let records = self.store.query_prefix(&pk, keys::USAGE_PREFIX).await?;
        records
            .into_iter()
            .map(|r| match r.entity {
                Entity::CouponUsage(usage) => Ok(usage),
                other => Err(CoreError::Corrupt(format!(
                    "expected coupon usage, found {}",
                    other.item_type()
                ))),
            })
            .collect()
    }

    /// Validates a coupon against an order and returns the discount it
    /// would grant. Read-only; the counter check here is advisory and is
    /// re-run authoritatively during [`CouponEngine::apply`].
    pub async fn validate(&self, code: &str, order: &OrderContext) -> CoreResult<f64> {
        let code = normalize_code(code);
        let (meta, _) = self
            .read_meta(&code)
            .await?
            .ok_or(CouponRejection::NotFound)?;
        self.check_rules(&meta, order).await?;
        Ok(compute_discount(&meta, order.order_total)?)
    }

    async fn check_rules(&self, meta: &CouponMeta, order: &OrderContext) -> CoreResult<()> {
        let now = now_millis();
        if !meta.is_active {
            return Err(CouponRejection::Inactive.into());
        }
        if let Some(from) = meta.valid_from {
            if now < from {
                return Err(CouponRejection::NotYetValid.into());
            }
        }
        if let Some(until) = meta.valid_until {
            if now > until {
                return Err(CouponRejection::Expired.into());
            }
        }
        // Order-shape rejections come before counter rejections, so an
        // under-minimum order on an exhausted coupon still reports the
        // minimum as the reason.
        if let Some(min) = meta.min_purchase_amount {
            if order.order_total < min {
                return Err(CouponRejection::MinPurchaseNotMet.into());
            }
        }
        if !line_is_eligible(meta, &order.lines) {
            return Err(CouponRejection::NotEligible.into());
        }
        if let Some(limit) = meta.usage_limit {
            if meta.used_count >= limit {
                return Err(CouponRejection::UsageLimitReached.into());
            }
        }
        if let (Some(per_user_limit), Some(user_id)) =
            (meta.usage_limit_per_user, order.user_id.as_deref())
        {
            let usages = self.list_usages(&meta.coupon_code).await?;
            let used_by_user = usages
                .iter()
                .filter(|u| u.user_id.as_deref() == Some(user_id))
                .count() as u32;
            if used_by_user >= per_user_limit {
                return Err(CouponRejection::PerUserLimitReached.into());
            }
        }
        Ok(())
    }

    /// Applies a coupon to an order: validates, writes the usage record,
    /// and increments the usage counter. Returns the granted discount.
    ///
    /// On success exactly one usage record exists for the order and the
    /// counter reflects it. A second apply for the same order fails as
    /// already-applied without touching the counter. Losing the counter
    /// race after the limit fills removes the usage record again and
    /// reports the coupon exhausted.
    pub async fn apply(&self, code: &str, order_id: &str, order: &OrderContext) -> CoreResult<f64> {
        let code = normalize_code(code);
        let (meta, _) = self
            .read_meta(&code)
            .await?
            .ok_or(CouponRejection::NotFound)?;
        self.check_rules(&meta, order).await?;
        let discount = compute_discount(&meta, order.order_total)?;

        let usage_key = RecordKey::new(keys::coupon_pk(&code)?, keys::coupon_usage_sk(order_id)?);
        let usage = CouponUsage {
            coupon_code: code.clone(),
            order_id: order_id.to_string(),
            user_id: order.user_id.clone(),
            applied_amount: discount,
            order_total: order.order_total,
            created_at: now_millis(),
        };
        let usage_record = Record::new(usage_key.clone(), Entity::CouponUsage(usage));
        match self.store.put(usage_record, PutCondition::NotExists).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => {
                return Err(CouponRejection::AlreadyApplied.into());
            }
            Err(e) => return Err(e.into()),
        }

        match self.increment_used_count(&code).await {
            Ok(()) => Ok(discount),
            Err(err) => {
                // The usage record must not survive a failed increment.
                if let Err(cleanup) = self.store.delete(&usage_key, PutCondition::None).await {
                    tracing::error!(
                        coupon = %code,
                        order_id,
                        error = %cleanup,
                        "failed to remove usage record after counter failure"
                    );
                    return Err(CoreError::PartialCompensationFailure(format!(
                        "usage record {}/{} is orphaned: {cleanup}",
                        usage_key.pk, usage_key.sk
                    )));
                }
                Err(err)
            }
        }
    }

    async fn increment_used_count(&self, code: &str) -> CoreResult<()> {
        for attempt in 1..=self.retry.max_attempts {
            let (mut meta, version) = self
                .read_meta(code)
                .await?
                .ok_or_else(|| CoreError::not_found("coupon"))?;

            if let Some(limit) = meta.usage_limit {
                if meta.used_count >= limit {
                    return Err(CoreError::CouponExhausted);
                }
            }

            meta.used_count += 1;
            meta.updated_at = now_millis();

            let record = Record {
                key: Self::meta_key(code)?,
                version: version + 1,
                entity: Entity::Coupon(meta),
            };
            match self.store.put(record, PutCondition::VersionIs(version)).await {
                Ok(()) => return Ok(()),
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("COUPON#{code}")))
    }

    /// Undoes [`CouponEngine::apply`] when a later checkout step fails:
    /// removes the usage record and decrements the counter.
    pub async fn rollback_usage(&self, code: &str, order_id: &str) -> CoreResult<()> {
        let code = normalize_code(code);
        let usage_key = RecordKey::new(keys::coupon_pk(&code)?, keys::coupon_usage_sk(order_id)?);

        match self.store.delete(&usage_key, PutCondition::Exists).await {
            Ok(()) => {}
            // Nothing to roll back.
            Err(StoreError::ConditionFailed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        for attempt in 1..=self.retry.max_attempts {
            let Some((mut meta, version)) = self.read_meta(&code).await? else {
                // Definition deleted since; the usage record is gone, done.
                return Ok(());
            };

            meta.used_count = meta.used_count.saturating_sub(1);
            meta.updated_at = now_millis();

            let record = Record {
                key: Self::meta_key(&code)?,
                version: version + 1,
                entity: Entity::Coupon(meta),
            };
            match self.store.put(record, PutCondition::VersionIs(version)).await {
                Ok(()) => return Ok(()),
                Err(StoreError::ConditionFailed) if attempt < self.retry.max_attempts => {
                    self.retry.backoff(attempt).await;
                }
                Err(StoreError::ConditionFailed) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Contention(format!("COUPON#{code}")))
    }
}

/// True when at least one line is covered by the coupon's product and
/// category rules.
fn line_is_eligible(meta: &CouponMeta, lines: &[EligibleLine]) -> bool {
    let unrestricted = meta.applicable_products.is_empty() && meta.applicable_categories.is_empty();
    lines.iter().any(|line| {
        if meta.excluded_products.contains(&line.product_id) {
            return false;
        }
        if unrestricted {
            return true;
        }
        meta.applicable_products.contains(&line.product_id)
            || line
                .category_id
                .as_ref()
                .is_some_and(|c| meta.applicable_categories.contains(c))
    })
}

/// Discount granted by `meta` on `order_total`, rounded to cents.
fn compute_discount(meta: &CouponMeta, order_total: f64) -> Result<f64, CouponRejection> {
    let raw = match meta.discount_type {
        DiscountType::Percentage => {
            let discount = order_total * meta.discount_value / 100.0;
            match meta.max_discount_amount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        DiscountType::FixedAmount => meta.discount_value.min(order_total),
    };
    let rounded = round_cents(raw);
    if rounded <= 0.0 {
        return Err(CouponRejection::NoDiscount);
    }
    Ok(rounded)
}
