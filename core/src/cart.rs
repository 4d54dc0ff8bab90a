//! Shopping carts for users and guest sessions.
//!
//! A cart is a partition: a `META` record carrying the subtotal and one
//! `ITEM#<id>` record per line. Adding a product that matches an existing
//! line on product, variant, and size merges into that line instead of
//! creating a second one. The subtotal on the meta is recomputed from the
//! lines after every mutation.

use std::sync::Arc;

use crate::errors::{CoreError, CoreResult, StoreError};
use crate::keys;
use crate::retry::RetryConfig;
use crate::store::{PutCondition, Record, RecordKey, Store};
use crate::types::{new_id, now_millis, round_cents, CartMeta, Entity, LineItem};

/// Who a cart belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    /// An authenticated user
    User(String),
    /// An anonymous session
    Guest(String),
}

impl CartOwner {
    /// The cart's partition key.
    pub fn pk(&self) -> CoreResult<String> {
        match self {
            CartOwner::User(user_id) => keys::cart_pk(user_id),
            CartOwner::Guest(session_id) => keys::guest_cart_pk(session_id),
        }
    }

    fn user_id(&self) -> Option<&str> {
        match self {
            CartOwner::User(user_id) => Some(user_id),
            CartOwner::Guest(_) => None,
        }
    }

    fn session_id(&self) -> Option<&str> {
        match self {
            CartOwner::User(_) => None,
            CartOwner::Guest(session_id) => Some(session_id),
        }
    }
}

/// Input for adding a product to a cart.
#[derive(Debug, Clone)]
pub struct AddItemInput {
    /// Product
    pub product_id: String,
    /// Variant
    pub variant_id: Option<String>,
    /// Denormalized product name
    pub product_name: Option<String>,
    /// Size choice
    pub size: Option<String>,
    /// Category, carried through for coupon eligibility
    pub category_id: Option<String>,
    /// Quantity to add
    pub quantity: u32,
    /// Unit price at add time
    pub unit_price: f64,
}

/// A cart with its lines and the subtotal derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct CartView {
    /// Meta record
    pub meta: CartMeta,
    /// Lines, ordered by item id
    pub items: Vec<LineItem>,
}

/// Cart service.
pub struct CartService {
    store: Arc<dyn Store>,
    retry: RetryConfig,
}

impl CartService {
    /// Creates a cart service over the given store.
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    fn meta_key(owner: &CartOwner) -> CoreResult<RecordKey> {
        Ok(RecordKey::new(owner.pk()?, keys::META_SK))
    }

    async fn read_meta(&self, owner: &CartOwner) -> CoreResult<Option<(CartMeta, u64)>> {
        let key = Self::meta_key(owner)?;
        match self.store.get(&key).await? {
            Some(record) => match record.entity {
                Entity::Cart(meta) => Ok(Some((meta, record.version))),
                other => Err(CoreError::Corrupt(format!(
                    "expected cart at {}, found {}",
                    key.pk,
                    other.item_type()
                ))),
            },
            None => Ok(None),
        }
    }

    /// Returns the owner's cart, creating an empty one if none exists.
    pub async fn get_or_create(&self, owner: &CartOwner) -> CoreResult<CartMeta> {
        if let Some((meta, _)) = self.read_meta(owner).await? {
            return Ok(meta);
        }

        let now = now_millis();
        let meta = CartMeta {
            cart_id: owner.pk()?,
            user_id: owner.user_id().map(str::to_string),
            session_id: owner.session_id().map(str::to_string),
            subtotal: 0.0,
            created_at: now,
            updated_at: now,
        };
        let record = Record::new(Self::meta_key(owner)?, Entity::Cart(meta.clone()));
        match self.store.put(record, PutCondition::NotExists).await {
            Ok(()) => Ok(meta),
            // Another request created it first; use theirs.
            Err(StoreError::ConditionFailed) => self
                .read_meta(owner)
                .await?
                .map(|(meta, _)| meta)
                .ok_or_else(|| CoreError::not_found("cart")),
            Err(e) => Err(e.into()),
        }
    }

    /// Lines of a cart, ordered by item id. An absent cart is empty.
    pub async fn items(&self, owner: &CartOwner) -> CoreResult<Vec<LineItem>> {
        let pk = owner.pk()?;
        let records = self.store.query_prefix(&pk, keys::ITEM_PREFIX).await?;
        records
            .into_iter()
            .map(|r| match r.entity {
                Entity::CartItem(item) => Ok(item),
                other => Err(CoreError::Corrupt(format!(
                    "expected cart item, found {}",
                    other.item_type()
                ))),
            })
            .collect()
    }

    /// Adds a product, merging into an existing line when product,
    /// variant, and size all match. Returns the resulting line.
    pub async fn add_item(&self, owner: &CartOwner, input: AddItemInput) -> CoreResult<LineItem> {
        if input.quantity == 0 {
            return Err(CoreError::invalid("quantity must be positive"));
        }
        if input.unit_price < 0.0 {
            return Err(CoreError::invalid("unit price must not be negative"));
        }
        self.get_or_create(owner).await?;
        let pk = owner.pk()?;

        let existing = self.items(owner).await?.into_iter().find(|item| {
            item.product_id == input.product_id
                && item.variant_id == input.variant_id
                && item.size == input.size
        });

        let item = match existing {
            Some(mut item) => {
                let key = RecordKey::new(pk, keys::item_sk(&item.item_id)?);
                let record = self
                    .store
                    .get(&key)
                    .await?
                    .ok_or_else(|| CoreError::not_found("cart item"))?;
                item.quantity += input.quantity;
                item.item_total = round_cents(item.unit_price * item.quantity as f64);
                let updated = Record {
                    key,
                    version: record.version + 1,
                    entity: Entity::CartItem(item.clone()),
                };
                match self
                    .store
                    .put(updated, PutCondition::VersionIs(record.version))
                    .await
                {
                    Ok(()) => item,
                    Err(StoreError::ConditionFailed) => {
                        return Err(CoreError::Contention(format!("cart item {}", item.item_id)));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                let item = LineItem {
                    item_id: new_id(),
                    product_id: input.product_id,
                    variant_id: input.variant_id,
                    product_name: input.product_name,
                    size: input.size,
                    category_id: input.category_id,
                    quantity: input.quantity,
                    unit_price: input.unit_price,
                    item_total: round_cents(input.unit_price * input.quantity as f64),
                    created_at: now_millis(),
                };
                let key = RecordKey::new(pk, keys::item_sk(&item.item_id)?);
                let record = Record::new(key, Entity::CartItem(item.clone()));
                self.store.put(record, PutCondition::NotExists).await?;
                item
            }
        };

        self.refresh_subtotal(owner).await?;
        Ok(item)
    }

    /// Sets a line's quantity. Zero removes the line.
    pub async fn update_item(
        &self,
        owner: &CartOwner,
        item_id: &str,
        quantity: u32,
    ) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_item(owner, item_id).await;
        }
        let key = RecordKey::new(owner.pk()?, keys::item_sk(item_id)?);
        let record = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| CoreError::not_found("cart item"))?;
        let Entity::CartItem(mut item) = record.entity else {
            return Err(CoreError::Corrupt(format!(
                "expected cart item at {}/{}",
                key.pk, key.sk
            )));
        };

        item.quantity = quantity;
        item.item_total = round_cents(item.unit_price * quantity as f64);
        let updated = Record {
            key: key.clone(),
            version: record.version + 1,
            entity: Entity::CartItem(item),
        };
        match self
            .store
            .put(updated, PutCondition::VersionIs(record.version))
            .await
        {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => {
                return Err(CoreError::Contention(format!("cart item {item_id}")));
            }
            Err(e) => return Err(e.into()),
        }

        self.refresh_subtotal(owner).await
    }

    /// Removes a line.
    pub async fn remove_item(&self, owner: &CartOwner, item_id: &str) -> CoreResult<()> {
        let key = RecordKey::new(owner.pk()?, keys::item_sk(item_id)?);
        match self.store.delete(&key, PutCondition::Exists).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => {
                return Err(CoreError::not_found("cart item"));
            }
            Err(e) => return Err(e.into()),
        }
        self.refresh_subtotal(owner).await
    }

    /// The cart with its lines. Creates the cart if absent.
    pub async fn view(&self, owner: &CartOwner) -> CoreResult<CartView> {
        let meta = self.get_or_create(owner).await?;
        let items = self.items(owner).await?;
        Ok(CartView { meta, items })
    }

    /// Deletes every line and the meta. Runs after a checkout commits.
    pub async fn clear(&self, owner: &CartOwner) -> CoreResult<()> {
        let pk = owner.pk()?;
        let records = self.store.query_partition(&pk).await?;
        for record in records {
            self.store.delete(&record.key, PutCondition::None).await?;
        }
        Ok(())
    }

    async fn refresh_subtotal(&self, owner: &CartOwner) -> CoreResult<()> {
        for attempt in 1..=self.retry.max_attempts {
            let Some((mut meta, version)) = self.read_meta(owner).await? else {
                return Ok(());
            };
            let items = self.items(owner).await?;
            meta.subtotal = round_cents(items.iter().map(|i| i.item_total).sum());
            meta.updated_at = now_millis();

            let record = Record {
                key: Self::meta_key(owner)?,
                version: version + 1,
                entity: Entity::Cart(meta),
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
        Err(CoreError::Contention("cart meta".to_string()))
    }
}
