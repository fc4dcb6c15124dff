use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::lock_exclusive_if_supported,
    entities::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel, Product, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Identity a cart is resolved against: an authenticated customer or an
/// anonymous session. Exactly one of the two, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    Customer(Uuid),
    Session(String),
}

/// Shopping cart service.
///
/// Resolves the cart for an identity (get-or-create), maintains its items,
/// and derives totals from them. Item prices are snapshots taken at add
/// time and are never silently refreshed from the catalog.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Returns the cart for this identity, creating it on first access.
    ///
    /// A lost insert race against a concurrent request for the same identity
    /// is resolved by re-reading the row the winner created; there is never
    /// a second cart per identity.
    #[instrument(skip(self))]
    pub async fn resolve_cart(&self, owner: &CartOwner) -> Result<CartModel, ServiceError> {
        let (cart, created) = self.get_or_create(&*self.db, owner).await?;
        if created {
            self.event_sender
                .send_or_log(Event::CartCreated(cart.id))
                .await;
            info!("Created cart {} for {:?}", cart.id, owner);
        }
        Ok(cart)
    }

    /// Adds a product (optionally a specific variant) to the cart.
    ///
    /// An existing (product, variant) line has its quantity incremented and
    /// keeps its original price snapshot; a new line snapshots the product's
    /// current display price plus the variant's price modifier.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        input: AddItemInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let (cart, created) = self.get_or_create(&txn, owner).await?;

        // Serialise concurrent upserts on this cart.
        let cart = lock_exclusive_if_supported(
            Cart::find_by_id(cart.id),
            txn.get_database_backend(),
        )
        .one(&txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart.id)))?;

        let product = Product::find_by_id(input.product_id)
            .filter(crate::entities::product::Column::IsActive.eq(true))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let variant = match input.variant_id {
            Some(variant_id) => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .one(&txn)
                    .await?
                    .filter(|v| v.product_id == product.id)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Variant {} not found", variant_id))
                    })?;
                Some(variant)
            }
            None => None,
        };

        let unit_price = match &variant {
            Some(variant) => variant.final_price(product.display_price()),
            None => product.display_price(),
        };

        let mut query = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id));
        query = match input.variant_id {
            Some(variant_id) => query.filter(cart_item::Column::VariantId.eq(variant_id)),
            None => query.filter(cart_item::Column::VariantId.is_null()),
        };

        if let Some(item) = query.one(&txn).await? {
            let quantity = item.quantity + input.quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                variant_id: Set(input.variant_id),
                quantity: Set(input.quantity),
                price: Set(unit_price),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        let cart = Self::touch(&txn, cart).await?;
        let result = Self::load(&txn, cart).await?;
        txn.commit().await?;

        if created {
            self.event_sender
                .send_or_log(Event::CartCreated(result.cart.id))
                .await;
        }
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: result.cart.id,
                product_id: input.product_id,
                quantity: input.quantity,
            })
            .await;

        info!(
            "Added product {} x{} to cart {}",
            input.product_id, input.quantity, result.cart.id
        );
        Ok(result)
    }

    /// Applies a batch of quantity updates.
    ///
    /// A quantity of zero deletes the line. Entries whose item does not
    /// belong to this cart are silently ignored; one identity can never
    /// mutate another's items.
    #[instrument(skip(self, updates))]
    pub async fn update_items(
        &self,
        owner: &CartOwner,
        updates: Vec<UpdateItemInput>,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (cart, _) = self.get_or_create(&txn, owner).await?;

        for entry in &updates {
            if entry.quantity > 0 {
                CartItem::update_many()
                    .col_expr(cart_item::Column::Quantity, Expr::value(entry.quantity))
                    .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(cart_item::Column::Id.eq(entry.item_id))
                    .filter(cart_item::Column::CartId.eq(cart.id))
                    .exec(&txn)
                    .await?;
            } else {
                CartItem::delete_many()
                    .filter(cart_item::Column::Id.eq(entry.item_id))
                    .filter(cart_item::Column::CartId.eq(cart.id))
                    .exec(&txn)
                    .await?;
            }
        }

        let cart = Self::touch(&txn, cart).await?;
        let result = Self::load(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(result.cart.id))
            .await;

        Ok(result)
    }

    /// Removes a single item; a no-op when the item belongs to another cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (cart, _) = self.get_or_create(&txn, owner).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let cart = Self::touch(&txn, cart).await?;
        let result = Self::load(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(result.cart.id))
            .await;

        Ok(result)
    }

    /// Deletes every item; the cart row itself persists for reuse.
    #[instrument(skip(self))]
    pub async fn clear(&self, owner: &CartOwner) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (cart, _) = self.get_or_create(&txn, owner).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let cart = Self::touch(&txn, cart).await?;
        let result = Self::load(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(result.cart.id))
            .await;

        info!("Cleared cart {}", result.cart.id);
        Ok(result)
    }

    /// Returns the cart with its items for this identity.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, owner: &CartOwner) -> Result<CartWithItems, ServiceError> {
        let cart = self.resolve_cart(owner).await?;
        Self::load(&*self.db, cart).await
    }

    async fn get_or_create(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<(CartModel, bool), ServiceError> {
        if let Some(cart) = Self::find_cart(conn, owner).await? {
            return Ok((cart, false));
        }

        let (customer_id, session_id) = match owner {
            CartOwner::Customer(id) => (Some(*id), None),
            CartOwner::Session(sid) => (None, Some(sid.clone())),
        };

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            session_id: Set(session_id),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        match cart.insert(conn).await {
            Ok(cart) => Ok((cart, true)),
            Err(err) => {
                let err = ServiceError::from(err);
                if err.is_unique_violation() {
                    // Lost the creation race; the winner's row is ours.
                    let cart = Self::find_cart(conn, owner).await?.ok_or_else(|| {
                        ServiceError::InternalError("Cart vanished after insert conflict".into())
                    })?;
                    Ok((cart, false))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn find_cart(
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<Option<CartModel>, ServiceError> {
        let query = match owner {
            CartOwner::Customer(id) => Cart::find().filter(cart::Column::CustomerId.eq(*id)),
            CartOwner::Session(sid) => Cart::find().filter(cart::Column::SessionId.eq(sid.clone())),
        };
        Ok(query.one(conn).await?)
    }

    async fn touch(
        conn: &impl ConnectionTrait,
        cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        let mut active: cart::ActiveModel = cart.into();
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    async fn load(
        conn: &impl ConnectionTrait,
        cart: CartModel,
    ) -> Result<CartWithItems, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(CartWithItems { cart, items })
    }
}

/// Input for adding an item to a cart
#[derive(Debug, Deserialize, Validate)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// One entry of a batch quantity update; zero deletes the item.
#[derive(Debug, Deserialize)]
pub struct UpdateItemInput {
    pub item_id: Uuid,
    pub quantity: i32,
}

/// Cart with items and derived totals
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
}

impl CartWithItems {
    /// Always recomputed from the items; nothing cached to drift.
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(CartItemModel::line_total).sum()
    }

    pub fn item_count(&self) -> i32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: i32) -> CartItemModel {
        CartItemModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: None,
            quantity,
            price,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cart_with(items: Vec<CartItemModel>) -> CartWithItems {
        CartWithItems {
            cart: CartModel {
                id: Uuid::new_v4(),
                customer_id: Some(Uuid::new_v4()),
                session_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            items,
        }
    }

    #[test]
    fn subtotal_sums_line_totals() {
        let cart = cart_with(vec![item(dec!(50.00), 2), item(dec!(19.99), 1)]);
        assert_eq!(cart.subtotal(), dec!(119.99));
    }

    #[test]
    fn subtotal_of_empty_cart_is_zero() {
        let cart = cart_with(vec![]);
        assert_eq!(cart.subtotal(), Decimal::ZERO);
        assert!(cart.is_empty());
    }

    #[test]
    fn item_count_sums_quantities() {
        let cart = cart_with(vec![item(dec!(5.00), 3), item(dec!(7.00), 4)]);
        assert_eq!(cart.item_count(), 7);
    }

    #[test]
    fn add_item_input_rejects_zero_quantity() {
        let input = AddItemInput {
            product_id: Uuid::new_v4(),
            variant_id: None,
            quantity: 0,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn add_item_input_defaults_quantity_to_one() {
        let json = format!(r#"{{"product_id": "{}"}}"#, Uuid::new_v4());
        let input: AddItemInput = serde_json::from_str(&json).unwrap();
        assert_eq!(input.quantity, 1);
        assert!(input.variant_id.is_none());
    }
}
