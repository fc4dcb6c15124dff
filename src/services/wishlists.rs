use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{product, wishlist, Product, Wishlist, WishlistModel},
    errors::ServiceError,
};

/// Customer wishlists: a flat customer x product set.
#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
}

impl WishlistService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Adds a product to the customer's wishlist. Idempotent: an existing
    /// entry is returned unchanged.
    #[instrument(skip(self))]
    pub async fn add_product(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> Result<WishlistModel, ServiceError> {
        Product::find_by_id(product_id)
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if let Some(existing) = Wishlist::find()
            .filter(wishlist::Column::CustomerId.eq(customer_id))
            .filter(wishlist::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
        {
            return Ok(existing);
        }

        let entry = wishlist::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            product_id: Set(product_id),
            created_at: Set(Utc::now()),
        };

        match entry.insert(&*self.db).await {
            Ok(entry) => Ok(entry),
            Err(err) => {
                let err = ServiceError::from(err);
                if err.is_unique_violation() {
                    // Concurrent add of the same product; reuse the winner.
                    Wishlist::find()
                        .filter(wishlist::Column::CustomerId.eq(customer_id))
                        .filter(wishlist::Column::ProductId.eq(product_id))
                        .one(&*self.db)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::InternalError(
                                "Wishlist entry vanished after insert conflict".into(),
                            )
                        })
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Removes an entry, only when it belongs to this customer.
    #[instrument(skip(self))]
    pub async fn remove_entry(
        &self,
        customer_id: Uuid,
        entry_id: Uuid,
    ) -> Result<(), ServiceError> {
        let entry = Wishlist::find_by_id(entry_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Wishlist entry {} not found", entry_id))
            })?;

        if entry.customer_id != customer_id {
            return Err(ServiceError::Forbidden(
                "Wishlist entry belongs to another customer".to_string(),
            ));
        }

        entry.delete(&*self.db).await?;
        Ok(())
    }

    /// The customer's wishlist, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<WishlistModel>, ServiceError> {
        Ok(Wishlist::find()
            .filter(wishlist::Column::CustomerId.eq(customer_id))
            .order_by_desc(wishlist::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
