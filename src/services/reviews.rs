use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order, order_item, product, review, Order, OrderItem, OrderStatus, Product, Review,
        ReviewModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Product review lifecycle and rating aggregation.
///
/// Reviews are created unapproved and only approved reviews feed the
/// product's average rating, which is recomputed after every mutation.
/// The recomputation is a full scan over the product's approved reviews;
/// fine at current review volume, a scaling risk if it grows.
#[derive(Clone)]
pub struct ReviewService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ReviewService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Submits a review for a product. One review per customer per product;
    /// the review starts unapproved and is flagged as a verified purchase
    /// when the customer has a delivered order containing the product.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, product_id = %input.product_id))]
    pub async fn submit_review(&self, input: SubmitReviewInput) -> Result<ReviewModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let existing = Review::find()
            .filter(review::Column::ProductId.eq(input.product_id))
            .filter(review::Column::CustomerId.eq(input.customer_id))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(
                "You have already reviewed this product".to_string(),
            ));
        }

        let is_verified_purchase =
            Self::has_delivered_order_with_product(&txn, input.customer_id, input.product_id)
                .await?;

        let review = review::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(input.product_id),
            customer_id: Set(input.customer_id),
            rating: Set(input.rating),
            title: Set(input.title),
            comment: Set(input.comment),
            is_verified_purchase: Set(is_verified_purchase),
            // Requires moderation before it counts toward the average.
            is_approved: Set(false),
            helpful_count: Set(0),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        let review = review.insert(&txn).await?;

        Self::recompute_product_rating(&txn, review.product_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ReviewSubmitted {
                review_id: review.id,
                product_id: review.product_id,
            })
            .await;

        info!(
            "Review {} submitted for product {}",
            review.id, review.product_id
        );
        Ok(review)
    }

    /// Updates the customer's own review. Editing resets approval, so the
    /// change goes back through moderation before affecting the average.
    #[instrument(skip(self, input))]
    pub async fn update_review(
        &self,
        review_id: Uuid,
        customer_id: Uuid,
        input: UpdateReviewInput,
    ) -> Result<ReviewModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let review = Review::find_by_id(review_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Review {} not found", review_id)))?;

        if review.customer_id != customer_id {
            return Err(ServiceError::Forbidden(
                "Review belongs to another customer".to_string(),
            ));
        }

        let product_id = review.product_id;
        let title = review.title.clone();
        let comment = review.comment.clone();

        let mut active: review::ActiveModel = review.into();
        active.rating = Set(input.rating);
        active.title = Set(input.title.or(title));
        active.comment = Set(input.comment.or(comment));
        active.is_approved = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        Self::recompute_product_rating(&txn, product_id).await?;
        txn.commit().await?;

        Ok(updated)
    }

    /// Moderation pathway: approving a review is what moves the product's
    /// average rating.
    #[instrument(skip(self))]
    pub async fn approve_review(&self, review_id: Uuid) -> Result<ReviewModel, ServiceError> {
        let txn = self.db.begin().await?;

        let review = Review::find_by_id(review_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Review {} not found", review_id)))?;

        let product_id = review.product_id;
        let mut active: review::ActiveModel = review.into();
        active.is_approved = Set(true);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        let average = Self::recompute_product_rating(&txn, product_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductRatingUpdated {
                product_id,
                average_rating: average,
            })
            .await;

        Ok(updated)
    }

    /// Deletes a review and refreshes the product's average.
    #[instrument(skip(self))]
    pub async fn delete_review(&self, review_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let review = Review::find_by_id(review_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Review {} not found", review_id)))?;

        let product_id = review.product_id;
        review.delete(&txn).await?;

        Self::recompute_product_rating(&txn, product_id).await?;
        txn.commit().await?;

        info!("Review {} deleted", review_id);
        Ok(())
    }

    /// Mean rating over the product's approved reviews, zero when there are
    /// none. Written back to the product row.
    async fn recompute_product_rating(
        conn: &impl ConnectionTrait,
        product_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let approved = Review::find()
            .filter(review::Column::ProductId.eq(product_id))
            .filter(review::Column::IsApproved.eq(true))
            .all(conn)
            .await?;

        let average = if approved.is_empty() {
            Decimal::ZERO
        } else {
            let sum: i64 = approved.iter().map(|r| i64::from(r.rating)).sum();
            (Decimal::from(sum) / Decimal::from(approved.len() as i64)).round_dp(2)
        };

        let product = Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut active: product::ActiveModel = product.into();
        active.average_rating = Set(average);
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;

        Ok(average)
    }

    async fn has_delivered_order_with_product(
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let delivered_order_ids: Vec<Uuid> = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .all(conn)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();

        if delivered_order_ids.is_empty() {
            return Ok(false);
        }

        let item = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(delivered_order_ids))
            .filter(order_item::Column::ProductId.eq(product_id))
            .one(conn)
            .await?;

        Ok(item.is_some())
    }
}

/// Input for submitting a review
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitReviewInput {
    pub customer_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    pub title: Option<String>,
    pub comment: Option<String>,
}

/// Input for editing an existing review
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateReviewInput {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    pub title: Option<String>,
    pub comment: Option<String>,
}
