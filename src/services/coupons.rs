use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::{coupon, coupon_usage, Coupon, CouponModel, CouponUsage},
    errors::ServiceError,
};

/// Coupon validity and usage bookkeeping.
///
/// Validity and discount math are pure methods on the coupon model; this
/// service adds the lookups and the per-customer usage accounting that need
/// the database. Usage recording runs on the caller's transaction so a
/// coupon is never marked used for an order that did not commit.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a coupon by its code.
    #[instrument(skip(self))]
    pub async fn find_by_code(&self, code: &str) -> Result<CouponModel, ServiceError> {
        Self::find_by_code_on(&*self.db, code).await
    }

    /// Transaction-aware variant of [`find_by_code`](Self::find_by_code).
    pub async fn find_by_code_on(
        conn: &impl ConnectionTrait,
        code: &str,
    ) -> Result<CouponModel, ServiceError> {
        Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::CouponNotFound(code.to_string()))
    }

    /// Whether this customer may redeem the coupon today.
    ///
    /// False for any invalidity reason: inactive, outside the validity
    /// window, global limit exhausted, or the customer's own redemption
    /// count at its per-user limit.
    pub async fn can_be_used_by(
        &self,
        coupon: &CouponModel,
        customer_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Self::can_be_used_by_on(&*self.db, coupon, customer_id).await
    }

    /// Transaction-aware variant of [`can_be_used_by`](Self::can_be_used_by).
    pub async fn can_be_used_by_on(
        conn: &impl ConnectionTrait,
        coupon: &CouponModel,
        customer_id: Uuid,
    ) -> Result<bool, ServiceError> {
        if !coupon.is_valid(Utc::now().date_naive()) {
            return Ok(false);
        }

        if let Some(limit) = coupon.usage_limit_per_user {
            let used = Self::customer_usage_count_on(conn, coupon.id, customer_id).await?;
            if used >= limit as u64 {
                debug!(
                    "Coupon {} exhausted for customer {}: {}/{}",
                    coupon.code, customer_id, used, limit
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Number of times this customer has redeemed the coupon.
    pub async fn customer_usage_count_on(
        conn: &impl ConnectionTrait,
        coupon_id: Uuid,
        customer_id: Uuid,
    ) -> Result<u64, ServiceError> {
        Ok(CouponUsage::find()
            .filter(coupon_usage::Column::CouponId.eq(coupon_id))
            .filter(coupon_usage::Column::CustomerId.eq(customer_id))
            .count(conn)
            .await?)
    }

    /// Records a redemption: appends a usage row and increments the
    /// coupon's usage counter. Must be called on the transaction that
    /// creates the order.
    pub async fn record_usage_on(
        conn: &impl ConnectionTrait,
        coupon: CouponModel,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<CouponModel, ServiceError> {
        let usage = coupon_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            customer_id: Set(customer_id),
            order_id: Set(order_id),
            created_at: Set(Utc::now()),
        };
        usage.insert(conn).await?;

        let usage_count = coupon.usage_count;
        let mut active: coupon::ActiveModel = coupon.into();
        active.usage_count = Set(usage_count + 1);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }
}
