use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coupon entity.
///
/// Validity is computed, not stored: see [`Model::is_valid`]. The usage
/// counter only moves as a side effect of a committed order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub discount_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))", nullable)]
    pub minimum_purchase: Option<Decimal>,
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    #[sea_orm(nullable)]
    pub usage_limit_per_user: Option<i32>,
    #[sea_orm(nullable)]
    pub valid_from: Option<NaiveDate>,
    #[sea_orm(nullable)]
    pub valid_until: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    Usages,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Coupon discount type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum DiscountType {
    #[sea_orm(string_value = "fixed")]
    Fixed,
    #[sea_orm(string_value = "percentage")]
    Percentage,
}

impl Model {
    /// Whether the coupon is redeemable on `today`.
    ///
    /// Active, inside the inclusive validity window, and below the global
    /// usage limit. Per-user limits need a usage count query and live in
    /// the coupon service.
    pub fn is_valid(&self, today: NaiveDate) -> bool {
        if !self.is_active {
            return false;
        }

        if let Some(from) = self.valid_from {
            if from > today {
                return false;
            }
        }

        if let Some(until) = self.valid_until {
            if until < today {
                return false;
            }
        }

        if let Some(limit) = self.usage_limit {
            if self.usage_count >= limit {
                return false;
            }
        }

        true
    }

    /// Discount against `amount`: percentage of it, or the fixed value
    /// capped at `amount`. Never negative, never more than `amount`.
    pub fn calculate_discount(&self, amount: Decimal) -> Decimal {
        let discount = match self.discount_type {
            DiscountType::Percentage => amount * (self.discount_value / Decimal::from(100)),
            DiscountType::Fixed => self.discount_value.min(amount),
        };
        discount.max(Decimal::ZERO).min(amount)
    }
}
