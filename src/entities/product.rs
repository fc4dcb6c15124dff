use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Product entity for the catalog system
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub category_id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))", nullable)]
    pub cost: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))", nullable)]
    pub discount_price: Option<Decimal>,
    pub stock_quantity: i32,
    pub minimum_stock: i32,
    #[sea_orm(nullable)]
    pub image_url: Option<String>,
    pub is_featured: bool,
    pub is_active: bool,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub average_rating: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::category::Entity",
        from = "Column::CategoryId",
        to = "super::category::Column::Id"
    )]
    Category,
    #[sea_orm(has_many = "super::product_variant::Entity")]
    ProductVariants,
    #[sea_orm(has_many = "super::review::Entity")]
    Reviews,
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductVariants.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Effective storefront price: the discount price when it undercuts the
    /// regular price, the regular price otherwise.
    pub fn display_price(&self) -> Decimal {
        match self.discount_price {
            Some(discounted) if discounted < self.price => discounted,
            _ => self.price,
        }
    }

    /// Percentage saved against the regular price, if any.
    pub fn discount_percentage(&self) -> Option<Decimal> {
        let discounted = self.discount_price?;
        if discounted >= self.price || self.price.is_zero() {
            return None;
        }
        Some(((self.price - discounted) / self.price * Decimal::from(100)).round_dp(2))
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.minimum_stock
    }
}
