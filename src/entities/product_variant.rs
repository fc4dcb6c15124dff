use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Product variant entity, one attribute name/value pair per row (e.g. size=M).
/// Uniqueness over (product_id, attribute_name, attribute_value).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub attribute_name: String,
    pub attribute_value: String,
    pub stock_quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price_modifier: Decimal,
    #[sea_orm(nullable)]
    pub sku_suffix: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_available(&self) -> bool {
        self.stock_quantity > 0
    }

    /// Price of this variant given its product's display price.
    pub fn final_price(&self, product_display_price: Decimal) -> Decimal {
        product_display_price + self.price_modifier
    }
}
