use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Postal address frozen onto an order at creation time.
///
/// A copy of the caller-supplied payload, never a reference into the
/// customer's address book; the order stays correct if that book changes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_addresses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    #[sea_orm(column_name = "type")]
    pub kind: AddressKind,
    pub first_name: String,
    pub last_name: String,
    pub street_address: String,
    pub city: String,
    #[sea_orm(nullable)]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Address kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum AddressKind {
    #[sea_orm(string_value = "shipping")]
    Shipping,
    #[sea_orm(string_value = "billing")]
    Billing,
}

impl Model {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn full_address(&self) -> String {
        let state = self.state.as_deref().unwrap_or_default();
        format!(
            "{}, {}, {} {}, {}",
            self.street_address, self.city, state, self.postal_code, self.country
        )
    }
}
