use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{order, Order, OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Fulfillment status tracking for orders after creation.
///
/// Any enumerated status may be written at any time; there is no
/// transition guard. The entry timestamps (confirmed_at, shipped_at,
/// delivered_at) mark the first time a state was reached and are preserved
/// on later writes.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Writes the order's fulfillment status, stamping the matching entry
    /// timestamp the first time that state is entered.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        let now = Utc::now();

        let confirmed_at = order.confirmed_at;
        let shipped_at = order.shipped_at;
        let delivered_at = order.delivered_at;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(now);
        match new_status {
            OrderStatus::Confirmed if confirmed_at.is_none() => {
                active.confirmed_at = Set(Some(now));
            }
            OrderStatus::Shipped if shipped_at.is_none() => {
                active.shipped_at = Set(Some(now));
            }
            OrderStatus::Delivered if delivered_at.is_none() => {
                active.delivered_at = Set(Some(now));
            }
            _ => {}
        }

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        info!(
            "Order {} status updated from '{}' to '{}'",
            order_id, old_status, new_status
        );

        Ok(updated)
    }

    /// Gets the current fulfillment status of an order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(order.status)
    }
}
