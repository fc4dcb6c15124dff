use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the storefront services.
///
/// Events are published after the owning transaction commits; a rolled-back
/// operation emits nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartUpdated(Uuid),
    CartCleared(Uuid),

    // Order events
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },

    // Coupon events
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        discount_amount: Decimal,
    },

    // Review events
    ReviewSubmitted {
        review_id: Uuid,
        product_id: Uuid,
    },
    ProductRatingUpdated {
        product_id: Uuid,
        average_rating: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the receiver is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event publication failed: {}", e);
        }
    }
}

/// Creates an event channel with the given capacity.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}
