pub mod carts;
pub mod catalog;
pub mod coupons;
pub mod order_status;
pub mod orders;
pub mod reviews;
pub mod wishlists;

pub use carts::{CartOwner, CartService, CartWithItems};
pub use catalog::ProductCatalogService;
pub use coupons::CouponService;
pub use order_status::OrderStatusService;
pub use orders::{CreateOrderInput, OrderAddressInput, OrderDetail, OrderService};
pub use reviews::ReviewService;
pub use wishlists::WishlistService;
