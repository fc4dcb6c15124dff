//! Storefront API Library
//!
//! This crate provides the transactional core of the storefront backend:
//! catalog, carts, coupons, checkout, and order lifecycle tracking.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::services::{
    carts::CartService, catalog::ProductCatalogService, coupons::CouponService,
    order_status::OrderStatusService, orders::OrderService, reviews::ReviewService,
    wishlists::WishlistService,
};

/// Application state wiring every service from shared handles.
///
/// Services receive their database connection, configuration, and event
/// sender explicitly; nothing reaches for ambient global state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub carts: CartService,
    pub catalog: ProductCatalogService,
    pub coupons: CouponService,
    pub orders: OrderService,
    pub order_status: OrderStatusService,
    pub reviews: ReviewService,
    pub wishlists: WishlistService,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        event_sender: events::EventSender,
    ) -> Self {
        let coupons = CouponService::new(db.clone());
        Self {
            carts: CartService::new(db.clone(), event_sender.clone()),
            catalog: ProductCatalogService::new(db.clone()),
            orders: OrderService::new(db.clone(), event_sender.clone(), config.clone()),
            order_status: OrderStatusService::new(db.clone(), event_sender.clone()),
            reviews: ReviewService::new(db.clone(), event_sender.clone()),
            wishlists: WishlistService::new(db.clone()),
            coupons,
            db,
            config,
            event_sender,
        }
    }
}
