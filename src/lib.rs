// ===============================
// src/lib.rs
// ===============================
//
// venue_bridge — multi-venue market-data / order-routing adapter layer.
//
// A `VenueSession` owns one venue connection: a WebSocket stream for
// normalized market ticks and order updates, plus an authenticated REST
// gateway for order and account operations. Venue-specific wire formats,
// endpoints and auth schemes live behind the `VenueAdapter` trait; adding
// a venue means one new module under `venues/` plus a profile entry.

pub mod adapter;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod rest;
pub mod stream;
pub mod venues;

pub use adapter::VenueSession;
pub use config::{VenueConfig, VenueKind};
pub use domain::{
    AccountSnapshot, MarginMode, MarketTick, OrderRequest, OrderState, OrderStatus, OrderType,
    Position, Side, TimeInForce,
};
pub use error::AdapterError;
pub use stream::SubscriptionHandle;
