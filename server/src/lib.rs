//! # Marketplace Server
//!
//! HTTP API and background workers for the local-services marketplace.
//!
//! The domain rules live in `marketplace-core`; this crate wires them to
//! the outside world:
//!
//! - **Services** ([`app`]): load, reduce, execute effects, commit
//! - **HTTP** ([`api`], [`server`]): axum handlers, router and state
//! - **Adapters**: payment processor client ([`stripe`]), webhook
//!   verification ([`webhook`]), Redis cache ([`cache`]), realtime
//!   notifications ([`notify`]), session tokens ([`auth`])
//! - **Ambient**: configuration ([`config`]) and business metrics
//!   ([`metrics`])
//!
//! ```text
//! HTTP ─▶ Actor extractor ─▶ handler ─▶ MarketplaceService
//!                                         │
//!          ┌──────────────────────────────┼─────────────────────┐
//!          ▼                              ▼                     ▼
//!   PaymentProcessor              MarketplaceStore         Notifier
//!   (StripeClient)                (PgMarketplaceStore)     (HttpNotifier)
//! ```

pub mod api;
pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod notify;
pub mod server;
pub mod stripe;
pub mod webhook;

pub use app::MarketplaceService;
pub use config::Config;
pub use server::{build_router, AppState};
