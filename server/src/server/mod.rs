//! HTTP server wiring.
//!
//! - Application state shared by every handler
//! - Router with the `/api` routes, health checks and middleware

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
