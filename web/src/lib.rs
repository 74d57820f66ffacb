//! Axum integration for the services marketplace.
//!
//! This crate holds the HTTP plumbing shared by the API: the [`AppError`]
//! type every handler returns, request extractors, the correlation ID
//! middleware and the health endpoints. Routes and domain handlers live in
//! `marketplace-server`.
//!
//! # Request Flow
//!
//! 1. **Correlation ID** assigned by [`correlation_id_layer`]
//! 2. **Actor** resolved from the session token
//! 3. **Body** parsed with [`ApiJson`] (400 with a `reason` on failure)
//! 4. **Service** runs the reducer, processor calls and store commit
//! 5. **Errors** convert to [`AppError`] and render as JSON

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::{ApiJson, ClientIp, CorrelationId, IdempotencyKey, IDEMPOTENCY_KEY_HEADER};
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
