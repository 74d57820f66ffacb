//! Application state for the marketplace HTTP server.

use crate::app::MarketplaceService;
use crate::auth::TokenVerifier;
use crate::config::RateLimitConfig;
use crate::webhook::WebhookVerifier;
use axum::extract::FromRef;
use marketplace_core::ports::{Cache, MarketplaceStore};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Business operations
    pub marketplace: Arc<MarketplaceService>,

    /// Store handle for readiness checks
    pub store: Arc<dyn MarketplaceStore>,

    /// Idempotency and rate-limit cache
    pub cache: Arc<dyn Cache>,

    /// Session token verification
    pub tokens: Arc<TokenVerifier>,

    /// Webhook signature verification
    pub webhooks: Arc<WebhookVerifier>,

    /// Per-IP request limit
    pub rate_limit: RateLimitConfig,

    /// Rows per manual payout sweep
    pub payout_batch: u32,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        marketplace: MarketplaceService,
        cache: Arc<dyn Cache>,
        tokens: TokenVerifier,
        webhooks: WebhookVerifier,
        rate_limit: RateLimitConfig,
        payout_batch: u32,
    ) -> Self {
        Self {
            store: Arc::clone(marketplace.store()),
            marketplace: Arc::new(marketplace),
            cache,
            tokens: Arc::new(tokens),
            webhooks: Arc::new(webhooks),
            rate_limit,
            payout_batch,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tokens", &self.tokens)
            .field("webhooks", &self.webhooks)
            .field("rate_limit", &self.rate_limit)
            .field("payout_batch", &self.payout_batch)
            .finish_non_exhaustive()
    }
}

// Readiness takes the store directly
impl FromRef<AppState> for Arc<dyn MarketplaceStore> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.store)
    }
}
