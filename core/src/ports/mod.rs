//! Ports to the outside world.
//!
//! Every trait returns `Pin<Box<dyn Future>>` instead of using `async fn` so
//! the services can hold them as `Arc<dyn Trait>`.
//!
//! # Implementations
//!
//! | port | production | tests |
//! |---|---|---|
//! | [`MarketplaceStore`] | `PgMarketplaceStore` (`marketplace-postgres`) | `InMemoryStore` |
//! | [`PaymentProcessor`] | `StripeClient` (`marketplace-server`) | `MockPaymentProcessor` |
//! | [`Cache`] | `RedisCache` (`marketplace-server`) | `InMemoryCache` |
//! | [`Notifier`] | `HttpNotifier` / `LogNotifier` | `RecordingNotifier` |

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod notify;
pub mod payments;
pub mod store;

pub use cache::{Cache, CacheError};
pub use notify::{Notifier, NotifyError};
pub use payments::{
    ChargeOutcome, ChargeRequest, ChargeStatus, PaymentError, PaymentProcessor, RefundOutcome,
    RefundRequest, TransferOutcome, TransferRequest, VoidRequest,
};
pub use store::{BookingCommit, JobCommit, MarketplaceStore, ProviderProfile, StoreError};

/// Boxed future returned by every port method
pub type PortFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;
