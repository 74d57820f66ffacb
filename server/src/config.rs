//! Configuration management for the marketplace server.
//!
//! Loads configuration from environment variables (a `.env` file is read by
//! the binary first). Secrets have no defaults: a missing `DATABASE_URL`,
//! `PAYMENTS_SECRET_KEY`, `PAYMENTS_WEBHOOK_SECRET` or `AUTH_JWT_SECRET`
//! fails startup. Every other setting falls back to a default, but a value
//! that is present and unparsable is an error rather than silently ignored.

use marketplace_core::money::{Currency, Money};
use marketplace_core::split::{
    FeePolicy, DEFAULT_GST_BPS, DEFAULT_MINIMUM_CHARGE_CENTS, DEFAULT_STARTER_FEE_BPS,
};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server
    pub server: ServerConfig,
    /// `PostgreSQL`
    pub database: DatabaseConfig,
    /// Redis cache
    pub redis: RedisConfig,
    /// Payment processor
    pub payments: PaymentsConfig,
    /// Session token verification
    pub auth: AuthConfig,
    /// Realtime notification service
    pub realtime: RealtimeConfig,
    /// Background sweeps
    pub sweeps: SweepConfig,
    /// Request rate limiting
    pub rate_limit: RateLimitConfig,
    /// Fee policy used until an admin persists one
    pub fees: FeePolicy,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Prometheus exporter listen address
    pub metrics_addr: SocketAddr,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Run embedded migrations at startup
    pub run_migrations: bool,
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL
    pub url: String,
}

/// Payment processor configuration
#[derive(Clone)]
pub struct PaymentsConfig {
    /// API base URL
    pub api_base: String,
    /// Secret API key
    pub secret_key: String,
    /// Webhook signing secret
    pub webhook_secret: String,
    /// Accepted clock skew for webhook signatures
    pub webhook_tolerance: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for PaymentsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentsConfig")
            .field("api_base", &self.api_base)
            .field("secret_key", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("webhook_tolerance", &self.webhook_tolerance)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Session token configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
    /// Expected `iss` claim, if the provider sets one
    pub issuer: Option<String>,
    /// Cookie carrying the session token for browser clients
    pub cookie_name: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

/// Realtime notification configuration
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Publish endpoint; notifications are only logged when unset
    pub url: Option<String>,
    /// Bearer token for the publish endpoint
    pub token: Option<String>,
}

/// Background sweep configuration
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the payout and auto-confirm sweeps run
    pub interval: Duration,
    /// Time after `completed_by_provider` before the system confirms
    pub auto_confirm_after: Duration,
    /// Rows handled per sweep
    pub batch_size: u32,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per client IP per window
    pub max_requests: u64,
    /// Window length
    pub window: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required secret is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let fees = FeePolicy {
            starter_fee_bps: vars.parse_or("PLATFORM_FEE_BPS", DEFAULT_STARTER_FEE_BPS)?,
            gst_bps: vars.parse_or("GST_BPS", DEFAULT_GST_BPS)?,
            minimum_charge: Money::from_cents(
                vars.parse_or("MINIMUM_CHARGE_CENTS", DEFAULT_MINIMUM_CHARGE_CENTS)?,
            ),
            currency: vars.parse_or("CURRENCY", Currency::Nzd)?,
        };
        if fees.validate().is_err() {
            return Err(ConfigError::Invalid {
                key: "PLATFORM_FEE_BPS",
                value: format!("{}/{}", fees.starter_fee_bps, fees.gst_bps),
            });
        }

        Ok(Self {
            server: ServerConfig {
                host: vars.string_or("HOST", "0.0.0.0"),
                port: vars.parse_or("PORT", 8080)?,
                metrics_addr: vars.parse_or(
                    "METRICS_ADDR",
                    SocketAddr::from(([0, 0, 0, 0], 9090)),
                )?,
            },
            database: DatabaseConfig {
                url: vars.required("DATABASE_URL")?,
                run_migrations: vars.parse_or("DATABASE_RUN_MIGRATIONS", true)?,
            },
            redis: RedisConfig {
                url: vars.string_or("REDIS_URL", "redis://127.0.0.1:6379"),
            },
            payments: PaymentsConfig {
                api_base: vars.string_or("PAYMENTS_API_BASE", "https://api.stripe.com"),
                secret_key: vars.required("PAYMENTS_SECRET_KEY")?,
                webhook_secret: vars.required("PAYMENTS_WEBHOOK_SECRET")?,
                webhook_tolerance: Duration::from_secs(
                    vars.parse_or("PAYMENTS_WEBHOOK_TOLERANCE_SECS", 300)?,
                ),
                request_timeout: Duration::from_secs(vars.parse_or("PAYMENTS_TIMEOUT_SECS", 30)?),
            },
            auth: AuthConfig {
                jwt_secret: vars.required("AUTH_JWT_SECRET")?,
                issuer: vars.optional("AUTH_JWT_ISSUER"),
                cookie_name: vars.string_or("AUTH_COOKIE_NAME", "session"),
            },
            realtime: RealtimeConfig {
                url: vars.optional("REALTIME_URL"),
                token: vars.optional("REALTIME_TOKEN"),
            },
            sweeps: SweepConfig {
                interval: Duration::from_secs(vars.parse_or("SWEEP_INTERVAL_SECS", 300)?),
                auto_confirm_after: Duration::from_secs(
                    vars.parse_or::<u64>("AUTO_CONFIRM_HOURS", 72)?.saturating_mul(3600),
                ),
                batch_size: vars.parse_or("SWEEP_BATCH_SIZE", 100)?,
            },
            rate_limit: RateLimitConfig {
                max_requests: vars.parse_or("RATE_LIMIT_REQUESTS", 120)?,
                window: Duration::from_secs(vars.parse_or("RATE_LIMIT_WINDOW_SECS", 60)?),
            },
            fees,
        })
    }

    /// Address the HTTP server binds to
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }
}
