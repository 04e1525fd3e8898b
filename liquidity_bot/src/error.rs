use std::time::Duration;

use bigdecimal::BigDecimal;
use thiserror::Error;

/// Invalid configuration. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("level_count must be in 1..={max} (got {got})")]
    LevelCount { got: i64, max: i64 },

    #[error("{name} must be in 0..={max} (got {got})")]
    BpsRange { name: &'static str, got: i64, max: i64 },

    #[error("level_size must be > 0 (got {0})")]
    LevelSize(BigDecimal),

    #[error("skew must lie in [-1, 1] (got {0})")]
    Skew(BigDecimal),

    #[error("{name} must be > 0 (got {value})")]
    NonPositiveStep { name: &'static str, value: BigDecimal },

    #[error("{0} must be > 0")]
    ZeroDuration(&'static str),

    #[error("max_consecutive_failures must be > 0")]
    MaxFailures,

    #[error("at least one [[accounts]] entry is required")]
    NoAccounts,

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("unknown chain id {0:?}: set lcd_endpoint explicitly")]
    UnknownChain(String),

    #[error("environment variable {0} is not set")]
    MissingSecret(String),

    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("cannot parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Price or order-book read failed; the cycle is abandoned and retried on the next tick.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{what} query failed: {source}")]
    Client {
        what: &'static str,
        #[source]
        source: vortex_client::Error,
    },

    #[error("{what} query timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },

    #[error("oracle returned a non-positive price {0}")]
    InvalidPrice(BigDecimal),

    #[error("{0}")]
    Unavailable(String),
}

impl QueryError {
    pub fn client(what: &'static str, source: vortex_client::Error) -> Self {
        QueryError::Client { what, source }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuoteError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("reference price must be > 0 (got {0})")]
    InvalidReferencePrice(BigDecimal),
}

/// Failure of a whole cycle. Per-action failures are reported as submission outcomes instead.
#[derive(Error, Debug)]
pub enum BotError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error("giving up after {count} consecutive failed cycles; last: {last}")]
    TooManyFailures { count: u32, last: String },
}
