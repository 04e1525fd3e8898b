use thiserror::Error;

/// Errors raised by the query side of the client and by response decoding.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LCD returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid coin {0:?}")]
    InvalidCoin(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Failure modes of a broadcast attempt that produced no chain response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// No answer within the deadline; the transaction may or may not have landed.
    #[error("broadcast timed out")]
    Timeout,

    /// The transport failed after the request left; delivery is unknown.
    #[error("broadcast transport failure: {0}")]
    Transport(String),

    /// The transaction was never signed, so it cannot have been broadcast.
    #[error("signing failed: {0}")]
    Signing(String),
}
