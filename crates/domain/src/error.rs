/// Shared error type used across all Nebo crates.
///
/// Variants map onto the propagation taxonomy: transient errors feed the
/// profile tracker's cooldown, configuration errors surface once as a
/// `res.ok=false`, user-correctable errors render as tool-style stream
/// cards, and everything else is observational.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("auth: {0}")]
    Auth(String),

    #[error("billing: {0}")]
    Billing(String),

    #[error("config: {0}")]
    Config(String),

    #[error("unknown lane: {0}")]
    UnknownLane(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid code: {0}")]
    InvalidCode(String),

    #[error("not connected to NeboLoop yet")]
    NotConnected,

    #[error("denied: {0}")]
    Denied(String),

    #[error("cancelled")]
    Cancelled,

    #[error("control channel: {0}")]
    Channel(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient errors are retried after a cooldown; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::RateLimited(_) | Error::Http(_)
        )
    }

    /// Errors the user can fix themselves (rendered as a card, not a failure).
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Error::InvalidCode(_) | Error::NotConnected | Error::Denied(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
