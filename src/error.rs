//! Error types for chainstamp.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while fingerprinting, stamping, or verifying files.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed address, fingerprint, file, or request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The ledger endpoint could not be reached or returned garbage.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Endpoint or contract address missing from configuration.
    #[error("gateway misconfigured: {0}")]
    GatewayMisconfigured(String),

    /// The fingerprint already has a stamp (on chain or in the side-store).
    #[error("file already stamped: {fingerprint}")]
    DuplicateStamp {
        /// Hex fingerprint that was already recorded.
        fingerprint: String,
    },

    /// A ledger request exceeded its deadline.
    #[error("transport timeout: {0}")]
    TransportTimeout(String),

    /// Both the full-range and narrowed-range history queries failed.
    #[error("history unavailable: {0}")]
    HistoryUnavailable(String),

    /// The ledger rejected the transaction for a reason other than duplication.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The signing account cannot pay for gas.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Side-store failure. Only fatal for reads that asked for it explicitly.
    #[error("side-store error: {0}")]
    SideStore(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// User-facing classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The caller supplied something invalid. Do not retry.
    InvalidInput,
    /// The proof already exists.
    AlreadyStamped,
    /// The network or a service is unavailable. Retry later.
    Unavailable,
    /// The proof exists but supporting metadata may be incomplete.
    Partial,
}

impl Classification {
    /// Human-readable explanation for this class of failure.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidInput => "your input was invalid",
            Self::AlreadyStamped => "the proof was already created",
            Self::Unavailable => "the network or service is unavailable, retry later",
            Self::Partial => "partially succeeded, proof exists but metadata may be incomplete",
        }
    }
}

impl Error {
    /// Classify this error for presentation to a user.
    #[must_use]
    pub fn classification(&self) -> Classification {
        match self {
            Self::InvalidInput(_) | Self::Rejected(_) | Self::InsufficientFunds(_) => {
                Classification::InvalidInput
            }
            Self::DuplicateStamp { .. } => Classification::AlreadyStamped,
            Self::SideStore(_) => Classification::Partial,
            Self::GatewayUnavailable(_)
            | Self::GatewayMisconfigured(_)
            | Self::TransportTimeout(_)
            | Self::HistoryUnavailable(_)
            | Self::Config(_)
            | Self::Io(_) => Classification::Unavailable,
        }
    }

    /// Whether the failure is transport-level and worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportTimeout(_) | Self::GatewayUnavailable(_))
    }

    pub(crate) fn duplicate(fingerprint: impl std::fmt::Display) -> Self {
        Self::DuplicateStamp {
            fingerprint: fingerprint.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::TransportTimeout(e.to_string())
        } else {
            Self::GatewayUnavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::GatewayUnavailable(format!("malformed JSON-RPC payload: {e}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::SideStore(e.to_string())
    }
}
