use thiserror::Error;

use crate::storage::StorageError;

/// Error outputs from the Khalkos wallet core.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum WalletError {
    /// The identity token could not be decoded or is missing the `sub` / `email` claims.
    #[error("malformed_identity: {reason}")]
    MalformedIdentity {
        /// What was wrong with the token.
        reason: String,
    },
    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// The attribute that is invalid
        attribute: String,
        /// The reason the input is invalid
        reason: String,
    },
    /// Reading or writing the secure credential store failed.
    #[error("persistence_error: {0}")]
    Persistence(#[from] StorageError),
    /// Device authentication or PIN verification failed.
    #[error("authentication_failed: {reason}")]
    Authentication {
        /// Why authentication was rejected.
        reason: String,
    },
    /// Too many consecutive PIN failures; the session was aborted.
    #[error("pin_locked_out after {attempts} failed attempts")]
    PinLockedOut {
        /// Number of failed attempts that triggered the lockout.
        attempts: u32,
    },
    /// No wallet has been stored on this device.
    #[error("no_wallet")]
    NoWallet,
    /// The operation requires an unlocked session.
    #[error("not_unlocked")]
    NotUnlocked,
    /// A sponsored deployment for this account is already running.
    #[error("deployment_in_progress")]
    DeploymentInProgress,
    /// A Starknet JSON-RPC or paymaster call failed.
    #[error("chain_rpc_error ({method}): {message}")]
    ChainRpc {
        /// RPC method or contract entrypoint that failed.
        method: String,
        /// JSON-RPC error code, when the node returned a structured error.
        code: Option<i64>,
        /// Human readable cause.
        message: String,
    },
    /// Network connection error with details
    #[error("network_error: {url} - {error}")]
    NetworkError {
        /// The URL that failed
        url: String,
        /// HTTP status code, if the server answered
        status: Option<u16>,
        /// The error message
        error: String,
    },
    /// Unexpected error serializing information
    #[error("serialization_error: {error}")]
    SerializationError {
        /// The error message from the serialization
        error: String,
    },
    /// Unexpected error
    #[error("unexpected_error: {error}")]
    Generic {
        /// The details of the error
        error: String,
    },
}

impl WalletError {
    pub(crate) fn invalid_input(attribute: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_identity(reason: impl Into<String>) -> Self {
        Self::MalformedIdentity {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(error: reqwest::Error) -> Self {
        Self::NetworkError {
            url: error
                .url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            status: error.status().map(|s| s.as_u16()),
            error: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError {
            error: error.to_string(),
        }
    }
}
