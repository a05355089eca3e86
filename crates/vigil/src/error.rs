//! Error types for vigil.

use bitcoin::{BlockHash, Txid};

// ==============================================================================
// Chain Client Errors
// ==============================================================================

/// Structured errors from the chain-node client layer.
///
/// Each variant captures a specific failure mode rather than collapsing
/// everything into a single `String`, which makes programmatic error
/// handling (e.g. retries on transport errors vs. logic errors) possible.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("chain client is not connected")]
    NotConnected,

    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("transaction not found: {0}")]
    TxNotFound(Txid),

    #[error("transaction {0} is not confirmed")]
    TxNotConfirmed(Txid),

    #[error("chain backend: {0}")]
    Backend(String),
}

// ==============================================================================
// Notifier Errors
// ==============================================================================

/// Top-level error type for the vigil crate.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// The notifier received the quit signal while a registration was in
    /// flight. The subscription was never admitted.
    #[error("chain notifier is shutting down")]
    ShuttingDown,

    /// Confirmation subscriptions require a depth of at least one.
    #[error("number of confirmations must be at least 1")]
    ZeroConfTarget,

    /// A notifier with the same type tag is already present in the registry.
    #[error("notifier type `{0}` is already registered")]
    DuplicateNotifier(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}
