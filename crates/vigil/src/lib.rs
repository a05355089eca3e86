//! Core library for **Vigil**, a Bitcoin chain event notifier.
//!
//! Clients subscribe to three classes of chain events and receive
//! exactly-once, ordered notifications as the best chain advances: every
//! new block (block epochs), a transaction reaching a requested
//! confirmation depth, and an unspent output being consumed. A single
//! dispatcher task owns all subscription state; upstream push callbacks and
//! client registrations reach it through channels, so the chain node's
//! dispatch path is never blocked on subscriber progress.
//!
//! The crate is intentionally transport-agnostic: the
//! [`chain::ChainClient`] trait can be backed by a btcd websocket client, a
//! Bitcoin Core RPC adapter, or the in-memory [`chain::mock::MockChain`].

pub mod btcd;
pub mod chain;
pub mod error;
pub mod notifier;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use btcd::BtcdNotifier;
pub use error::{ChainError, NotifierError};
pub use notifier::{ChainNotifier, NotifierRegistry};
pub use types::{
    BlockEpoch, BlockEpochEvent, ConfirmationEvent, SpendDetail, SpendEvent, TxConfirmation,
};
