//! Chain-node client abstraction layer.
//!
//! Defines the [`ChainClient`] trait covering the pull-based queries and
//! subscription controls the notifier needs, and the [`ChainEvents`]
//! push-callback surface the notifier installs when connecting. Provides an
//! in-memory test backend ([`mock::MockChain`]).

pub mod mock;
pub mod types;

pub use types::{BestBlock, BlockDetails, UtxoInfo, VerboseTx};

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, ScriptBuf, Transaction, Txid};

use crate::error::ChainError;

/// Minimal trait covering the chain-node operations the notifier needs.
///
/// Implementations are expected to handle authentication, connection
/// management, and response deserialization internally. The push callbacks
/// registered via [`ChainClient::connect`] must be invoked for every block
/// connected to or disconnected from the best chain (after
/// [`ChainClient::notify_blocks`]) and for every transaction redeeming a
/// watched outpoint (after [`ChainClient::notify_spent`] or a
/// [`ChainClient::rescan`] replay).
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Establish the upstream connection, retrying up to `retry_attempts`
    /// times, and install the push-callback handler.
    async fn connect(
        &self,
        retry_attempts: u32,
        events: Arc<dyn ChainEvents>,
    ) -> Result<(), ChainError>;

    /// Disconnect from the chain node and release related resources.
    async fn shutdown(&self);

    /// Ask the chain node to deliver block connect/disconnect callbacks.
    async fn notify_blocks(&self) -> Result<(), ChainError>;

    /// Ask the chain node to deliver redeeming-transaction callbacks for the
    /// given outpoints.
    async fn notify_spent(&self, outpoints: &[OutPoint]) -> Result<(), ChainError>;

    /// Replay block and transaction events from `from_block` forward so that
    /// newly registered subscriptions observe past events.
    async fn rescan(
        &self,
        from_block: BlockHash,
        scripts: &[ScriptBuf],
        outpoints: &[OutPoint],
    ) -> Result<(), ChainError>;

    /// Fetch the tip of the best chain.
    async fn get_best_block(&self) -> Result<BestBlock, ChainError>;

    /// Fetch a full block by hash.
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, ChainError>;

    /// Fetch confirmation metadata for a transaction by txid.
    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> Result<VerboseTx, ChainError>;

    /// Fetch a specific unspent output. Returns `None` if the output has
    /// been spent or does not exist; `include_mempool` extends the check to
    /// mempool spends.
    async fn get_tx_out(
        &self,
        outpoint: &OutPoint,
        include_mempool: bool,
    ) -> Result<Option<UtxoInfo>, ChainError>;
}

/// Push callbacks supplied by the notifier at connect time.
///
/// Implementations MUST NOT block: callbacks run on the chain client's
/// dispatch path, and any queueing they perform has to be non-blocking.
pub trait ChainEvents: Send + Sync {
    /// A block was connected to the best chain.
    fn on_block_connected(&self, hash: BlockHash, height: i32, time: SystemTime);

    /// A block was disconnected from the best chain.
    fn on_block_disconnected(&self, hash: BlockHash, height: i32, time: SystemTime);

    /// A transaction spending a watched outpoint was observed, either in the
    /// mempool (`block` is `None`) or in a block.
    fn on_redeeming_tx(&self, tx: Transaction, block: Option<BlockDetails>);
}
