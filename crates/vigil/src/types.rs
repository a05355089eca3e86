//! Domain types for chain event notifications.
//!
//! Contains the notification payloads delivered to subscribers
//! (`TxConfirmation`, `SpendDetail`, `BlockEpoch`) and the event handles
//! handed back by the registration API, each owning the receive side of its
//! subscriber channel.

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ==============================================================================
// Channel Capacities
// ==============================================================================

/// Spend subscriber channels hold the single spend notification.
pub const SPEND_CHANNEL_CAPACITY: usize = 1;

/// Confirmation subscriber channels hold the single confirmation
/// notification; the negative-confirmation channel uses the same capacity.
pub const CONF_CHANNEL_CAPACITY: usize = 1;

/// Block epoch channels buffer this many epochs before the fan-out starts
/// dropping them for a slow subscriber.
pub const EPOCH_CHANNEL_CAPACITY: usize = 20;

// ==============================================================================
// Notification Payloads
// ==============================================================================

/// Identifies the exact position of a confirmed transaction: the block that
/// first contained it and the transaction's index within that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxConfirmation {
    pub block_hash: BlockHash,
    pub block_height: u32,
    pub tx_index: u32,
}

/// Details of a transaction consuming a watched outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendDetail {
    pub spent_outpoint: OutPoint,
    pub spender_tx_hash: Txid,
    pub spending_tx: Transaction,
    /// Index of the spending transaction's input that consumes the outpoint.
    pub spender_input_index: u32,
}

/// A new block connected to the best chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEpoch {
    pub height: i32,
    pub hash: BlockHash,
}

// ==============================================================================
// Subscription Event Handles
// ==============================================================================

/// Client handle for a spend subscription. The channel yields the single
/// spend notification, then closes; it also closes unfilled on shutdown.
#[derive(Debug)]
pub struct SpendEvent {
    pub spend: mpsc::Receiver<SpendDetail>,
}

/// Client handle for a confirmation subscription.
///
/// `confirmed` yields the single confirmation notification once the
/// requested depth is reached. `negative_conf` is reserved for reorg
/// signaling and is never fed in this version; it closes on shutdown.
#[derive(Debug)]
pub struct ConfirmationEvent {
    pub confirmed: mpsc::Receiver<TxConfirmation>,
    pub negative_conf: mpsc::Receiver<i32>,
}

/// Client handle for a block epoch subscription. Epochs arrive in height
/// order; epochs are dropped for subscribers that fall behind the buffer.
#[derive(Debug)]
pub struct BlockEpochEvent {
    pub epochs: mpsc::Receiver<BlockEpoch>,
}
