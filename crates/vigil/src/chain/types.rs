//! Wire-format types used to shuttle data between the chain-node client and
//! the notifier core. These are intermediate representations, owned by
//! vigil and independent of any RPC library's response shapes.

use bitcoin::{Amount, BlockHash, ScriptBuf, Txid};

/// The tip of the best chain as reported by the chain node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestBlock {
    pub hash: BlockHash,
    pub height: i32,
}

/// Verbose transaction lookup result.
///
/// `block_hash` is `None` for unconfirmed (mempool) transactions, in which
/// case `confirmations` is zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerboseTx {
    pub txid: Txid,
    pub block_hash: Option<BlockHash>,
    pub confirmations: u32,
}

/// UTXO information from a `gettxout`-style query.
#[derive(Debug, Clone)]
pub struct UtxoInfo {
    pub value: Amount,
    pub script_pub_key: ScriptBuf,
    pub confirmations: u64,
    pub coinbase: bool,
}

/// Position of a redeeming transaction within a block, supplied alongside
/// spend push callbacks for transactions already mined. `None` is passed for
/// mempool transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDetails {
    pub hash: BlockHash,
    pub height: i32,
    /// Index of the transaction within the block.
    pub index: i32,
    pub time: i64,
}
