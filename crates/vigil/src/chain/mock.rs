//! Mock [`ChainClient`] implementation for tests.
//!
//! Uses a builder pattern (`MockChain::builder()`) to register canned
//! blocks, transactions, and UTXOs before the mock is consumed. Harness
//! methods (`connect_block`, `disconnect_block`, `broadcast_spending_tx`)
//! drive the push-callback surface the way a live chain node would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash, OutPoint, ScriptBuf, Transaction, Txid};

use crate::error::ChainError;

use super::types::{BestBlock, UtxoInfo, VerboseTx};
use super::{ChainClient, ChainEvents};

/// A mock chain backend for testing. Serves canned data from `HashMap`s
/// populated via the builder, records subscription calls for assertions,
/// and forwards harness-driven events to the registered callback handler.
pub struct MockChain {
    state: Mutex<MockChainState>,
}

struct MockChainState {
    handler: Option<Arc<dyn ChainEvents>>,
    best_block: BestBlock,
    blocks: HashMap<BlockHash, Block>,
    verbose_txs: HashMap<Txid, VerboseTx>,
    utxos: HashMap<OutPoint, UtxoInfo>,
    /// Spending transactions replayed when a rescan covers their outpoint.
    spending_txs: HashMap<OutPoint, Transaction>,
    watched_outpoints: Vec<OutPoint>,
    verbose_tx_requests: Vec<Txid>,
    rescan_requests: Vec<(BlockHash, Vec<OutPoint>)>,
    notify_blocks_calls: usize,
}

impl MockChain {
    pub fn builder() -> MockChainBuilder {
        MockChainBuilder {
            best_block: BestBlock {
                hash: BlockHash::all_zeros(),
                height: 0,
            },
            blocks: HashMap::new(),
            verbose_txs: HashMap::new(),
            utxos: HashMap::new(),
            spending_txs: HashMap::new(),
        }
    }

    /// Connect a block: register it, advance the best block, and fire the
    /// `on_block_connected` callback.
    pub fn connect_block(&self, hash: BlockHash, height: i32, block: Block) {
        let handler = {
            let mut state = self.lock();
            state.blocks.insert(hash, block);
            state.best_block = BestBlock { hash, height };
            state.handler.clone()
        };
        if let Some(handler) = handler {
            handler.on_block_connected(hash, height, SystemTime::now());
        }
    }

    /// Fire the `on_block_disconnected` callback without mutating state.
    pub fn disconnect_block(&self, hash: BlockHash, height: i32) {
        let handler = self.lock().handler.clone();
        if let Some(handler) = handler {
            handler.on_block_disconnected(hash, height, SystemTime::now());
        }
    }

    /// Deliver a redeeming transaction through the push-callback path, the
    /// way a chain node reports a watched outpoint being spent.
    pub fn broadcast_spending_tx(&self, tx: Transaction) {
        let handler = self.lock().handler.clone();
        if let Some(handler) = handler {
            handler.on_redeeming_tx(tx, None);
        }
    }

    /// Outpoints passed to `notify_spent`, in call order.
    pub fn watched_outpoints(&self) -> Vec<OutPoint> {
        self.lock().watched_outpoints.clone()
    }

    /// Txids passed to `get_raw_transaction_verbose`, in call order.
    pub fn verbose_tx_requests(&self) -> Vec<Txid> {
        self.lock().verbose_tx_requests.clone()
    }

    /// Rescan invocations as `(from_block, outpoints)` pairs.
    pub fn rescan_requests(&self) -> Vec<(BlockHash, Vec<OutPoint>)> {
        self.lock().rescan_requests.clone()
    }

    pub fn notify_blocks_calls(&self) -> usize {
        self.lock().notify_blocks_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockChainState> {
        self.state.lock().expect("mock chain state lock")
    }
}

/// Builder for configuring a [`MockChain`] with canned data.
pub struct MockChainBuilder {
    best_block: BestBlock,
    blocks: HashMap<BlockHash, Block>,
    verbose_txs: HashMap<Txid, VerboseTx>,
    utxos: HashMap<OutPoint, UtxoInfo>,
    spending_txs: HashMap<OutPoint, Transaction>,
}

impl MockChainBuilder {
    /// Override the default best block (all-zero hash, height 0).
    pub fn with_best_block(mut self, hash: BlockHash, height: i32) -> Self {
        self.best_block = BestBlock { hash, height };
        self
    }

    /// Register a block, keyed by the given hash.
    pub fn with_block(mut self, hash: BlockHash, block: Block) -> Self {
        self.blocks.insert(hash, block);
        self
    }

    /// Register a verbose transaction lookup result, keyed by its txid.
    pub fn with_verbose_tx(mut self, tx: VerboseTx) -> Self {
        self.verbose_txs.insert(tx.txid, tx);
        self
    }

    /// Place an output in the UTXO set.
    pub fn with_utxo(mut self, outpoint: OutPoint, info: UtxoInfo) -> Self {
        self.utxos.insert(outpoint, info);
        self
    }

    /// Register a transaction spending `outpoint`, to be replayed through
    /// `on_redeeming_tx` when a rescan covers that outpoint.
    pub fn with_spending_tx(mut self, outpoint: OutPoint, tx: Transaction) -> Self {
        self.spending_txs.insert(outpoint, tx);
        self
    }

    /// Consume the builder and produce a [`MockChain`].
    pub fn build(self) -> MockChain {
        MockChain {
            state: Mutex::new(MockChainState {
                handler: None,
                best_block: self.best_block,
                blocks: self.blocks,
                verbose_txs: self.verbose_txs,
                utxos: self.utxos,
                spending_txs: self.spending_txs,
                watched_outpoints: Vec::new(),
                verbose_tx_requests: Vec::new(),
                rescan_requests: Vec::new(),
                notify_blocks_calls: 0,
            }),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn connect(
        &self,
        _retry_attempts: u32,
        events: Arc<dyn ChainEvents>,
    ) -> Result<(), ChainError> {
        self.lock().handler = Some(events);
        Ok(())
    }

    async fn shutdown(&self) {
        self.lock().handler = None;
    }

    async fn notify_blocks(&self) -> Result<(), ChainError> {
        let mut state = self.lock();
        if state.handler.is_none() {
            return Err(ChainError::NotConnected);
        }
        state.notify_blocks_calls += 1;
        Ok(())
    }

    async fn notify_spent(&self, outpoints: &[OutPoint]) -> Result<(), ChainError> {
        self.lock().watched_outpoints.extend_from_slice(outpoints);
        Ok(())
    }

    async fn rescan(
        &self,
        from_block: BlockHash,
        _scripts: &[ScriptBuf],
        outpoints: &[OutPoint],
    ) -> Result<(), ChainError> {
        let (handler, replays) = {
            let mut state = self.lock();
            state.rescan_requests.push((from_block, outpoints.to_vec()));
            let replays: Vec<Transaction> = outpoints
                .iter()
                .filter_map(|outpoint| state.spending_txs.get(outpoint).cloned())
                .collect();
            (state.handler.clone(), replays)
        };
        // Fire outside the lock: the handler may re-enter the mock.
        if let Some(handler) = handler {
            for tx in replays {
                handler.on_redeeming_tx(tx, None);
            }
        }
        Ok(())
    }

    async fn get_best_block(&self) -> Result<BestBlock, ChainError> {
        Ok(self.lock().best_block)
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<Block, ChainError> {
        self.lock()
            .blocks
            .get(hash)
            .cloned()
            .ok_or(ChainError::BlockNotFound(*hash))
    }

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> Result<VerboseTx, ChainError> {
        let mut state = self.lock();
        state.verbose_tx_requests.push(*txid);
        state
            .verbose_txs
            .get(txid)
            .cloned()
            .ok_or(ChainError::TxNotFound(*txid))
    }

    async fn get_tx_out(
        &self,
        outpoint: &OutPoint,
        _include_mempool: bool,
    ) -> Result<Option<UtxoInfo>, ChainError> {
        Ok(self.lock().utxos.get(outpoint).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bitcoin::Amount;

    use crate::chain::BlockDetails;
    use crate::test_util::{block_hash_from_byte, block_with_txs, spending_tx, txid_from_byte};

    use super::*;

    #[derive(Default)]
    struct RecordingEvents {
        connected: Mutex<Vec<(BlockHash, i32)>>,
        redeeming: Mutex<Vec<Txid>>,
    }

    impl ChainEvents for RecordingEvents {
        fn on_block_connected(&self, hash: BlockHash, height: i32, _time: SystemTime) {
            self.connected.lock().unwrap().push((hash, height));
        }

        fn on_block_disconnected(&self, _hash: BlockHash, _height: i32, _time: SystemTime) {}

        fn on_redeeming_tx(&self, tx: Transaction, _block: Option<BlockDetails>) {
            self.redeeming.lock().unwrap().push(tx.compute_txid());
        }
    }

    #[tokio::test]
    async fn builder_defaults_to_empty_genesis_tip() {
        let chain = MockChain::builder().build();
        let best = chain.get_best_block().await.unwrap();
        assert_eq!(best.hash, BlockHash::all_zeros());
        assert_eq!(best.height, 0);
    }

    #[tokio::test]
    async fn unknown_lookups_return_not_found() {
        let chain = MockChain::builder().build();

        let missing_block = chain.get_block(&block_hash_from_byte(9)).await;
        assert!(matches!(missing_block, Err(ChainError::BlockNotFound(_))));

        let missing_tx = chain.get_raw_transaction_verbose(&txid_from_byte(9)).await;
        assert!(matches!(missing_tx, Err(ChainError::TxNotFound(_))));

        let missing_utxo = chain
            .get_tx_out(&OutPoint::new(txid_from_byte(9), 0), true)
            .await
            .unwrap();
        assert!(missing_utxo.is_none());
    }

    #[tokio::test]
    async fn canned_utxo_is_served() {
        let outpoint = OutPoint::new(txid_from_byte(1), 0);
        let chain = MockChain::builder()
            .with_utxo(
                outpoint,
                UtxoInfo {
                    value: Amount::from_sat(5_000),
                    script_pub_key: ScriptBuf::new(),
                    confirmations: 3,
                    coinbase: false,
                },
            )
            .build();

        let utxo = chain.get_tx_out(&outpoint, true).await.unwrap().unwrap();
        assert_eq!(utxo.value, Amount::from_sat(5_000));
    }

    #[tokio::test]
    async fn connect_block_advances_tip_and_fires_callback() {
        let chain = MockChain::builder().build();
        let events = Arc::new(RecordingEvents::default());
        chain.connect(20, events.clone()).await.unwrap();

        let hash = block_hash_from_byte(1);
        chain.connect_block(hash, 101, block_with_txs(vec![]));

        assert_eq!(chain.get_best_block().await.unwrap().height, 101);
        assert_eq!(*events.connected.lock().unwrap(), vec![(hash, 101)]);
    }

    #[tokio::test]
    async fn rescan_replays_canned_spend_through_callback() {
        let outpoint = OutPoint::new(txid_from_byte(1), 1);
        let spender = spending_tx(&[outpoint]);
        let spender_txid = spender.compute_txid();

        let chain = MockChain::builder()
            .with_spending_tx(outpoint, spender)
            .build();
        let events = Arc::new(RecordingEvents::default());
        chain.connect(20, events.clone()).await.unwrap();

        let from_block = block_hash_from_byte(7);
        chain.rescan(from_block, &[], &[outpoint]).await.unwrap();

        assert_eq!(*events.redeeming.lock().unwrap(), vec![spender_txid]);
        assert_eq!(chain.rescan_requests(), vec![(from_block, vec![outpoint])]);
    }

    #[tokio::test]
    async fn notify_blocks_requires_connection() {
        let chain = MockChain::builder().build();
        assert!(matches!(
            chain.notify_blocks().await,
            Err(ChainError::NotConnected)
        ));
    }
}
