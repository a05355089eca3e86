//! The notification dispatcher.
//!
//! A single-consumer event loop owning every piece of mutable notifier
//! state: the spend and confirmation registries, the confirmation heap, the
//! epoch subscriber list, and the current best height. All other actors
//! (upstream callbacks, client registrations, teardown) communicate with it
//! through channels and wakeups; nothing else reads or writes the
//! registries.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::types::{BlockEpoch, SpendDetail, TxConfirmation};

use super::heap::{ConfEntry, ConfirmationHeap};
use super::queue::EventQueue;

/// A client subscription submitted through the registration channel.
#[derive(Debug)]
pub(crate) enum Registration {
    /// `registered` is acknowledged once the subscription is in the
    /// registry, so the caller can trigger a rescan replay knowing the
    /// replayed spend will find its subscription.
    Spend {
        sub: SpendSubscription,
        registered: oneshot::Sender<()>,
    },
    Conf(ConfSubscription),
    Epoch(EpochSubscription),
}

#[derive(Debug)]
pub(crate) struct SpendSubscription {
    pub outpoint: OutPoint,
    pub spend_tx: mpsc::Sender<SpendDetail>,
}

#[derive(Debug)]
pub(crate) struct ConfSubscription {
    pub txid: Txid,
    pub num_confirmations: u32,
    /// Height of the block that first contained the transaction. Zero until
    /// the transaction is seen; never reassigned afterwards.
    pub initial_confirm_height: u32,
    pub conf_tx: mpsc::Sender<TxConfirmation>,
    pub negative_conf_tx: mpsc::Sender<i32>,
}

#[derive(Debug)]
pub(crate) struct EpochSubscription {
    pub epoch_tx: mpsc::Sender<BlockEpoch>,
}

/// An update to the best chain, queued by the block-connected callback.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChainUpdate {
    pub block_hash: BlockHash,
    pub block_height: i32,
}

/// A transaction redeeming a watched outpoint, queued by the
/// redeeming-transaction callback.
#[derive(Debug)]
pub(crate) struct TxUpdate {
    pub tx: Transaction,
}

/// A block disconnected from the best chain.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StaleBlock {
    pub hash: BlockHash,
    pub height: i32,
}

pub(crate) struct Dispatcher {
    chain: Arc<dyn ChainClient>,
    registrations: mpsc::Receiver<Registration>,
    stale_blocks: mpsc::Receiver<StaleBlock>,
    chain_updates: Arc<EventQueue<ChainUpdate>>,
    tx_updates: Arc<EventQueue<TxUpdate>>,
    quit: CancellationToken,

    current_height: i32,
    spend_subs: HashMap<OutPoint, Vec<SpendSubscription>>,
    conf_subs: HashMap<Txid, Vec<ConfSubscription>>,
    conf_heap: ConfirmationHeap,
    epoch_subs: Vec<mpsc::Sender<BlockEpoch>>,
    fanout_tasks: JoinSet<()>,
}

impl Dispatcher {
    pub(crate) fn new(
        chain: Arc<dyn ChainClient>,
        registrations: mpsc::Receiver<Registration>,
        stale_blocks: mpsc::Receiver<StaleBlock>,
        chain_updates: Arc<EventQueue<ChainUpdate>>,
        tx_updates: Arc<EventQueue<TxUpdate>>,
        quit: CancellationToken,
        best_height: i32,
    ) -> Self {
        Self {
            chain,
            registrations,
            stale_blocks,
            chain_updates,
            tx_updates,
            quit,
            current_height: best_height,
            spend_subs: HashMap::new(),
            conf_subs: HashMap::new(),
            conf_heap: ConfirmationHeap::new(),
            epoch_subs: Vec::new(),
            fanout_tasks: JoinSet::new(),
        }
    }

    /// Run until the quit signal fires, then close every outstanding
    /// subscriber channel.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => break,

                registration = self.registrations.recv() => match registration {
                    Some(registration) => self.handle_registration(registration).await,
                    None => break,
                },

                stale = self.stale_blocks.recv() => {
                    if let Some(stale) = stale {
                        warn!(
                            hash = %stale.hash,
                            height = stale.height,
                            "block disconnected from best chain",
                        );
                    }
                }

                _ = self.chain_updates.notified() => {
                    while let Some(update) = self.chain_updates.try_pop() {
                        self.handle_chain_update(update).await;
                    }
                }

                _ = self.tx_updates.notified() => {
                    while let Some(update) = self.tx_updates.try_pop() {
                        self.handle_tx_update(update).await;
                    }
                }
            }
        }

        self.teardown().await;
    }

    async fn handle_registration(&mut self, registration: Registration) {
        match registration {
            Registration::Spend { sub, registered } => {
                info!(outpoint = %sub.outpoint, "new spend subscription");
                self.spend_subs.entry(sub.outpoint).or_default().push(sub);
                let _ = registered.send(());
            }
            Registration::Conf(sub) => {
                info!(
                    txid = %sub.txid,
                    num_confs = sub.num_confirmations,
                    "new confirmation subscription",
                );
                // A subscription satisfied (even partially) from historical
                // chain data never enters the registry: once its transaction
                // has been seen, progress happens purely per block height.
                if let Some(sub) = self.attempt_historical_dispatch(sub).await {
                    self.conf_subs.entry(sub.txid).or_default().push(sub);
                }
            }
            Registration::Epoch(sub) => {
                info!("new block epoch subscription");
                self.epoch_subs.push(sub.epoch_tx);
            }
        }
    }

    /// Process one connected block: advance the height, fan out the epoch,
    /// check confirmation triggers for every transaction in the block, and
    /// drain the heap entries whose trigger height is now reached.
    async fn handle_chain_update(&mut self, update: ChainUpdate) {
        self.current_height = update.block_height;

        let block = match self.chain.get_block(&update.block_hash).await {
            Ok(block) => block,
            Err(err) => {
                error!(hash = %update.block_hash, %err, "unable to fetch connected block");
                return;
            }
        };

        info!(
            height = update.block_height,
            hash = %update.block_hash,
            "new block",
        );

        let epoch = BlockEpoch {
            height: update.block_height,
            hash: update.block_hash,
        };
        let subscribers = self.epoch_subs.clone();
        let quit = self.quit.clone();
        self.fanout_tasks
            .spawn(notify_block_epochs(subscribers, epoch, quit));

        for (index, tx) in block.txdata.iter().enumerate() {
            let txid = tx.compute_txid();
            self.check_confirmation_trigger(txid, &update, index as u32)
                .await;
        }

        self.notify_confs(update.block_height).await;
    }

    /// Dispatch spend notifications for any input of the redeeming
    /// transaction that consumes a watched outpoint, in input-index order.
    /// Each outpoint notifies at most once; its registry entry is removed
    /// when dispatched.
    async fn handle_tx_update(&mut self, update: TxUpdate) {
        let spender_txid = update.tx.compute_txid();

        for (index, input) in update.tx.input.iter().enumerate() {
            let outpoint = input.previous_output;
            let Some(subscribers) = self.spend_subs.remove(&outpoint) else {
                continue;
            };

            for sub in subscribers {
                let details = SpendDetail {
                    spent_outpoint: outpoint,
                    spender_tx_hash: spender_txid,
                    spending_tx: update.tx.clone(),
                    spender_input_index: index as u32,
                };
                info!(
                    outpoint = %outpoint,
                    spender = %spender_txid,
                    "dispatching spend notification",
                );
                self.deliver_spend(&sub.spend_tx, details).await;
            }
        }
    }

    /// If confirmation subscriptions exist for `txid`, either dispatch them
    /// (single-confirmation requests) or move them onto the heap with the
    /// height at which their requested depth is reached. The registry entry
    /// is removed either way.
    async fn check_confirmation_trigger(&mut self, txid: Txid, update: &ChainUpdate, tx_index: u32) {
        let Some(subscribers) = self.conf_subs.remove(&txid) else {
            return;
        };

        for mut sub in subscribers {
            let details = TxConfirmation {
                block_hash: update.block_hash,
                block_height: update.block_height as u32,
                tx_index,
            };

            if sub.num_confirmations == 1 {
                info!(
                    %txid,
                    height = update.block_height,
                    "dispatching single-confirmation notification",
                );
                self.deliver_conf(&sub.conf_tx, details).await;
                continue;
            }

            sub.initial_confirm_height = update.block_height as u32;
            let trigger_height = sub.initial_confirm_height + sub.num_confirmations - 1;
            self.conf_heap.push(ConfEntry {
                trigger_height,
                details,
                sub,
            });
        }
    }

    /// Send off every heap entry whose trigger height has been reached by
    /// the newly connected block.
    async fn notify_confs(&mut self, new_height: i32) {
        if self.conf_heap.is_empty() {
            return;
        }

        while let Some(trigger_height) = self.conf_heap.peek_trigger_height() {
            if i64::from(trigger_height) > i64::from(new_height) {
                break;
            }
            let entry = self.conf_heap.pop().expect("peeked entry is present");
            info!(
                txid = %entry.sub.txid,
                trigger_height = entry.trigger_height,
                "dispatching confirmation notification",
            );
            self.deliver_conf(&entry.sub.conf_tx, entry.details).await;
        }
    }

    /// Try to satisfy a new confirmation subscription from historical chain
    /// data. Returns the subscription back to the caller when nothing could
    /// be dispatched; otherwise the subscription was either completed or
    /// placed on the heap with its remaining depth.
    async fn attempt_historical_dispatch(
        &mut self,
        mut sub: ConfSubscription,
    ) -> Option<ConfSubscription> {
        debug!(txid = %sub.txid, "attempting historical confirmation dispatch");

        let tx = match self.chain.get_raw_transaction_verbose(&sub.txid).await {
            Ok(tx) => tx,
            Err(_) => return Some(sub),
        };
        let Some(block_hash) = tx.block_hash else {
            return Some(sub);
        };
        if tx.confirmations == 0 {
            return Some(sub);
        }

        let block = match self.chain.get_block(&block_hash).await {
            Ok(block) => block,
            Err(err) => {
                error!(hash = %block_hash, %err, "unable to fetch confirming block");
                return Some(sub);
            }
        };

        let tx_index = block
            .txdata
            .iter()
            .position(|tx| tx.compute_txid() == sub.txid)
            .map(|index| index as u32)
            .unwrap_or(0);

        let first_seen_height =
            (i64::from(self.current_height) - i64::from(tx.confirmations) + 1).max(0) as u32;
        let details = TxConfirmation {
            block_hash,
            block_height: first_seen_height,
            tx_index,
        };

        if tx.confirmations >= sub.num_confirmations {
            info!(
                txid = %sub.txid,
                height = first_seen_height,
                "dispatching confirmation notification from historical data",
            );
            self.deliver_conf(&sub.conf_tx, details).await;
            return None;
        }

        sub.initial_confirm_height = first_seen_height;
        let confs_left = sub.num_confirmations - tx.confirmations;
        let trigger_height = (i64::from(self.current_height) + i64::from(confs_left)).max(0) as u32;
        self.conf_heap.push(ConfEntry {
            trigger_height,
            details,
            sub,
        });
        None
    }

    async fn deliver_conf(&self, conf_tx: &mpsc::Sender<TxConfirmation>, details: TxConfirmation) {
        tokio::select! {
            _ = self.quit.cancelled() => {}
            result = conf_tx.send(details) => {
                if result.is_err() {
                    debug!("confirmation subscriber dropped before delivery");
                }
            }
        }
    }

    async fn deliver_spend(&self, spend_tx: &mpsc::Sender<SpendDetail>, details: SpendDetail) {
        tokio::select! {
            _ = self.quit.cancelled() => {}
            result = spend_tx.send(details) => {
                if result.is_err() {
                    debug!("spend subscriber dropped before delivery");
                }
            }
        }
    }

    /// Wait for in-flight epoch fan-out tasks, then close every subscriber
    /// channel still held in a registry or on the heap by dropping its send
    /// half.
    async fn teardown(mut self) {
        while self.fanout_tasks.join_next().await.is_some() {}

        let mut spend_count = 0usize;
        for (_, subscribers) in self.spend_subs.drain() {
            for sub in subscribers {
                drop(sub.spend_tx);
                spend_count += 1;
            }
        }

        let mut conf_count = self.conf_heap.len();
        for (_, subscribers) in self.conf_subs.drain() {
            for sub in subscribers {
                drop(sub.conf_tx);
                drop(sub.negative_conf_tx);
                conf_count += 1;
            }
        }
        while let Some(entry) = self.conf_heap.pop() {
            drop(entry.sub.conf_tx);
            drop(entry.sub.negative_conf_tx);
        }

        let epoch_count = self.epoch_subs.len();
        self.epoch_subs.clear();

        debug!(
            spend = spend_count,
            conf = conf_count,
            epoch = epoch_count,
            "closed outstanding subscriber channels",
        );
    }
}

/// Fan a block epoch out to every subscriber with a non-blocking send,
/// dropping the epoch for subscribers whose buffer is full. Aborts promptly
/// once the quit signal fires.
async fn notify_block_epochs(
    subscribers: Vec<mpsc::Sender<BlockEpoch>>,
    epoch: BlockEpoch,
    quit: CancellationToken,
) {
    for (index, subscriber) in subscribers.iter().enumerate() {
        if quit.is_cancelled() {
            return;
        }
        match subscriber.try_send(epoch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(
                    subscriber = index,
                    height = epoch.height,
                    "epoch subscriber fell behind, dropping epoch",
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
