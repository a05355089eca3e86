//! The btcd-backed chain notifier.
//!
//! [`BtcdNotifier`] fuses the chain node's push callbacks with its pull
//! query API behind the [`ChainNotifier`](crate::notifier::ChainNotifier)
//! surface. Push callbacks append to unbounded ingress queues and return
//! immediately; a single dispatcher task owns all subscription state and
//! drives every notification. See the submodules for the moving parts.

mod dispatcher;
mod heap;
mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::{BlockDetails, ChainClient, ChainEvents};
use crate::error::{ChainError, NotifierError};
use crate::notifier::ChainNotifier;
use crate::types::{
    BlockEpochEvent, ConfirmationEvent, SpendEvent, CONF_CHANNEL_CAPACITY,
    EPOCH_CHANNEL_CAPACITY, SPEND_CHANNEL_CAPACITY,
};

use dispatcher::{
    ChainUpdate, ConfSubscription, Dispatcher, EpochSubscription, Registration,
    SpendSubscription, StaleBlock, TxUpdate,
};
use queue::EventQueue;

/// Type tag identifying this notifier backend.
pub const NOTIFIER_TYPE: &str = "btcd";

/// Connection attempts handed to the chain client on start.
const CONNECT_RETRY_ATTEMPTS: u32 = 20;

/// Registrations in flight towards the dispatcher. Senders suspend briefly
/// when the dispatcher lags; the quit race bounds the wait.
const REGISTRATION_QUEUE_CAPACITY: usize = 16;

/// Disconnected-block reports buffered towards the dispatcher; excess
/// reports are dropped (reorg handling is out of scope).
const STALE_BLOCK_QUEUE_CAPACITY: usize = 20;

/// A chain notifier backed by a btcd-style chain node.
///
/// Multiple concurrent clients are supported. `start` and `stop` are
/// idempotent; after `stop`, every subscriber channel handed out by a
/// registration operation is closed.
pub struct BtcdNotifier {
    chain: Arc<dyn ChainClient>,

    registration_tx: mpsc::Sender<Registration>,
    registration_rx: Mutex<Option<mpsc::Receiver<Registration>>>,

    stale_tx: mpsc::Sender<StaleBlock>,
    stale_rx: Mutex<Option<mpsc::Receiver<StaleBlock>>>,

    chain_updates: Arc<EventQueue<ChainUpdate>>,
    tx_updates: Arc<EventQueue<TxUpdate>>,

    quit: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BtcdNotifier {
    /// Build a notifier over the given chain client. The client is expected
    /// to be configured but not yet connected; the connection is established
    /// by [`ChainNotifier::start`].
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        let (registration_tx, registration_rx) = mpsc::channel(REGISTRATION_QUEUE_CAPACITY);
        let (stale_tx, stale_rx) = mpsc::channel(STALE_BLOCK_QUEUE_CAPACITY);

        Self {
            chain,
            registration_tx,
            registration_rx: Mutex::new(Some(registration_rx)),
            stale_tx,
            stale_rx: Mutex::new(Some(stale_rx)),
            chain_updates: Arc::new(EventQueue::new()),
            tx_updates: Arc::new(EventQueue::new()),
            quit: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        }
    }

    /// Hand a registration to the dispatcher, racing the quit signal.
    async fn submit(&self, registration: Registration) -> Result<(), NotifierError> {
        tokio::select! {
            biased;
            _ = self.quit.cancelled() => Err(NotifierError::ShuttingDown),
            result = self.registration_tx.send(registration) => {
                result.map_err(|_| NotifierError::ShuttingDown)
            }
        }
    }
}

#[async_trait]
impl ChainNotifier for BtcdNotifier {
    fn notifier_type(&self) -> &'static str {
        NOTIFIER_TYPE
    }

    async fn start(&self) -> Result<(), NotifierError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let events: Arc<dyn ChainEvents> = Arc::new(IngressHandler {
            chain_updates: Arc::clone(&self.chain_updates),
            tx_updates: Arc::clone(&self.tx_updates),
            stale_blocks: self.stale_tx.clone(),
        });
        self.chain.connect(CONNECT_RETRY_ATTEMPTS, events).await?;
        self.chain.notify_blocks().await?;

        let best = self.chain.get_best_block().await?;

        let registrations = self
            .registration_rx
            .lock()
            .expect("registration receiver lock")
            .take()
            .expect("start consumes the registration receiver exactly once");
        let stale_blocks = self
            .stale_rx
            .lock()
            .expect("stale-block receiver lock")
            .take()
            .expect("start consumes the stale-block receiver exactly once");

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.chain),
            registrations,
            stale_blocks,
            Arc::clone(&self.chain_updates),
            Arc::clone(&self.tx_updates),
            self.quit.clone(),
            best.height,
        );
        let handle = tokio::spawn(dispatcher.run());
        *self.dispatcher.lock().expect("dispatcher handle lock") = Some(handle);

        info!(height = best.height, hash = %best.hash, "chain notifier started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), NotifierError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Disconnect upstream first so no further callbacks arrive, then
        // signal quit and wait for the dispatcher to close all subscriber
        // channels.
        self.chain.shutdown().await;
        self.quit.cancel();

        let handle = self.dispatcher.lock().expect("dispatcher handle lock").take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                error!("dispatcher task failed during shutdown");
            }
        }

        info!("chain notifier stopped");
        Ok(())
    }

    async fn register_spend_ntfn(
        &self,
        outpoint: OutPoint,
    ) -> Result<SpendEvent, NotifierError> {
        self.chain.notify_spent(&[outpoint]).await?;

        let (spend_tx, spend_rx) = mpsc::channel(SPEND_CHANNEL_CAPACITY);
        let (registered_tx, registered_rx) = oneshot::channel();
        self.submit(Registration::Spend {
            sub: SpendSubscription { outpoint, spend_tx },
            registered: registered_tx,
        })
        .await?;

        // Wait for the dispatcher to admit the subscription before probing:
        // a rescan replay must not be able to outrun the registration.
        tokio::select! {
            biased;
            _ = self.quit.cancelled() => return Err(NotifierError::ShuttingDown),
            ack = registered_rx => {
                ack.map_err(|_| NotifierError::ShuttingDown)?;
            }
        }

        // If the output has already left the UTXO set, the spend happened
        // before this registration; replay it from the funding block so the
        // subscription still fires through the normal redeeming-tx path.
        let utxo = self.chain.get_tx_out(&outpoint, true).await?;
        if utxo.is_none() {
            let funding_tx = self.chain.get_raw_transaction_verbose(&outpoint.txid).await?;
            let from_block = funding_tx
                .block_hash
                .ok_or(ChainError::TxNotConfirmed(outpoint.txid))?;
            if let Err(err) = self.chain.rescan(from_block, &[], &[outpoint]).await {
                error!(%outpoint, %err, "rescan for spent outpoint failed");
                return Err(err.into());
            }
        }

        Ok(SpendEvent { spend: spend_rx })
    }

    async fn register_confirmations_ntfn(
        &self,
        txid: Txid,
        num_confs: u32,
    ) -> Result<ConfirmationEvent, NotifierError> {
        if num_confs == 0 {
            return Err(NotifierError::ZeroConfTarget);
        }

        let (conf_tx, conf_rx) = mpsc::channel(CONF_CHANNEL_CAPACITY);
        let (negative_conf_tx, negative_conf_rx) = mpsc::channel(CONF_CHANNEL_CAPACITY);
        self.submit(Registration::Conf(ConfSubscription {
            txid,
            num_confirmations: num_confs,
            initial_confirm_height: 0,
            conf_tx,
            negative_conf_tx,
        }))
        .await?;

        Ok(ConfirmationEvent {
            confirmed: conf_rx,
            negative_conf: negative_conf_rx,
        })
    }

    async fn register_block_epoch_ntfn(&self) -> Result<BlockEpochEvent, NotifierError> {
        let (epoch_tx, epoch_rx) = mpsc::channel(EPOCH_CHANNEL_CAPACITY);
        self.submit(Registration::Epoch(EpochSubscription { epoch_tx }))
            .await?;

        Ok(BlockEpochEvent { epochs: epoch_rx })
    }
}

/// Push-callback handler installed on the chain client. Each callback is a
/// lock-guarded append plus a non-blocking wakeup; none of them ever block
/// on dispatcher or subscriber progress.
struct IngressHandler {
    chain_updates: Arc<EventQueue<ChainUpdate>>,
    tx_updates: Arc<EventQueue<TxUpdate>>,
    stale_blocks: mpsc::Sender<StaleBlock>,
}

impl ChainEvents for IngressHandler {
    fn on_block_connected(&self, hash: BlockHash, height: i32, _time: SystemTime) {
        self.chain_updates.push(ChainUpdate {
            block_hash: hash,
            block_height: height,
        });
    }

    fn on_block_disconnected(&self, hash: BlockHash, height: i32, _time: SystemTime) {
        if self.stale_blocks.try_send(StaleBlock { hash, height }).is_err() {
            warn!(%hash, height, "dropping disconnected-block report");
        }
    }

    fn on_redeeming_tx(&self, tx: Transaction, _block: Option<BlockDetails>) {
        self.tx_updates.push(TxUpdate { tx });
    }
}
