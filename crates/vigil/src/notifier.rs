//! The client-facing notifier interface and the notifier registry.
//!
//! [`ChainNotifier`] is the seam between subscription clients and a concrete
//! notifier backend; [`NotifierRegistry`] lets an application expose several
//! backends keyed by their type tag and pick one at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};

use crate::error::NotifierError;
use crate::types::{BlockEpochEvent, ConfirmationEvent, SpendEvent};

/// A long-running service delivering exactly-once, ordered chain event
/// notifications: block epochs, transaction confirmation depth, and outpoint
/// spends.
///
/// `start` and `stop` are idempotent. All registration operations are
/// thread-safe and fail with [`NotifierError::ShuttingDown`] once `stop` has
/// been initiated.
#[async_trait]
pub trait ChainNotifier: Send + Sync {
    /// A tag uniquely identifying the concrete backend, e.g. `"btcd"`.
    fn notifier_type(&self) -> &'static str;

    /// Connect to the chain source and launch notification dispatch.
    async fn start(&self) -> Result<(), NotifierError>;

    /// Tear down the service, closing every outstanding subscriber channel.
    async fn stop(&self) -> Result<(), NotifierError>;

    /// Subscribe to the spend of `outpoint`. If the output was already spent
    /// at registration time, the historical spend is replayed via rescan.
    async fn register_spend_ntfn(&self, outpoint: OutPoint)
        -> Result<SpendEvent, NotifierError>;

    /// Subscribe to `txid` reaching `num_confs` confirmations on the best
    /// chain. `num_confs` must be at least 1. Already-confirmed transactions
    /// are dispatched from historical chain data without waiting for a block.
    async fn register_confirmations_ntfn(
        &self,
        txid: Txid,
        num_confs: u32,
    ) -> Result<ConfirmationEvent, NotifierError>;

    /// Subscribe to every new block connected to the best chain.
    async fn register_block_epoch_ntfn(&self) -> Result<BlockEpochEvent, NotifierError>;
}

/// A registry of notifier backends keyed by their type tag.
///
/// Applications register each backend once; duplicate type tags are
/// rejected. The registry is an owned value, not process-global state.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<&'static str, Arc<dyn ChainNotifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend under its type tag.
    pub fn register(&mut self, notifier: Arc<dyn ChainNotifier>) -> Result<(), NotifierError> {
        let notifier_type = notifier.notifier_type();
        if self.notifiers.contains_key(notifier_type) {
            return Err(NotifierError::DuplicateNotifier(notifier_type.to_owned()));
        }
        self.notifiers.insert(notifier_type, notifier);
        Ok(())
    }

    /// Look up a backend by type tag.
    pub fn get(&self, notifier_type: &str) -> Option<Arc<dyn ChainNotifier>> {
        self.notifiers.get(notifier_type).map(Arc::clone)
    }

    /// Type tags of all registered backends, sorted.
    pub fn supported_notifiers(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.notifiers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubNotifier {
        tag: &'static str,
    }

    #[async_trait]
    impl ChainNotifier for StubNotifier {
        fn notifier_type(&self) -> &'static str {
            self.tag
        }

        async fn start(&self) -> Result<(), NotifierError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), NotifierError> {
            Ok(())
        }

        async fn register_spend_ntfn(
            &self,
            _outpoint: OutPoint,
        ) -> Result<SpendEvent, NotifierError> {
            Err(NotifierError::ShuttingDown)
        }

        async fn register_confirmations_ntfn(
            &self,
            _txid: Txid,
            _num_confs: u32,
        ) -> Result<ConfirmationEvent, NotifierError> {
            Err(NotifierError::ShuttingDown)
        }

        async fn register_block_epoch_ntfn(&self) -> Result<BlockEpochEvent, NotifierError> {
            Err(NotifierError::ShuttingDown)
        }
    }

    #[test]
    fn register_and_lookup_by_type_tag() {
        let mut registry = NotifierRegistry::new();
        registry
            .register(Arc::new(StubNotifier { tag: "btcd" }))
            .unwrap();

        assert!(registry.get("btcd").is_some());
        assert!(registry.get("electrum").is_none());
    }

    #[test]
    fn duplicate_type_tag_is_rejected() {
        let mut registry = NotifierRegistry::new();
        registry
            .register(Arc::new(StubNotifier { tag: "btcd" }))
            .unwrap();

        let err = registry
            .register(Arc::new(StubNotifier { tag: "btcd" }))
            .unwrap_err();
        assert!(matches!(err, NotifierError::DuplicateNotifier(tag) if tag == "btcd"));
    }

    #[test]
    fn supported_notifiers_lists_sorted_tags() {
        let mut registry = NotifierRegistry::new();
        registry
            .register(Arc::new(StubNotifier { tag: "electrum" }))
            .unwrap();
        registry
            .register(Arc::new(StubNotifier { tag: "btcd" }))
            .unwrap();

        assert_eq!(registry.supported_notifiers(), vec!["btcd", "electrum"]);
    }
}
