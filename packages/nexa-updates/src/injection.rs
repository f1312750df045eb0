//! One-shot injection of the scheduler's collaborators.

use crate::batching::{BatchingStrategy, DefaultBatchingStrategy};
use crate::callback_queue::CallbackQueue;
use crate::reconciler::Reconciler;
use crate::updates::UpdateScheduler;

impl<R: Reconciler> UpdateScheduler<R> {
    pub fn inject_batching_strategy<S>(&self, strategy: S) -> bool
    where
        S: BatchingStrategy<R> + 'static,
    {
        let injected = self.batching_strategy.set(Box::new(strategy)).is_ok();
        if injected {
            tracing::debug!("batching strategy injected");
        } else {
            tracing::debug!("batching strategy already injected, ignoring");
        }
        injected
    }

    /// Registers the factory for the host transaction wrapped around every
    /// flush pass.
    pub fn inject_reconcile_transaction<F>(&self, factory: F) -> bool
    where
        F: Fn() -> R::Host + 'static,
    {
        if self.host_factory.set(Box::new(factory)).is_err() {
            tracing::debug!("reconcile transaction already injected, ignoring");
            return false;
        }
        tracing::debug!("reconcile transaction injected");

        let prewarm = self.config().pool_prewarm;
        if prewarm > 0 {
            if let Some(factory) = self.host_factory.get() {
                self.flush_pool
                    .borrow_mut()
                    .prewarm(prewarm, || crate::updates::new_flush_resources(factory));
            }
            self.queue_pool
                .borrow_mut()
                .prewarm(prewarm, CallbackQueue::new);
            tracing::debug!("prewarmed {} flush transactions", prewarm);
        }
        true
    }

    /// Injects [`DefaultBatchingStrategy`] and a `Default` host transaction.
    pub fn inject_defaults(&self)
    where
        R::Host: Default,
    {
        self.inject_batching_strategy(DefaultBatchingStrategy::new());
        self.inject_reconcile_transaction(<R::Host as Default>::default);
    }

    /// A scheduler with the default collaborators already injected.
    pub fn with_defaults(reconciler: R) -> Self
    where
        R::Host: Default,
    {
        let updates = Self::new(reconciler);
        updates.inject_defaults();
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::error::{Result, SchedulerError};
    use crate::node::NodeId;

    struct Noop;

    impl Reconciler for Noop {
        type Public = ();
        type Host = ();

        fn perform_update_if_necessary(
            &self,
            _updates: &UpdateScheduler<Self>,
            _node: NodeId,
            _host: &mut (),
            _batch_number: u64,
        ) -> Result<()> {
            Ok(())
        }

        fn public_instance(&self, _node: NodeId) {}
    }

    #[test]
    fn test_requests_fail_until_both_collaborators_are_injected() {
        let updates = UpdateScheduler::new(Noop);
        let node = updates.mount_node();

        let err = updates.request_update(node).unwrap_err();
        assert!(matches!(err, SchedulerError::NotConfigured { .. }));

        assert!(updates.inject_batching_strategy(DefaultBatchingStrategy::new()));
        let err = updates.request_update(node).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::NotConfigured {
                missing: "reconcile transaction"
            }
        ));

        assert!(updates.inject_reconcile_transaction(|| ()));
        updates.request_update(node).unwrap();
        assert_eq!(updates.stats().flush_passes, 1);
    }

    #[test]
    fn test_reinjection_is_a_noop() {
        let updates = UpdateScheduler::with_defaults(Noop);

        assert!(!updates.inject_batching_strategy(DefaultBatchingStrategy::new()));
        assert!(!updates.inject_reconcile_transaction(|| ()));
    }

    #[test]
    fn test_prewarm_fills_pools() {
        let config = SchedulerConfig {
            pool_prewarm: 2,
            ..Default::default()
        };
        let updates = UpdateScheduler::with_config(Noop, config);
        updates.inject_defaults();

        assert_eq!(updates.flush_pool_stats().idle, 2);
        assert_eq!(updates.callback_queue_pool_stats().idle, 2);

        let node = updates.mount_node();
        updates.request_update(node).unwrap();
        assert_eq!(updates.flush_pool_stats().allocated, 2);
        assert_eq!(updates.flush_pool_stats().reused, 1);
    }
}
