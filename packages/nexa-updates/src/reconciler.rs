use crate::error::Result;
use crate::node::NodeId;
use crate::updates::UpdateScheduler;

/// Host-side environment wrapped around every flush pass (selection
/// restoration, event suppression, mount-ready queues and the like).
///
/// Instances are pooled by the scheduler and reused across flushes.
pub trait HostTransaction: Sized + 'static {
    fn perform<F>(&mut self, procedure: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        procedure(self)
    }

    /// Called when the instance goes back to the pool.
    fn reinitialize(&mut self) {}
}

impl HostTransaction for () {}

/// The collaborator that knows how to re-render a single node.
///
/// The scheduler decides *when* and *in which order* nodes are reconciled;
/// implementors decide whether a node actually needs work.
pub trait Reconciler: Sized + 'static {
    /// Receiver handed to a node's completion callbacks.
    type Public: Clone + 'static;
    type Host: HostTransaction;

    /// Reconciles `node` for flush cycle `batch_number`.
    ///
    /// Must be a no-op for nodes that are already current or unmounted.
    /// [`UpdateScheduler::claim_update`] is the usual way to check.
    fn perform_update_if_necessary(
        &self,
        updates: &UpdateScheduler<Self>,
        node: NodeId,
        host: &mut Self::Host,
        batch_number: u64,
    ) -> Result<()>;

    fn public_instance(&self, node: NodeId) -> Self::Public;

    /// Name used for render logging.
    fn label(&self, _node: NodeId) -> Option<String> {
        None
    }
}
