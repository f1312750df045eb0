use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::error::Result;

new_key_type! {
    pub struct NodeId;
}

/// Callback attached to an update request, invoked with the node's public
/// handle once the flush that reconciled the node has committed.
pub type PendingCallback<P> = Box<dyn FnOnce(P) -> Result<()>>;

pub(crate) type PendingCallbacks<P> = SmallVec<[PendingCallback<P>; 2]>;

/// Scheduling state of one stateful node.
pub struct NodeRecord<P> {
    /// Assigned once at mount; ancestors always rank below descendants.
    mount_order: u64,
    pending_callbacks: PendingCallbacks<P>,
    /// Flush cycle the node was most recently enqueued for.
    update_batch_number: Option<u64>,
}

impl<P> NodeRecord<P> {
    pub fn mount_order(&self) -> u64 {
        self.mount_order
    }

    pub fn update_batch_number(&self) -> Option<u64> {
        self.update_batch_number
    }

    pub fn pending_callback_count(&self) -> usize {
        self.pending_callbacks.len()
    }
}

pub struct NodeRegistry<P> {
    nodes: SlotMap<NodeId, NodeRecord<P>>,
    next_mount_order: u64,
}

impl<P> NodeRegistry<P> {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            next_mount_order: 0,
        }
    }

    pub fn mount(&mut self) -> NodeId {
        let mount_order = self.next_mount_order;
        self.next_mount_order += 1;
        self.nodes.insert(NodeRecord {
            mount_order,
            pending_callbacks: SmallVec::new(),
            update_batch_number: None,
        })
    }

    /// Removes the node. Queued requests for it stay queued; its pending
    /// callbacks are dropped unrun.
    pub fn unmount(&mut self, id: NodeId) -> bool {
        self.nodes.remove(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRecord<P>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sort key for flushing. Unmounted nodes rank first; the stable sort
    /// keeps them in request order.
    pub fn mount_order(&self, id: NodeId) -> u64 {
        self.nodes.get(id).map(|n| n.mount_order).unwrap_or(0)
    }

    pub fn push_callback(&mut self, id: NodeId, callback: PendingCallback<P>) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.pending_callbacks.push(callback);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_pending_callbacks(&mut self, id: NodeId) -> PendingCallbacks<P> {
        self.nodes
            .get_mut(id)
            .map(|n| std::mem::take(&mut n.pending_callbacks))
            .unwrap_or_default()
    }

    /// Tags the node for `batch_number` unless it already carries a tag.
    pub(crate) fn tag_for_batch(&mut self, id: NodeId, batch_number: u64) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.update_batch_number.get_or_insert(batch_number);
        }
    }

    pub fn update_batch_number(&self, id: NodeId) -> Option<u64> {
        self.nodes.get(id).and_then(|n| n.update_batch_number)
    }

    /// Clears the node's tag if it matches `batch_number`.
    pub fn claim(&mut self, id: NodeId, batch_number: u64) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.update_batch_number == Some(batch_number) => {
                node.update_batch_number = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear_batch_tag(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.update_batch_number = None;
        }
    }

    pub(crate) fn reset_scheduling_state(&mut self) {
        for node in self.nodes.values_mut() {
            node.update_batch_number = None;
            node.pending_callbacks.clear();
        }
    }
}

impl<P> Default for NodeRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
