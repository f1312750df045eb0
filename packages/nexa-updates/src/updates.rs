//! The update scheduler: dirty queue, flush passes and asap callbacks.

use std::cell::{Cell, OnceCell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::batching::BatchingStrategy;
use crate::callback_queue::CallbackQueue;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::node::{NodeId, NodeRegistry, PendingCallback, PendingCallbacks};
use crate::pool::{Pool, PoolStats, Recycle};
use crate::reconciler::{HostTransaction, Reconciler};
use crate::transaction::{Transaction, Wrapper};

pub(crate) type HostFactory<H> = Box<dyn Fn() -> H>;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub flush_passes: u64,
    /// Calls into the reconciler, including ones it turned into no-ops.
    pub nodes_reconciled: u64,
    pub callbacks_invoked: u64,
    pub asap_drains: u64,
}

/// Nodes waiting for a flush pass.
///
/// `queued` only tracks the part of the queue no pass has picked up yet. Once
/// a pass starts, its nodes may be requested again and get a fresh slot.
#[derive(Default)]
struct DirtyQueue {
    nodes: Vec<NodeId>,
    queued: FxHashSet<NodeId>,
}

impl DirtyQueue {
    fn push(&mut self, node: NodeId) -> bool {
        if self.queued.insert(node) {
            self.nodes.push(node);
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn get(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).copied()
    }

    fn begin_pass(&mut self) {
        self.queued.clear();
    }

    fn drain_prefix(&mut self, len: usize) {
        let len = len.min(self.nodes.len());
        self.nodes.drain(..len);
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.queued.clear();
    }
}

pub(crate) struct FlushResources<H> {
    callbacks: CallbackQueue,
    host: H,
}

impl<H: HostTransaction> Recycle for FlushResources<H> {
    fn recycle(&mut self) {
        self.callbacks.reset();
        self.host.reinitialize();
    }
}

pub struct UpdateScheduler<R: Reconciler> {
    reconciler: R,
    config: SchedulerConfig,
    pub(crate) batching_strategy: OnceCell<Box<dyn BatchingStrategy<R>>>,
    pub(crate) host_factory: OnceCell<HostFactory<R::Host>>,
    nodes: RefCell<NodeRegistry<R::Public>>,
    dirty: RefCell<DirtyQueue>,
    batch_number: Cell<u64>,
    asap_queue: RefCell<CallbackQueue>,
    asap_pending: Cell<bool>,
    pub(crate) flush_pool: RefCell<Pool<FlushResources<R::Host>>>,
    pub(crate) queue_pool: RefCell<Pool<CallbackQueue>>,
    stats: Cell<FlushStats>,
}

impl<R: Reconciler> UpdateScheduler<R> {
    pub fn new(reconciler: R) -> Self {
        Self::with_config(reconciler, SchedulerConfig::default())
    }

    pub fn with_config(reconciler: R, config: SchedulerConfig) -> Self {
        Self {
            reconciler,
            config,
            batching_strategy: OnceCell::new(),
            host_factory: OnceCell::new(),
            nodes: RefCell::new(NodeRegistry::new()),
            dirty: RefCell::new(DirtyQueue::default()),
            batch_number: Cell::new(0),
            asap_queue: RefCell::new(CallbackQueue::new()),
            asap_pending: Cell::new(false),
            flush_pool: RefCell::new(Pool::new()),
            queue_pool: RefCell::new(Pool::new()),
            stats: Cell::new(FlushStats::default()),
        }
    }

    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // Nodes

    pub fn mount_node(&self) -> NodeId {
        self.nodes.borrow_mut().mount()
    }

    pub fn unmount_node(&self, node: NodeId) -> bool {
        self.nodes.borrow_mut().unmount(node)
    }

    pub fn is_mounted(&self, node: NodeId) -> bool {
        self.nodes.borrow().contains(node)
    }

    pub fn mount_order(&self, node: NodeId) -> Option<u64> {
        self.nodes.borrow().get(node).map(|n| n.mount_order())
    }

    pub fn pending_callback_count(&self, node: NodeId) -> usize {
        self.nodes
            .borrow()
            .get(node)
            .map(|n| n.pending_callback_count())
            .unwrap_or(0)
    }

    /// Attaches a callback to the node's next update. Returns false, dropping
    /// the callback, if the node is not mounted.
    pub fn enqueue_callback<F>(&self, node: NodeId, callback: F) -> bool
    where
        F: FnOnce(R::Public) -> Result<()> + 'static,
    {
        let callback: PendingCallback<R::Public> = Box::new(callback);
        let attached = self.nodes.borrow_mut().push_callback(node, callback);
        if !attached {
            tracing::warn!("dropping callback for unmounted node {:?}", node);
        }
        attached
    }

    pub fn update_batch_number(&self, node: NodeId) -> Option<u64> {
        self.nodes.borrow().update_batch_number(node)
    }

    /// Node-level "needs update" check: true, and the tag is cleared, only if
    /// the node was queued for `batch_number`.
    pub fn claim_update(&self, node: NodeId, batch_number: u64) -> bool {
        self.nodes.borrow_mut().claim(node, batch_number)
    }

    // Scheduling state

    pub fn is_batching_updates(&self) -> bool {
        self.batching_strategy
            .get()
            .is_some_and(|strategy| strategy.is_batching_updates())
    }

    pub fn batch_number(&self) -> u64 {
        self.batch_number.get()
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.borrow().len()
    }

    pub fn dirty_nodes(&self) -> Vec<NodeId> {
        self.dirty.borrow().nodes.clone()
    }

    pub fn stats(&self) -> FlushStats {
        self.stats.get()
    }

    pub fn flush_pool_stats(&self) -> PoolStats {
        self.flush_pool.borrow().stats()
    }

    pub fn callback_queue_pool_stats(&self) -> PoolStats {
        self.queue_pool.borrow().stats()
    }

    /// Returns the scheduling state to how it was at construction. Injected
    /// collaborators, mounted nodes and pools are kept. Must not be called
    /// while a flush is running.
    pub fn reset(&self) {
        self.dirty.borrow_mut().clear();
        self.batch_number.set(0);
        self.asap_queue.borrow_mut().reset();
        self.asap_pending.set(false);
        self.nodes.borrow_mut().reset_scheduling_state();
        self.stats.set(FlushStats::default());
    }

    fn record(&self, f: impl FnOnce(&mut FlushStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn ensure_injected(&self) -> Result<&dyn BatchingStrategy<R>> {
        if self.host_factory.get().is_none() {
            return Err(SchedulerError::NotConfigured {
                missing: "reconcile transaction",
            });
        }
        self.batching_strategy
            .get()
            .map(|strategy| &**strategy)
            .ok_or(SchedulerError::NotConfigured {
                missing: "batching strategy",
            })
    }

    // Requests

    /// Runs `procedure` inside a batching window and returns its result.
    pub fn batched_updates<V, F>(&self, procedure: F) -> Result<V>
    where
        F: FnOnce(&Self) -> Result<V>,
    {
        let strategy = self.ensure_injected()?;
        let mut procedure = Some(procedure);
        let mut output = None;

        strategy.batched_updates(self, &mut |updates: &Self| {
            if let Some(procedure) = procedure.take() {
                output = Some(procedure(updates)?);
            }
            Ok(())
        })?;

        output.ok_or(SchedulerError::ProcedureSkipped)
    }

    /// Marks `node` dirty. Outside a batching window this flushes before
    /// returning.
    pub fn request_update(&self, node: NodeId) -> Result<()> {
        let strategy = self.ensure_injected()?;

        if !strategy.is_batching_updates() {
            return strategy.batched_updates(self, &mut |updates: &Self| {
                updates.request_update(node)
            });
        }

        let added = self.dirty.borrow_mut().push(node);
        self.nodes
            .borrow_mut()
            .tag_for_batch(node, self.batch_number.get() + 1);

        if added {
            tracing::trace!("queued {:?} for batch {}", node, self.batch_number.get() + 1);
        }
        Ok(())
    }

    pub fn request_update_with_callback<F>(&self, node: NodeId, callback: F) -> Result<()>
    where
        F: FnOnce(R::Public) -> Result<()> + 'static,
    {
        self.enqueue_callback(node, callback);
        self.request_update(node)
    }

    /// Schedules `callback(receiver)` to run once the current window's dirty
    /// nodes have all been flushed.
    pub fn request_asap<V, F>(&self, callback: F, receiver: V) -> Result<()>
    where
        V: 'static,
        F: FnOnce(V) -> Result<()> + 'static,
    {
        let strategy = self.ensure_injected()?;
        if !strategy.is_batching_updates() {
            return Err(SchedulerError::NotBatching);
        }

        self.asap_queue.borrow_mut().enqueue(callback, receiver);
        self.asap_pending.set(true);
        Ok(())
    }

    // Flushing

    /// Flushes until no node is dirty and no asap callback is pending.
    /// A failing pass or drain does not stop the loop; the first error is
    /// returned once everything has been flushed.
    pub fn flush_dirty_nodes(&self) -> Result<()> {
        let mut first_error = None;
        loop {
            let step = if !self.dirty.borrow().is_empty() {
                self.run_flush_transaction()
            } else if self.asap_pending.get() {
                self.drain_asap_queue()
            } else {
                break;
            };

            match step {
                Ok(()) => {}
                Err(err @ SchedulerError::NotConfigured { .. }) => return Err(err),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(err) => tracing::error!("flush step failed: {}", err),
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn run_flush_transaction(&self) -> Result<()> {
        let factory = self
            .host_factory
            .get()
            .ok_or(SchedulerError::NotConfigured {
                missing: "reconcile transaction",
            })?;

        let resources = self
            .flush_pool
            .borrow_mut()
            .acquire_or_else(|| new_flush_resources(factory));

        let mut transaction = FlushTransaction::new(self, resources);
        let result = transaction.perform();
        self.flush_pool
            .borrow_mut()
            .release(transaction.into_resources());
        result
    }

    fn drain_asap_queue(&self) -> Result<()> {
        let fresh = self
            .queue_pool
            .borrow_mut()
            .acquire_or_else(CallbackQueue::new);
        let mut queue = self.asap_queue.replace(fresh);
        self.asap_pending.set(false);

        tracing::debug!("running {} asap callbacks", queue.len());
        let result = queue.notify_all();
        self.queue_pool.borrow_mut().release(queue);

        let invoked = result.as_ref().map_or(0, |n| *n as u64);
        self.record(|s| {
            s.asap_drains += 1;
            s.callbacks_invoked += invoked;
        });
        result.map(|_| ())
    }

    fn run_batched_flush(
        &self,
        pass: &mut PassState,
        host: &mut R::Host,
        callbacks: &mut CallbackQueue,
    ) -> Result<()> {
        let len = {
            let mut dirty = self.dirty.borrow_mut();
            let found = dirty.len();
            if pass.dirty_len != Some(found) {
                return Err(SchedulerError::InconsistentQueueState {
                    expected: pass.dirty_len.unwrap_or(0),
                    found,
                });
            }

            // Ancestors first; a parent's render usually covers its children.
            let nodes = self.nodes.borrow();
            dirty.nodes.sort_by_key(|&id| nodes.mount_order(id));
            dirty.begin_pass();
            found
        };

        // Anything queued from here on belongs to a later pass.
        let batch_number = self.batch_number.get() + 1;
        self.batch_number.set(batch_number);
        self.record(|s| s.flush_passes += 1);
        tracing::debug!("flush pass {} over {} nodes", batch_number, len);

        for index in 0..len {
            let Some(node) = self.dirty.borrow().get(index) else {
                break;
            };

            // Callbacks added while this node renders wait for its next update.
            let pending = self.nodes.borrow_mut().take_pending_callbacks(node);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.reconcile(node, &mut *host, batch_number)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.restore_callbacks(node, pending);
                    return Err(err);
                }
                Err(payload) => {
                    self.restore_callbacks(node, pending);
                    panic::resume_unwind(payload);
                }
            }
            pass.processed = index + 1;

            if !pending.is_empty() {
                let public = self.reconciler.public_instance(node);
                for callback in pending {
                    callbacks.enqueue(callback, public.clone());
                }
            }
        }
        Ok(())
    }

    fn reconcile(&self, node: NodeId, host: &mut R::Host, batch_number: u64) -> Result<()> {
        self.record(|s| s.nodes_reconciled += 1);

        if !self.config.log_top_level_renders {
            return self
                .reconciler
                .perform_update_if_necessary(self, node, host, batch_number);
        }

        let label = self
            .reconciler
            .label(node)
            .unwrap_or_else(|| format!("{node:?}"));
        let span = tracing::info_span!("update", node = %label, batch_number);
        let _entered = span.enter();
        let started = Instant::now();

        let result = self
            .reconciler
            .perform_update_if_necessary(self, node, host, batch_number);

        tracing::debug!("update {} took {:?}", label, started.elapsed());
        result
    }

    fn restore_callbacks(&self, node: NodeId, pending: PendingCallbacks<R::Public>) {
        let mut nodes = self.nodes.borrow_mut();
        let later = nodes.take_pending_callbacks(node);
        for callback in pending.into_iter().chain(later) {
            nodes.push_callback(node, callback);
        }
    }

    /// Nodes a failed pass never reached keep their callbacks but lose their
    /// batch tag, so the next request tags them for a pass that will run.
    fn forget_unflushed(&self, range: std::ops::Range<usize>) {
        let dirty = self.dirty.borrow();
        let mut nodes = self.nodes.borrow_mut();
        for &node in dirty.nodes.get(range).unwrap_or_default() {
            nodes.clear_batch_tag(node);
        }
    }
}

pub(crate) fn new_flush_resources<H: HostTransaction>(
    factory: &HostFactory<H>,
) -> FlushResources<H> {
    FlushResources {
        callbacks: CallbackQueue::new(),
        host: factory(),
    }
}

#[derive(Default)]
struct PassState {
    /// Queue length when the pass opened.
    dirty_len: Option<usize>,
    processed: usize,
}

/// One flush pass over the dirty queue.
struct FlushTransaction<'a, R: Reconciler> {
    updates: &'a UpdateScheduler<R>,
    pass: PassState,
    callbacks: CallbackQueue,
    host: R::Host,
}

impl<'a, R: Reconciler> FlushTransaction<'a, R> {
    fn new(updates: &'a UpdateScheduler<R>, resources: FlushResources<R::Host>) -> Self {
        Self {
            updates,
            pass: PassState::default(),
            callbacks: resources.callbacks,
            host: resources.host,
        }
    }

    fn into_resources(self) -> FlushResources<R::Host> {
        FlushResources {
            callbacks: self.callbacks,
            host: self.host,
        }
    }

    fn wrappers() -> [Wrapper<Self>; 2] {
        [
            Wrapper::new(
                "nested_updates",
                Self::snapshot_dirty_len,
                Self::flush_nested_updates,
            ),
            Wrapper::new(
                "update_queueing",
                Self::reset_callbacks,
                Self::notify_callbacks,
            ),
        ]
    }

    fn perform(&mut self) -> Result<()> {
        let wrappers = Self::wrappers();
        Transaction::new(&wrappers).perform(self, |txn| {
            let FlushTransaction {
                updates,
                pass,
                callbacks,
                host,
            } = txn;
            let updates = *updates;
            host.perform(|host| updates.run_batched_flush(pass, host, callbacks))
        })
    }

    fn snapshot_dirty_len(&mut self) -> Result<()> {
        self.pass = PassState {
            dirty_len: Some(self.updates.dirty_len()),
            processed: 0,
        };
        Ok(())
    }

    fn flush_nested_updates(&mut self) -> Result<()> {
        let PassState {
            dirty_len,
            processed,
        } = std::mem::take(&mut self.pass);
        let snapshot = dirty_len.unwrap_or(0);

        if processed < snapshot {
            self.updates.forget_unflushed(processed..snapshot);
        }

        let grew = {
            let mut dirty = self.updates.dirty.borrow_mut();
            if dirty.len() != snapshot {
                dirty.drain_prefix(snapshot);
                true
            } else {
                dirty.clear();
                false
            }
        };

        // Requests made while this pass rendered run before its callbacks.
        if grew {
            tracing::trace!("pass queued more updates, flushing them first");
            self.updates.flush_dirty_nodes()?;
        }
        Ok(())
    }

    fn reset_callbacks(&mut self) -> Result<()> {
        self.callbacks.reset();
        Ok(())
    }

    fn notify_callbacks(&mut self) -> Result<()> {
        let invoked = self.callbacks.notify_all()?;
        self.updates
            .record(|s| s.callbacks_invoked += invoked as u64);
        Ok(())
    }
}
