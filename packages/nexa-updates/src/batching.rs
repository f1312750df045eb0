use std::cell::Cell;

use crate::error::Result;
use crate::reconciler::Reconciler;
use crate::transaction::{Transaction, Wrapper};
use crate::updates::UpdateScheduler;

/// Decides whether update requests are buffered or flushed right away.
pub trait BatchingStrategy<R: Reconciler> {
    /// True while a batching window is open.
    fn is_batching_updates(&self) -> bool;

    /// Runs `procedure` inside a batching window, opening one if needed.
    fn batched_updates(
        &self,
        updates: &UpdateScheduler<R>,
        procedure: &mut dyn FnMut(&UpdateScheduler<R>) -> Result<()>,
    ) -> Result<()>;
}

/// Opens a window on the outermost call and flushes every dirty node when it
/// closes. Nested calls ride the enclosing window.
#[derive(Debug, Default)]
pub struct DefaultBatchingStrategy {
    is_batching_updates: Cell<bool>,
}

impl DefaultBatchingStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Reconciler> BatchingStrategy<R> for DefaultBatchingStrategy {
    fn is_batching_updates(&self) -> bool {
        self.is_batching_updates.get()
    }

    fn batched_updates(
        &self,
        updates: &UpdateScheduler<R>,
        procedure: &mut dyn FnMut(&UpdateScheduler<R>) -> Result<()>,
    ) -> Result<()> {
        let already_batching = self.is_batching_updates.replace(true);
        if already_batching {
            return procedure(updates);
        }

        tracing::trace!("opening batching window");
        let mut window = BatchingWindow {
            updates,
            is_batching_updates: &self.is_batching_updates,
        };
        let wrappers = BatchingWindow::<R>::wrappers();
        Transaction::new(&wrappers).perform(&mut window, |window| procedure(window.updates))
    }
}

struct BatchingWindow<'a, R: Reconciler> {
    updates: &'a UpdateScheduler<R>,
    is_batching_updates: &'a Cell<bool>,
}

impl<'a, R: Reconciler> BatchingWindow<'a, R> {
    // Flush before reset: requests made while flushing must still see an
    // open window and get queued.
    fn wrappers() -> [Wrapper<Self>; 2] {
        [
            Wrapper::on_close("flush_batched_updates", Self::flush_batched_updates),
            Wrapper::on_close("reset_batched_updates", Self::reset_batched_updates),
        ]
    }

    fn flush_batched_updates(&mut self) -> Result<()> {
        self.updates.flush_dirty_nodes()
    }

    fn reset_batched_updates(&mut self) -> Result<()> {
        self.is_batching_updates.set(false);
        tracing::trace!("batching window closed");
        Ok(())
    }
}
