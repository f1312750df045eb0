use crate::error::{Result, SchedulerError};
use crate::pool::Recycle;

type Entry = Box<dyn FnOnce() -> Result<()>>;

/// Ordered (callback, receiver) pairs that run once a flush has committed.
#[derive(Default)]
pub struct CallbackQueue {
    entries: Vec<Entry>,
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn enqueue<R, F>(&mut self, callback: F, receiver: R)
    where
        R: 'static,
        F: FnOnce(R) -> Result<()> + 'static,
    {
        self.entries.push(Box::new(move || callback(receiver)));
    }

    /// Invokes every queued callback exactly once, in insertion order.
    ///
    /// Every callback runs even if an earlier one fails; the first failure is
    /// returned. The queue is empty afterwards.
    pub fn notify_all(&mut self) -> Result<usize> {
        let entries = std::mem::take(&mut self.entries);
        let count = entries.len();
        let mut first_error: Option<SchedulerError> = None;

        for entry in entries {
            if let Err(err) = entry() {
                match first_error {
                    None => first_error = Some(err),
                    Some(_) => tracing::error!("completion callback failed: {}", err),
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }

    /// Drops queued callbacks without running them.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Recycle for CallbackQueue {
    fn recycle(&mut self) {
        self.reset();
    }
}
