//! Ordered open/close brackets around a procedure.

use std::panic::{self, AssertUnwindSafe};

use crate::error::{Result, SchedulerError};

pub type Hook<T> = fn(&mut T) -> Result<()>;

/// One open/close pair.
pub struct Wrapper<T: ?Sized> {
    pub name: &'static str,
    pub initialize: Hook<T>,
    pub close: Hook<T>,
}

impl<T: ?Sized> Wrapper<T> {
    pub fn new(name: &'static str, initialize: Hook<T>, close: Hook<T>) -> Self {
        Self {
            name,
            initialize,
            close,
        }
    }

    /// A wrapper with nothing to set up.
    pub fn on_close(name: &'static str, close: Hook<T>) -> Self {
        Self::new(name, noop, close)
    }
}

impl<T: ?Sized> Clone for Wrapper<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Wrapper<T> {}

impl<T: ?Sized> std::fmt::Debug for Wrapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper").field("name", &self.name).finish()
    }
}

fn noop<T: ?Sized>(_: &mut T) -> Result<()> {
    Ok(())
}

pub struct Transaction<'w, T: ?Sized> {
    wrappers: &'w [Wrapper<T>],
}

impl<'w, T: ?Sized> Transaction<'w, T> {
    pub fn new(wrappers: &'w [Wrapper<T>]) -> Self {
        Self { wrappers }
    }

    pub fn wrappers(&self) -> &'w [Wrapper<T>] {
        self.wrappers
    }

    /// Runs `method` between the wrappers' open and close hooks.
    ///
    /// If an `initialize` hook fails, the remaining hooks are not opened, the
    /// method is skipped, the hooks that did open are closed and the
    /// initialization error is returned. If the method fails, its error wins
    /// over any close error. Otherwise the first close error is returned after
    /// every close has run.
    pub fn perform<V, F>(&self, txn: &mut T, method: F) -> Result<V>
    where
        F: FnOnce(&mut T) -> Result<V>,
    {
        let opened = match self.initialize_all(txn) {
            Ok(()) => self.wrappers.len(),
            Err((opened, err)) => {
                if let Some(close_err) = self.close_opened(txn, opened) {
                    tracing::error!("close failed after an initialize error: {}", close_err);
                }
                return Err(err);
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| method(&mut *txn)));

        match outcome {
            Ok(Ok(value)) => match self.close_opened(txn, opened) {
                Some(err) => Err(err),
                None => Ok(value),
            },
            Ok(Err(err)) => {
                if let Some(close_err) = self.close_opened(txn, opened) {
                    tracing::error!("close failed after a procedure error: {}", close_err);
                }
                Err(err)
            }
            Err(payload) => {
                tracing::warn!("transaction procedure panicked, closing {} wrappers", opened);
                self.close_opened(txn, opened);
                panic::resume_unwind(payload)
            }
        }
    }

    fn initialize_all(&self, txn: &mut T) -> std::result::Result<(), (usize, SchedulerError)> {
        for (index, wrapper) in self.wrappers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| (wrapper.initialize)(&mut *txn))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::debug!("wrapper '{}' failed to initialize: {}", wrapper.name, err);
                    return Err((index, err));
                }
                Err(payload) => {
                    tracing::error!("wrapper '{}' panicked while initializing", wrapper.name);
                    self.close_opened(txn, index);
                    panic::resume_unwind(payload);
                }
            }
        }
        Ok(())
    }

    /// Closes the first `opened` wrappers and returns the first close error.
    /// A panicking close does not stop the others; the panic resumes once
    /// they have all run.
    fn close_opened(&self, txn: &mut T, opened: usize) -> Option<SchedulerError> {
        let mut first_error = None;
        let mut panicked = None;

        for wrapper in &self.wrappers[..opened] {
            match panic::catch_unwind(AssertUnwindSafe(|| (wrapper.close)(&mut *txn))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    } else {
                        tracing::error!("wrapper '{}' failed to close: {}", wrapper.name, err);
                    }
                }
                Err(payload) => {
                    tracing::error!("wrapper '{}' panicked while closing", wrapper.name);
                    if panicked.is_none() {
                        panicked = Some(payload);
                    }
                }
            }
        }

        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
        first_error
    }
}
