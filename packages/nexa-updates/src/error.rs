use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A collaborator was used before it was injected.
    #[error("update scheduler is not configured: missing {missing}")]
    NotConfigured { missing: &'static str },

    #[error("flush transaction expected {expected} dirty nodes but the queue holds {found}")]
    InconsistentQueueState { expected: usize, found: usize },

    #[error("asap callbacks can only be enqueued while updates are being batched")]
    NotBatching,

    #[error("batching strategy returned without running the batched procedure")]
    ProcedureSkipped,

    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] anyhow::Error),
}
