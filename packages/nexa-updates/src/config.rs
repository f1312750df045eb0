use serde::{Deserialize, Serialize};

/// Feature flags for an [`UpdateScheduler`](crate::UpdateScheduler).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wrap every node reconciliation in a labelled `tracing` span and log
    /// how long it took.
    pub log_top_level_renders: bool,
    /// Flush transactions and callback queues to allocate up front, once the
    /// reconcile transaction factory is injected.
    pub pool_prewarm: usize,
}
