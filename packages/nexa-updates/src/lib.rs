//! Batched update scheduling for Nexa's retained component tree.

pub mod batching;
pub mod callback_queue;
pub mod config;
pub mod error;
pub mod injection;
pub mod node;
pub mod pool;
pub mod reconciler;
pub mod transaction;
pub mod updates;

pub use batching::{BatchingStrategy, DefaultBatchingStrategy};
pub use callback_queue::CallbackQueue;
pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use node::{NodeId, PendingCallback};
pub use pool::{Pool, PoolStats, Recycle};
pub use reconciler::{HostTransaction, Reconciler};
pub use transaction::{Transaction, Wrapper};
pub use updates::{FlushStats, UpdateScheduler};
