//! Incremental scheduler over the expression graph.
//!
//! [`ExpressionNetwork`] decides what to run and when. Per-node check-then-act
//! sequences are serialized by [`NodeLocks`]; run state lives in
//! [`RunStates`]; fan-out goes through the [`WorkerPool`].

pub mod locks;
pub mod metrics;
pub mod network;
pub mod pool;
pub mod state;

pub use locks::NodeLocks;
pub use metrics::NetworkMetrics;
pub use network::{ExpressionNetwork, ExpressionNetworkBuilder, ExpressionState, RunOutcome};
pub use pool::{Job, JobHandler, PoolStats, WorkerPool};
pub use state::RunStates;
