//! Incremental dataflow scheduler over an expression graph.
//!
//! The [`ExpressionNetwork`] tracks how far each node's output has been
//! computed, derives how far it should be from its upstreams, and hands the
//! difference to a remote [`Executor`]. Persistence and computation sit
//! behind the traits in [`repository`] and [`services`].

pub mod error;
pub mod memory;
pub mod notify;
pub mod repository;
pub mod scheduler;
pub mod services;
pub mod sim;
pub mod view;

pub use error::{NetworkError, Result, ServiceError};
pub use memory::{InMemoryNodeRepository, InMemoryTaskRepository};
pub use notify::{BroadcastQueue, Notification, Subscription};
pub use repository::{NodeRepository, TaskRepository};
pub use scheduler::{
    ExpressionNetwork, ExpressionNetworkBuilder, ExpressionState, NetworkMetrics, PoolStats, RunOutcome,
};
pub use services::{DataInfo, Executor, MessageQueue, PerformanceService, SymbolLibraryService};
pub use view::{GraphEdge, GraphNode, GraphNodeKind, GraphView};
