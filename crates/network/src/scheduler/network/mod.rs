//! The expression scheduler.
//!
//! Split into focused submodules:
//! - `core`: ExpressionNetwork struct, builder, notifications and graph walks
//! - `propagation`: graph insertion and watermark propagation
//! - `execution`: run decisions and completion handling
//! - `admin`: operator updates, lane changes, deletion, recovery and views

mod admin;
mod core;
mod execution;
mod propagation;

pub use self::admin::ExpressionState;
pub use self::core::{ExpressionNetwork, ExpressionNetworkBuilder};
pub use self::execution::RunOutcome;
