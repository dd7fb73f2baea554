pub mod config;
pub mod entity;
pub mod error;
pub mod expression;
pub mod node;
pub mod pointer;
pub mod symbol;
pub mod task;

pub use config::Config;
pub use entity::*;
pub use error::*;
pub use expression::*;
pub use node::*;
pub use pointer::Pointer;
pub use symbol::*;
pub use task::*;
