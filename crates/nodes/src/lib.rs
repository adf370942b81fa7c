//! `nodes` crate — the `ExecutableNode` trait, the execution context
//! facade, the tag/description data model, and the built-in node set.
//!
//! Every node — built-in and library-provided alike — implements
//! [`ExecutableNode`]. The engine crate dispatches execution through this
//! trait object; it never knows the concrete node type.

pub mod builtin;
pub mod context;
pub mod description;
pub mod error;
pub mod mock;
pub mod tag;
pub mod traits;

pub use context::ExecutionContext;
pub use description::NodeDescription;
pub use error::NodeError;
pub use tag::{DataType, DriverType, TagData, TagDescriptor, TagValue};
pub use traits::{ExecutableNode, NodeFactory, NodeOutput, OnError};
