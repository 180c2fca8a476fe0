//! `engine` crate: flow tree model, addressing, binding and the execution engine.
//!
//! A raw tree goes through [`assign_identities`] and [`derive_names`], then
//! [`FlowExecutor`] walks it, binding each step's inputs with the
//! [`InputBinder`] and resolving references with [`resolve_path`].

pub mod binder;
pub mod error;
pub mod executor;
pub mod identity;
pub mod models;
pub mod naming;
pub mod path;
pub mod result;
pub mod variables;

pub use binder::{InputBinder, LoopFrame, ResultStore};
pub use error::{BindingError, NodeError, PathError, RunError, TreeError};
pub use executor::{execute, ExecutorConfig, FlowExecutor};
pub use identity::{assign_identities, new_node_id, validate_identities};
pub use models::{BranchCase, FlowDefinition, InputSource, InputSpec, StepKind, WorkflowNode};
pub use naming::{derive_names, LABEL_SEPARATOR};
pub use path::{resolve_path, Field, NodePath, PathExpr, Segment};
pub use result::{FailureSite, NodeEvent, NodeOutcome, NodeStatus, RunReport, RunStatus};
pub use variables::{BoundVariables, FlowInputVariable, VarType};
