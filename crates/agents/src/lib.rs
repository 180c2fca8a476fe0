//! `agents` crate: the `AgentExecutor` capability and its stock implementations.
//!
//! The engine never talks to an LLM (or anything else) directly. Every agent
//! step is dispatched through the [`AgentExecutor`] trait object supplied by the
//! surrounding system.

pub mod echo;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use echo::EchoAgent;
pub use error::AgentError;
pub use registry::AgentRegistry;
pub use traits::{AgentExecutor, BoundInputs, InvocationContext};
