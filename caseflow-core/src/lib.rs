//! caseflow-core: a crash-proof workflow execution engine.
//!
//! A *case* is one running instance of a graph-shaped workflow definition.
//! The engine drives a case through task steps, serial and parallel routes
//! and join barriers, persisting the whole case snapshot after every
//! observable transition. After arbitrary process termination, `resume`
//! sanitizes the last durable snapshot back into a consistent configuration
//! and continues driving, guaranteeing at most one step's work is lost
//! (observed-once given idempotent task bodies).
//!
//! Hosts embed the engine by implementing [`store::CaseStore`] for their
//! durable store (or using the bundled memory/file stores), registering
//! task and route bodies in a [`registry::CapabilityRegistry`], and calling
//! [`engine::WorkflowEngine`] `start`/`resume`/`inspect`.

pub mod defn;
pub mod engine;
pub mod error;
pub mod events;
pub mod path;
pub mod registry;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod types;

mod dispatch;
mod driver;
mod join;
mod sanitize;

pub use driver::CaseOutcome;
pub use engine::{EngineConfig, WorkflowEngine};
pub use error::EngineError;
