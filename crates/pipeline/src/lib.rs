//! Typed-port dataflow graph for neuroimaging workflows
//!
//! This crate implements the graph layer of the ASL pipeline: stages declare
//! typed input and output ports, edges route values between them (optionally
//! through a selector), workflows nest as ordinary nodes, and a finalised
//! graph is handed to an execution engine. The graph itself never runs
//! anything.

pub mod error;
pub mod data;
pub mod selector;
pub mod stage;
pub mod stages;
pub mod graph;
pub mod workflow;
pub mod executor;
pub mod event;
pub mod config;


// Re-export commonly used types
pub use error::*;
pub use data::*;
pub use selector::*;
pub use stage::*;
pub use graph::*;
pub use workflow::*;
pub use executor::*;
pub use event::*;
pub use config::*;
