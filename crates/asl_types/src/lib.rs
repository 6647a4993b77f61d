//! Shared types for the ASL cerebral blood flow pipeline
//!
//! This crate contains the data model exchanged between pipeline stages:
//! image volumes and their geometry, masks and label maps, transform chains,
//! tissue probability maps, acquisition metadata, CBF variants, the QC record
//! and atlas region summaries.

pub mod error;
pub mod volume;
pub mod transform;
pub mod tissue;
pub mod metadata;
pub mod cbf;
pub mod qc;
pub mod atlas;
pub mod run;

// Re-export commonly used types
pub use error::*;
pub use volume::*;
pub use transform::*;
pub use tissue::*;
pub use metadata::*;
pub use cbf::*;
pub use qc::*;
pub use atlas::*;
pub use run::*;
