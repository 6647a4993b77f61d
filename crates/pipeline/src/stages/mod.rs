//! Generic stages used by every workflow.

pub mod identity;
pub mod merge;

pub use identity::Identity;
pub use merge::Merge;
