//! Run identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one ASL run of one subject. Every artifact the pipeline
/// produces is keyed by a `RunKey` plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub subject: String,
    pub run: u32,
}

impl RunKey {
    pub fn new(subject: impl Into<String>, run: u32) -> Self {
        Self { subject: subject.into(), run }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}_run-{:02}", self.subject, self.run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(RunKey::new("01", 2).to_string(), "sub-01_run-02");
    }
}
