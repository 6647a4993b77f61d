//! Core stage trait and port declarations

use std::fmt;

use uuid::Uuid;

use crate::data::{PortType, PortValues};
use crate::error::StageError;

/// Declaration of one named port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub ty: PortType,
    /// Only meaningful on inputs. A stage with an unfilled required input
    /// is never run.
    pub required: bool,
}

impl PortSpec {
    pub fn required(name: impl Into<String>, ty: PortType) -> Self {
        Self { name: name.into(), ty, required: true }
    }

    pub fn optional(name: impl Into<String>, ty: PortType) -> Self {
        Self { name: name.into(), ty, required: false }
    }

    /// Output ports carry no requiredness; this is an alias for readability.
    pub fn output(name: impl Into<String>, ty: PortType) -> Self {
        Self::required(name, ty)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = if self.required { "" } else { "?" };
        write!(f, "{}{}: {}", self.name, flag, self.ty)
    }
}

/// Per-invocation information handed to a running stage.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Fully qualified node name, e.g. `cbf_compt_wf.computecbf`.
    pub node: &'a str,
    pub run_id: Uuid,
}

/// Core trait that all processing units implement.
///
/// A stage is constructed with its parameters already validated, so `run`
/// only ever fails on bad data. It receives exactly the ports that were
/// filled upstream and returns values for its declared outputs; the engine
/// checks the returned types.
pub trait Stage: Send + Sync {
    /// Short identifier of the stage type, used in logs.
    fn kind(&self) -> &'static str;

    fn inputs(&self) -> Vec<PortSpec>;

    fn outputs(&self) -> Vec<PortSpec>;

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError>;

    /// Identity nodes forward each port independently and run even when
    /// only some of their inputs arrived.
    fn is_passthrough(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_spec_display() {
        assert_eq!(PortSpec::required("bold_mask", PortType::Mask).to_string(), "bold_mask: mask");
        assert_eq!(
            PortSpec::optional("cbf", PortType::Volume).to_string(),
            "cbf?: volume"
        );
    }
}
