//! Identity node used as a workflow's `inputnode` and `outputnode`.

use crate::data::PortValues;
use crate::error::StageError;
use crate::stage::{PortSpec, Stage, StageContext};

/// Forwards every input port to the output port of the same name.
pub struct Identity {
    ports: Vec<PortSpec>,
}

impl Identity {
    pub fn new(ports: Vec<PortSpec>) -> Self {
        Self { ports }
    }
}

impl Stage for Identity {
    fn kind(&self) -> &'static str {
        "identity"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        self.ports
            .iter()
            .map(|p| PortSpec::output(p.name.clone(), p.ty))
            .collect()
    }

    fn run(&self, inputs: &PortValues, _ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        Ok(inputs.clone())
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PortType, Value};
    use uuid::Uuid;

    #[test]
    fn test_identity_forwards_partial_inputs() {
        let node = Identity::new(vec![
            PortSpec::required("a", PortType::Scalar),
            PortSpec::optional("b", PortType::Scalar),
        ]);
        let ctx = StageContext { node: "inputnode", run_id: Uuid::new_v4() };
        let out = node.run(&PortValues::new().with("a", Value::Scalar(2.0)), &ctx).unwrap();
        assert_eq!(out.scalar("a").unwrap(), 2.0);
        assert!(!out.contains("b"));
    }
}
