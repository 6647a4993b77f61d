//! Merges several transform chains into one.

use asl_types::TransformChain;

use crate::data::{PortType, PortValues, Value};
use crate::error::StageError;
use crate::stage::{PortSpec, Stage, StageContext};

/// `Merge(n)`: inputs `in1..inN`, output `out`.
///
/// The output chain lists the transforms of `in1` first, so with the
/// first-applied-last convention `in1` is applied last. Merging
/// `[anat->func]` and `[std->anat]` yields `[anat->func, std->anat]`,
/// which maps standard space into functional space.
pub struct Merge {
    n: usize,
}

impl Merge {
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    fn port(i: usize) -> String {
        format!("in{}", i + 1)
    }
}

impl Stage for Merge {
    fn kind(&self) -> &'static str {
        "merge"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        (0..self.n)
            .map(|i| PortSpec::required(Self::port(i), PortType::Transforms))
            .collect()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("out", PortType::Transforms)]
    }

    fn run(&self, inputs: &PortValues, _ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let mut merged = TransformChain::identity();
        for i in 0..self.n {
            let next = inputs.transforms(&Self::port(i))?;
            merged = merged.concat(&next);
        }
        Ok(PortValues::new().with("out", Value::transforms(merged)))
    }
}
