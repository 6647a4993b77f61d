//! Spatial transforms and ordered transform chains.

use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::volume::Affine;

/// A single world-to-world mapping from a source space into a target space
/// (for example anatomical to functional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub name: String,
    pub matrix: Affine,
}

impl Transform {
    pub fn new(name: impl Into<String>, matrix: Affine) -> Self {
        Self { name: name.into(), matrix }
    }

    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name, Affine::IDENTITY)
    }
}

/// An ordered list of transforms.
///
/// The list is applied *first applied last*: the chain `[A, B]` maps a point
/// `p` to `A(B(p))`. This is the order used by the resampler everywhere, so
/// concatenation must never reorder entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformChain {
    transforms: Vec<Transform>,
}

impl TransformChain {
    /// The empty chain, which maps every point onto itself.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn single(transform: Transform) -> Self {
        Self { transforms: vec![transform] }
    }

    pub fn from_transforms(transforms: Vec<Transform>) -> Self {
        Self { transforms }
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// `self` followed by `next`: the result applies `next` first.
    pub fn concat(&self, next: &TransformChain) -> TransformChain {
        let mut transforms = self.transforms.clone();
        transforms.extend(next.transforms.iter().cloned());
        Self { transforms }
    }

    /// Single matrix equivalent to the whole chain.
    pub fn composite(&self) -> Affine {
        self.transforms
            .iter()
            .fold(Affine::IDENTITY, |acc, t| acc.compose(&t.matrix))
    }

    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        self.transforms.iter().rev().fold(p, |q, t| t.matrix.apply(q))
    }

    /// Matrix mapping target-space points back into the source space.
    pub fn inverse_composite(&self) -> Result<Affine, DataError> {
        let names = self
            .transforms
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join("+");
        self.composite()
            .inverse()
            .ok_or(DataError::SingularTransform(names))
    }
}
