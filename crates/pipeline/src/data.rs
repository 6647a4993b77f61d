//! Data types for pipeline communication
//!
//! Every value that travels along an edge is a [`Value`]; every port declares
//! the [`PortType`] it accepts or produces. Payloads are behind `Arc` so
//! fanning a value out to many consumers never copies image data, and no
//! consumer can mutate what a producer wrote.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use asl_types::{
    AslContext, ConfoundsTable, Figure, ImageVolume, LabelMap, Mask, OutlierIndex, QcRecord,
    RegionSummary, TissueMaps, TransformChain,
};

use crate::error::StageError;

/// Semantic type of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    Path,
    Text,
    Scalar,
    Volume,
    Mask,
    MaskList,
    Labels,
    Tissues,
    Transforms,
    Context,
    Confounds,
    Outliers,
    Qc,
    Regions,
    Figure,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortType::Path => "path",
            PortType::Text => "text",
            PortType::Scalar => "scalar",
            PortType::Volume => "volume",
            PortType::Mask => "mask",
            PortType::MaskList => "mask list",
            PortType::Labels => "label map",
            PortType::Tissues => "tissue maps",
            PortType::Transforms => "transform chain",
            PortType::Context => "ASL context",
            PortType::Confounds => "confounds table",
            PortType::Outliers => "outlier index",
            PortType::Qc => "QC record",
            PortType::Regions => "region summary",
            PortType::Figure => "figure",
        };
        f.write_str(name)
    }
}

/// A value delivered to or produced by a port.
#[derive(Debug, Clone)]
pub enum Value {
    Path(PathBuf),
    Text(String),
    Scalar(f64),
    Volume(Arc<ImageVolume>),
    Mask(Arc<Mask>),
    /// Ordered collection of masks (e.g. one per output space).
    MaskList(Arc<Vec<Mask>>),
    Labels(Arc<LabelMap>),
    Tissues(Arc<TissueMaps>),
    Transforms(Arc<TransformChain>),
    Context(Arc<AslContext>),
    Confounds(Arc<ConfoundsTable>),
    Outliers(Arc<OutlierIndex>),
    Qc(Arc<QcRecord>),
    Regions(Arc<RegionSummary>),
    Figure(Arc<Figure>),
}

impl Value {
    pub fn port_type(&self) -> PortType {
        match self {
            Value::Path(_) => PortType::Path,
            Value::Text(_) => PortType::Text,
            Value::Scalar(_) => PortType::Scalar,
            Value::Volume(_) => PortType::Volume,
            Value::Mask(_) => PortType::Mask,
            Value::MaskList(_) => PortType::MaskList,
            Value::Labels(_) => PortType::Labels,
            Value::Tissues(_) => PortType::Tissues,
            Value::Transforms(_) => PortType::Transforms,
            Value::Context(_) => PortType::Context,
            Value::Confounds(_) => PortType::Confounds,
            Value::Outliers(_) => PortType::Outliers,
            Value::Qc(_) => PortType::Qc,
            Value::Regions(_) => PortType::Regions,
            Value::Figure(_) => PortType::Figure,
        }
    }

    pub fn volume(v: ImageVolume) -> Self {
        Value::Volume(Arc::new(v))
    }

    pub fn mask(m: Mask) -> Self {
        Value::Mask(Arc::new(m))
    }

    pub fn labels(l: LabelMap) -> Self {
        Value::Labels(Arc::new(l))
    }

    pub fn transforms(t: TransformChain) -> Self {
        Value::Transforms(Arc::new(t))
    }

    pub fn tissues(t: TissueMaps) -> Self {
        Value::Tissues(Arc::new(t))
    }
}

/// Named port values handed to, or returned from, a stage.
#[derive(Debug, Clone, Default)]
pub struct PortValues(BTreeMap<String, Value>);

macro_rules! typed_getters {
    ($( $get:ident, $get_opt:ident => $variant:ident ( $ty:ty ) );* $(;)?) => {
        $(
            /// Required input of this type; errors if absent or ill-typed.
            pub fn $get(&self, port: &str) -> Result<$ty, StageError> {
                self.$get_opt(port)?.ok_or_else(|| StageError::MissingInput(port.to_string()))
            }

            /// Optional input of this type; `None` if the port carries nothing.
            pub fn $get_opt(&self, port: &str) -> Result<Option<$ty>, StageError> {
                match self.0.get(port) {
                    None => Ok(None),
                    Some(Value::$variant(v)) => Ok(Some(v.clone())),
                    Some(other) => Err(StageError::WrongType {
                        port: port.to_string(),
                        expected: PortType::$variant,
                        found: other.port_type(),
                    }),
                }
            }
        )*
    };
}

impl PortValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(port.into(), value)
    }

    /// Builder-style insert.
    pub fn with(mut self, port: impl Into<String>, value: Value) -> Self {
        self.insert(port, value);
        self
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.0.get(port)
    }

    pub fn contains(&self, port: &str) -> bool {
        self.0.contains_key(port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn remove(&mut self, port: &str) -> Option<Value> {
        self.0.remove(port)
    }

    typed_getters! {
        path, opt_path => Path(PathBuf);
        text, opt_text => Text(String);
        scalar, opt_scalar => Scalar(f64);
        volume, opt_volume => Volume(Arc<ImageVolume>);
        mask, opt_mask => Mask(Arc<Mask>);
        mask_list, opt_mask_list => MaskList(Arc<Vec<Mask>>);
        labels, opt_labels => Labels(Arc<LabelMap>);
        tissues, opt_tissues => Tissues(Arc<TissueMaps>);
        transforms, opt_transforms => Transforms(Arc<TransformChain>);
        context, opt_context => Context(Arc<AslContext>);
        confounds, opt_confounds => Confounds(Arc<ConfoundsTable>);
        outliers, opt_outliers => Outliers(Arc<OutlierIndex>);
        qc, opt_qc => Qc(Arc<QcRecord>);
        regions, opt_regions => Regions(Arc<RegionSummary>);
        figure, opt_figure => Figure(Arc<Figure>);
    }
}

impl FromIterator<(String, Value)> for PortValues {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asl_types::Affine;
    use ndarray::Array3;

    #[test]
    fn test_typed_getters() {
        let vol = ImageVolume::from_3d(Array3::zeros((1, 1, 1)), Affine::IDENTITY);
        let values = PortValues::new()
            .with("in_file", Value::volume(vol))
            .with("tr", Value::Scalar(4.0));

        assert!(values.volume("in_file").is_ok());
        assert_eq!(values.scalar("tr").unwrap(), 4.0);
        assert!(values.opt_mask("in_mask").unwrap().is_none());
        assert!(matches!(values.mask("in_mask"), Err(StageError::MissingInput(_))));
        assert!(matches!(
            values.mask("in_file"),
            Err(StageError::WrongType { expected: PortType::Mask, found: PortType::Volume, .. })
        ));
    }
}
