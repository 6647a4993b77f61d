//! Selector functions applied on edges.
//!
//! A selector turns the value produced on an output port into the value a
//! consumer port receives, e.g. picking one tissue map out of a segmentation
//! or the directory that contains a file. Selectors are pure and declare
//! their input and output types so the graph can type-check them before
//! anything runs.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use asl_types::TissueClass;

use crate::data::{PortType, Value};
use crate::error::StageError;

type SelectFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// A typed, pure function attached to an edge.
#[derive(Clone)]
pub struct Selector {
    name: String,
    input: PortType,
    output: PortType,
    func: Arc<SelectFn>,
}

impl Selector {
    pub fn new<F>(name: impl Into<String>, input: PortType, output: PortType, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            input,
            output,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_type(&self) -> PortType {
        self.input
    }

    pub fn output_type(&self) -> PortType {
        self.output
    }

    /// Applies the selector, checking both declared types.
    pub fn apply(&self, value: &Value) -> Result<Value, StageError> {
        if value.port_type() != self.input {
            return Err(self.error(format!("got {}, expected {}", value.port_type(), self.input)));
        }
        let out = (self.func)(value).map_err(|message| self.error(message))?;
        if out.port_type() != self.output {
            return Err(self.error(format!("produced {}, declared {}", out.port_type(), self.output)));
        }
        Ok(out)
    }

    fn error(&self, message: String) -> StageError {
        StageError::Selector { selector: self.name.clone(), message }
    }

    /// One named tissue map out of a [`asl_types::TissueMaps`] value.
    pub fn tissue(class: TissueClass) -> Self {
        Self::new(
            format!("pick_{}", class.short_name()),
            PortType::Tissues,
            PortType::Volume,
            move |v| match v {
                Value::Tissues(maps) => Ok(Value::Volume(Arc::clone(maps.get(class)))),
                _ => Err("not a tissue map set".to_string()),
            },
        )
    }

    /// Element `index` of a mask list.
    pub fn pick_mask(index: usize) -> Self {
        Self::new(format!("pick_mask_{}", index), PortType::MaskList, PortType::Mask, move |v| {
            match v {
                Value::MaskList(list) => list
                    .get(index)
                    .cloned()
                    .map(Value::mask)
                    .ok_or_else(|| format!("index {} out of range for {} masks", index, list.len())),
                _ => Err("not a mask list".to_string()),
            }
        })
    }

    /// Last element of a mask list.
    pub fn last_mask() -> Self {
        Self::new("pick_last_mask", PortType::MaskList, PortType::Mask, |v| match v {
            Value::MaskList(list) => list
                .last()
                .cloned()
                .map(Value::mask)
                .ok_or_else(|| "mask list is empty".to_string()),
            _ => Err("not a mask list".to_string()),
        })
    }

    /// Directory containing a file path.
    pub fn dirname() -> Self {
        Self::new("dirname", PortType::Path, PortType::Path, |v| match v {
            Value::Path(p) => Ok(Value::Path(
                p.parent().map(PathBuf::from).unwrap_or_default(),
            )),
            _ => Err("not a path".to_string()),
        })
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({}: {} -> {})", self.name, self.input, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asl_types::{Affine, ImageVolume, Mask, TissueMaps};
    use ndarray::Array3;
    use proptest::prelude::*;
    use std::path::Path;

    fn tagged(value: f32) -> ImageVolume {
        ImageVolume::from_3d(Array3::from_elem((1, 1, 1), value), Affine::IDENTITY)
    }

    fn tag_of(v: &Value) -> f32 {
        match v {
            Value::Volume(vol) => vol.volume3().unwrap()[[0, 0, 0]],
            other => panic!("unexpected {:?}", other.port_type()),
        }
    }

    #[test]
    fn test_dirname() {
        let out = Selector::dirname()
            .apply(&Value::Path("/data/sub-01/perf/sub-01_asl.nii.gz".into()))
            .unwrap();
        match out {
            Value::Path(p) => assert_eq!(p, Path::new("/data/sub-01/perf")),
            _ => panic!("expected a path"),
        }
    }

    #[test]
    fn test_selector_rejects_wrong_input_type() {
        let err = Selector::dirname().apply(&Value::Scalar(1.0)).unwrap_err();
        assert!(matches!(err, StageError::Selector { .. }));
    }

    #[test]
    fn test_mask_picks() {
        let masks: Vec<Mask> = (0..3)
            .map(|i| Mask::new(Array3::from_elem((1, 1, i + 1), true), Affine::IDENTITY))
            .collect();
        let list = Value::MaskList(Arc::new(masks));
        match Selector::last_mask().apply(&list).unwrap() {
            Value::Mask(m) => assert_eq!(m.voxel_count(), 3),
            _ => panic!("expected a mask"),
        }
        match Selector::pick_mask(0).apply(&list).unwrap() {
            Value::Mask(m) => assert_eq!(m.voxel_count(), 1),
            _ => panic!("expected a mask"),
        }
        assert!(Selector::pick_mask(5).apply(&list).is_err());
    }

    proptest! {
        #[test]
        fn prop_tissue_selectors_follow_ingestion_order(len in 3usize..10) {
            let maps = TissueMaps::from_ordered((0..len).map(|i| tagged(i as f32)).collect()).unwrap();
            let value = Value::tissues(maps);
            prop_assert_eq!(tag_of(&Selector::tissue(TissueClass::Grey).apply(&value).unwrap()), 0.0);
            prop_assert_eq!(tag_of(&Selector::tissue(TissueClass::White).apply(&value).unwrap()), 1.0);
            prop_assert_eq!(
                tag_of(&Selector::tissue(TissueClass::Csf).apply(&value).unwrap()),
                (len - 1) as f32
            );
        }
    }
}
