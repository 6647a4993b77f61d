//! Tissue probability maps.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::volume::{Geometry, ImageVolume};

/// Tissue classes carried by a segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TissueClass {
    Grey,
    White,
    Csf,
}

impl TissueClass {
    pub const ALL: [TissueClass; 3] = [TissueClass::Grey, TissueClass::White, TissueClass::Csf];

    /// Position of this class in an ordered collection of `len` maps:
    /// grey first, white second, csf last.
    pub fn position(self, len: usize) -> Option<usize> {
        if len < 3 {
            return None;
        }
        Some(match self {
            TissueClass::Grey => 0,
            TissueClass::White => 1,
            TissueClass::Csf => len - 1,
        })
    }

    pub fn short_name(self) -> &'static str {
        match self {
            TissueClass::Grey => "gm",
            TissueClass::White => "wm",
            TissueClass::Csf => "csf",
        }
    }
}

impl fmt::Display for TissueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Grey, white and CSF probability maps addressed by name.
///
/// `from_ordered` is the single place where the positional convention of an
/// anatomical segmentation output is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct TissueMaps {
    pub grey: Arc<ImageVolume>,
    pub white: Arc<ImageVolume>,
    pub csf: Arc<ImageVolume>,
}

impl TissueMaps {
    pub fn new(grey: ImageVolume, white: ImageVolume, csf: ImageVolume) -> Self {
        Self {
            grey: Arc::new(grey),
            white: Arc::new(white),
            csf: Arc::new(csf),
        }
    }

    /// Interprets an ordered collection of at least three maps.
    pub fn from_ordered(maps: Vec<ImageVolume>) -> Result<Self, DataError> {
        let len = maps.len();
        let pick = |class: TissueClass| {
            class
                .position(len)
                .map(|i| Arc::new(maps[i].clone()))
                .ok_or(DataError::TooFewTissueMaps(len))
        };
        Ok(Self {
            grey: pick(TissueClass::Grey)?,
            white: pick(TissueClass::White)?,
            csf: pick(TissueClass::Csf)?,
        })
    }

    pub fn get(&self, class: TissueClass) -> &Arc<ImageVolume> {
        match class {
            TissueClass::Grey => &self.grey,
            TissueClass::White => &self.white,
            TissueClass::Csf => &self.csf,
        }
    }

    /// Checks that all three maps live on `geometry`.
    pub fn ensure_geometry(&self, geometry: &Geometry) -> Result<(), DataError> {
        for class in TissueClass::ALL {
            geometry.ensure_matches(&self.get(class).geometry(), class.short_name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Affine;
    use ndarray::Array3;
    use proptest::prelude::*;

    fn tagged(value: f32) -> ImageVolume {
        ImageVolume::from_3d(Array3::from_elem((1, 1, 1), value), Affine::IDENTITY)
    }

    fn tag(v: &ImageVolume) -> f32 {
        v.volume3().unwrap()[[0, 0, 0]]
    }

    #[test]
    fn test_three_maps() {
        let maps = TissueMaps::from_ordered(vec![tagged(0.0), tagged(1.0), tagged(2.0)]).unwrap();
        assert_eq!(tag(&maps.grey), 0.0);
        assert_eq!(tag(&maps.white), 1.0);
        assert_eq!(tag(&maps.csf), 2.0);
    }

    #[test]
    fn test_too_few_maps() {
        assert_eq!(
            TissueMaps::from_ordered(vec![tagged(0.0), tagged(1.0)]),
            Err(DataError::TooFewTissueMaps(2))
        );
    }

    proptest! {
        #[test]
        fn prop_grey_first_white_second_csf_last(len in 3usize..12) {
            let maps: Vec<_> = (0..len).map(|i| tagged(i as f32)).collect();
            let tissues = TissueMaps::from_ordered(maps).unwrap();
            prop_assert_eq!(tag(&tissues.grey), 0.0);
            prop_assert_eq!(tag(&tissues.white), 1.0);
            prop_assert_eq!(tag(&tissues.csf), (len - 1) as f32);
            prop_assert_eq!(TissueClass::Csf.position(len), Some(len - 1));
        }
    }
}
