//! Brain atlases and regional CBF summaries.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cbf::CbfVariant;
use crate::volume::LabelMap;

/// The fixed set of atlases regional summaries are computed over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum AtlasName {
    HarvardOxford,
    #[serde(rename = "schaefer200x7")]
    Schaefer200x7,
    #[serde(rename = "schaefer200x17")]
    Schaefer200x17,
    #[serde(rename = "schaefer400x7")]
    Schaefer400x7,
    #[serde(rename = "schaefer400x17")]
    Schaefer400x17,
}

impl AtlasName {
    pub const ALL: [AtlasName; 5] = [
        AtlasName::HarvardOxford,
        AtlasName::Schaefer200x7,
        AtlasName::Schaefer200x17,
        AtlasName::Schaefer400x7,
        AtlasName::Schaefer400x17,
    ];

    /// Short tag used in output port names (`cbf_hvoxf`, `pvc_sc417`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            AtlasName::HarvardOxford => "hvoxf",
            AtlasName::Schaefer200x7 => "sc207",
            AtlasName::Schaefer200x17 => "sc217",
            AtlasName::Schaefer400x7 => "sc407",
            AtlasName::Schaefer400x17 => "sc417",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AtlasName::HarvardOxford => "HarvardOxford",
            AtlasName::Schaefer200x7 => "schaefer200x7",
            AtlasName::Schaefer200x17 => "schaefer200x17",
            AtlasName::Schaefer400x7 => "schaefer400x7",
            AtlasName::Schaefer400x17 => "schaefer400x17",
        }
    }
}

impl fmt::Display for AtlasName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labelled region of an atlas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionLabel {
    pub id: i32,
    pub name: String,
}

/// A labelled template plus its region lookup table. Shared read-only by
/// every aggregation branch.
#[derive(Debug, Clone)]
pub struct AtlasDefinition {
    pub name: AtlasName,
    pub template: Arc<LabelMap>,
    pub regions: Vec<RegionLabel>,
}

impl AtlasDefinition {
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn contains_label(&self, id: i32) -> bool {
        self.regions.iter().any(|r| r.id == id)
    }
}

/// Summary statistic of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRow {
    pub id: i32,
    pub name: String,
    /// Mean CBF over the region's voxels; NaN when the region has no voxel
    /// inside the functional field of view.
    pub mean: f64,
    pub voxels: usize,
}

/// Region table for one (CBF variant, atlas) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub atlas: AtlasName,
    pub variant: CbfVariant,
    pub rows: Vec<RegionRow>,
}

impl RegionSummary {
    pub fn row(&self, id: i32) -> Option<&RegionRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn to_tsv(&self) -> String {
        let mut out = String::from("id\tregion\tmean_cbf\tvoxels\n");
        for r in &self.rows {
            out.push_str(&format!("{}\t{}\t{:.6}\t{}\n", r.id, r.name, r.mean, r.voxels));
        }
        out
    }
}
