//! CBF variants and the per-run side products that travel with them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// The five CBF maps produced for every run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum CbfVariant {
    /// Mean CBF from the basic model.
    Cbf,
    /// Mean of the frames kept by outlier rejection.
    Score,
    /// Robust reweighted mean.
    Scrub,
    /// Bayesian estimate.
    Basil,
    /// Bayesian estimate with partial-volume correction.
    Pvc,
}

impl CbfVariant {
    pub const ALL: [CbfVariant; 5] = [
        CbfVariant::Cbf,
        CbfVariant::Score,
        CbfVariant::Scrub,
        CbfVariant::Basil,
        CbfVariant::Pvc,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CbfVariant::Cbf => "cbf",
            CbfVariant::Score => "score",
            CbfVariant::Scrub => "scrub",
            CbfVariant::Basil => "basil",
            CbfVariant::Pvc => "pvc",
        }
    }
}

impl fmt::Display for CbfVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of each volume in an ASL series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    Label,
    Control,
    M0scan,
    Deltam,
    Cbf,
}

impl FromStr for VolumeType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "label" => Ok(VolumeType::Label),
            "control" => Ok(VolumeType::Control),
            "m0scan" => Ok(VolumeType::M0scan),
            "deltam" => Ok(VolumeType::Deltam),
            "cbf" => Ok(VolumeType::Cbf),
            other => Err(DataError::UnknownVolumeType(other.to_string())),
        }
    }
}

/// Per-volume type list of an ASL series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AslContext {
    pub volumes: Vec<VolumeType>,
}

impl AslContext {
    /// Control/label pairs, starting with control.
    pub fn alternating(n_volumes: usize) -> Self {
        let volumes = (0..n_volumes)
            .map(|i| if i % 2 == 0 { VolumeType::Control } else { VolumeType::Label })
            .collect();
        Self { volumes }
    }

    /// Parses the `volume_type` column of a context table, one entry per line.
    /// A header line named `volume_type` is skipped.
    pub fn parse(text: &str) -> Result<Self, DataError> {
        let volumes = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "volume_type")
            .map(VolumeType::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { volumes })
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Indices of volumes of the given type.
    pub fn indices(&self, kind: VolumeType) -> Vec<usize> {
        self.volumes
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == kind)
            .map(|(i, _)| i)
            .collect()
    }

    /// Drops the first `n` entries, matching dropped dummy volumes.
    pub fn skip(&self, n: usize) -> Self {
        Self { volumes: self.volumes.iter().skip(n).copied().collect() }
    }
}

/// Frames rejected by outlier detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierIndex {
    pub rejected: Vec<bool>,
}

impl OutlierIndex {
    pub fn n_rejected(&self) -> usize {
        self.rejected.iter().filter(|&&r| r).count()
    }

    pub fn n_kept(&self) -> usize {
        self.rejected.len() - self.n_rejected()
    }

    /// One row per frame, `1` marking a rejected frame.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("frame\trejected\n");
        for (i, r) in self.rejected.iter().enumerate() {
            out.push_str(&format!("{}\t{}\n", i, u8::from(*r)));
        }
        out
    }
}

/// Per-frame registration confounds (motion parameters and summaries).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfoundsTable {
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl ConfoundsTable {
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Self {
        self.columns.insert(name.to_string(), values);
        self
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Mean over the finite entries of a column (the first frame of a
    /// displacement column is usually `n/a`).
    pub fn finite_mean(&self, name: &str) -> Option<f64> {
        let values: Vec<f64> = self.column(name)?.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

/// A rendered report figure.
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub label: String,
    /// File-format tag, e.g. `pgm`.
    pub format: String,
    pub width: usize,
    pub height: usize,
    pub bytes: Vec<u8>,
}
