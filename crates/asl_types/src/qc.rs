//! Quality-control record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cbf::CbfVariant;
use crate::run::RunKey;

/// Frame-wise motion summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSummary {
    /// Mean framewise displacement (mm).
    pub fd: f64,
    /// Mean relative root-mean-square displacement.
    pub rmsd: f64,
}

/// Overlap between two binary masks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlapMetrics {
    pub dice: f64,
    pub jaccard: f64,
    pub cross_correlation: f64,
    pub coverage: f64,
}

/// Quality of one CBF map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantQuality {
    /// Quality evaluation index; absent when the map has no spatial
    /// variance to correlate with tissue structure.
    pub qei: Option<f64>,
    /// Percentage of grey-matter voxels with negative CBF.
    pub negative_gm_percent: f64,
}

/// One row of quality metrics per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcRecord {
    pub key: RunKey,
    pub motion: MotionSummary,
    pub coregistration: OverlapMetrics,
    pub normalization: OverlapMetrics,
    /// Only variants that were available when the record was computed.
    pub variants: BTreeMap<CbfVariant, VariantQuality>,
}

impl QcRecord {
    /// Ordered `(column, value)` pairs. Columns of missing variants are
    /// omitted rather than filled.
    pub fn columns(&self) -> Vec<(String, f64)> {
        let mut cols = vec![
            ("FD".to_string(), self.motion.fd),
            ("rmsd".to_string(), self.motion.rmsd),
        ];
        for (prefix, m) in [("coreg", &self.coregistration), ("norm", &self.normalization)] {
            cols.push((format!("{}DC", prefix), m.dice));
            cols.push((format!("{}JC", prefix), m.jaccard));
            cols.push((format!("{}CC", prefix), m.cross_correlation));
            cols.push((format!("{}COV", prefix), m.coverage));
        }
        for (variant, quality) in &self.variants {
            if let Some(qei) = quality.qei {
                cols.push((format!("{}QEI", variant), qei));
            }
            cols.push((format!("{}NegGMPerc", variant), quality.negative_gm_percent));
        }
        cols
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.columns().into_iter().find(|(c, _)| c == name).map(|(_, v)| v)
    }

    pub fn has_variant(&self, variant: CbfVariant) -> bool {
        self.variants.contains_key(&variant)
    }

    /// Header plus one data row, tab separated.
    pub fn to_tsv(&self) -> String {
        let cols = self.columns();
        let mut header = vec!["sub".to_string(), "run".to_string()];
        let mut row = vec![self.key.subject.clone(), self.key.run.to_string()];
        for (name, value) in cols {
            header.push(name);
            row.push(format!("{:.6}", value));
        }
        format!("{}\n{}\n", header.join("\t"), row.join("\t"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlap() -> OverlapMetrics {
        OverlapMetrics { dice: 0.9, jaccard: 0.8, cross_correlation: 0.85, coverage: 0.95 }
    }

    #[test]
    fn test_missing_variant_columns_are_omitted() {
        let mut variants = BTreeMap::new();
        variants.insert(CbfVariant::Cbf, VariantQuality { qei: Some(0.7), negative_gm_percent: 1.0 });
        variants.insert(CbfVariant::Basil, VariantQuality { qei: None, negative_gm_percent: 0.0 });
        let record = QcRecord {
            key: RunKey::new("01", 1),
            motion: MotionSummary { fd: 0.1, rmsd: 0.05 },
            coregistration: overlap(),
            normalization: overlap(),
            variants,
        };

        assert_eq!(record.metric("cbfQEI"), Some(0.7));
        assert_eq!(record.metric("basilQEI"), None);
        assert_eq!(record.metric("basilNegGMPerc"), Some(0.0));
        assert_eq!(record.metric("scoreQEI"), None);
        assert!(!record.has_variant(CbfVariant::Score));

        let tsv = record.to_tsv();
        let lines: Vec<_> = tsv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("sub\trun\tFD\trmsd\tcoregDC"));
        assert_eq!(lines[0].split('\t').count(), lines[1].split('\t').count());
    }
}
