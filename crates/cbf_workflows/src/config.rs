//! Workflow settings.

use asl_types::AtlasName;
use pipeline::ExecutionConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stages::refine_mask::MaskPolicy;
use crate::stages::score_scrub::WeightFunction;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("invalid YAML settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Tunables of the CBF workflows. Every field has a default, so an empty
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CbfSettings {
    /// Gaussian smoothing applied to the difference series, FWHM in mm.
    pub smooth_kernel: f64,
    /// Leading volumes discarded before any estimate.
    pub dummy_vols: usize,
    /// Tissue probability above which a voxel counts as that tissue.
    pub score_threshold: f64,
    pub weight_function: WeightFunction,
    pub mask_policy: MaskPolicy,
    /// Atlases summarised by the regional aggregation.
    pub atlases: Vec<AtlasName>,
    pub execution: ExecutionConfig,
}

impl Default for CbfSettings {
    fn default() -> Self {
        Self {
            smooth_kernel: 5.0,
            dummy_vols: 0,
            score_threshold: 0.7,
            weight_function: WeightFunction::Huber,
            mask_policy: MaskPolicy::Intersection,
            atlases: AtlasName::ALL.to_vec(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl CbfSettings {
    pub fn from_yaml(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_yaml(&self) -> Result<String, SettingsError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// JSON schema of the settings document.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(CbfSettings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.smooth_kernel.is_finite() || self.smooth_kernel < 0.0 {
            return Err(SettingsError::Invalid(format!(
                "smooth_kernel must be a non-negative FWHM, got {}",
                self.smooth_kernel
            )));
        }
        if !(self.score_threshold > 0.0 && self.score_threshold <= 1.0) {
            return Err(SettingsError::Invalid(format!(
                "score_threshold must lie in (0, 1], got {}",
                self.score_threshold
            )));
        }
        if self.atlases.is_empty() {
            return Err(SettingsError::Invalid("at least one atlas is required".into()));
        }
        for (i, atlas) in self.atlases.iter().enumerate() {
            if self.atlases[..i].contains(atlas) {
                return Err(SettingsError::Invalid(format!("atlas {} listed twice", atlas)));
            }
        }
        if self.execution.threads == Some(0) {
            return Err(SettingsError::Invalid("execution.threads must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let settings = CbfSettings::from_yaml("{}").unwrap();
        assert_eq!(settings, CbfSettings::default());
        assert_eq!(settings.atlases.len(), 5);
    }

    #[test]
    fn test_partial_yaml() {
        let settings = CbfSettings::from_yaml(
            "smooth_kernel: 0\nweight_function: bisquare\natlases: [HarvardOxford, schaefer200x7]\n",
        )
        .unwrap();
        assert_eq!(settings.smooth_kernel, 0.0);
        assert_eq!(settings.weight_function, WeightFunction::Bisquare);
        assert_eq!(settings.atlases, vec![AtlasName::HarvardOxford, AtlasName::Schaefer200x7]);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(matches!(
            CbfSettings::from_json(r#"{"score_threshold": 1.5}"#),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            CbfSettings::from_json(r#"{"atlases": []}"#),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            CbfSettings::from_json(r#"{"atlases": ["HarvardOxford", "HarvardOxford"]}"#),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            CbfSettings::from_yaml("smoothing: 3\n"),
            Err(SettingsError::Yaml(_))
        ));
    }
}
