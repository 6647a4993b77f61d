//! Acquisition metadata and its validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Sidecar metadata of an ASL run, as read from the acquisition's JSON.
///
/// Every field is optional here; [`AslMetadata::validate`] decides whether
/// the record is complete enough to build a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AslMetadata {
    #[serde(default)]
    pub repetition_time: Option<f64>,
    #[serde(default)]
    pub post_labeling_delay: Option<f64>,
    #[serde(default)]
    pub labeling_duration: Option<f64>,
    #[serde(default)]
    pub labeling_type: Option<String>,
    /// Calibration scale applied to the M0 reference.
    #[serde(default, rename = "M0")]
    pub m0: Option<f64>,
    /// Fields the pipeline does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Labeling scheme resolved from the `LabelingType` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelingScheme {
    /// Continuous or pseudo-continuous labeling.
    Continuous,
    Pulsed,
}

impl LabelingScheme {
    /// Resolves a labeling-type string; a "CASL" marker wins over "PASL".
    pub fn resolve(labeling_type: &str) -> Result<Self, MetadataError> {
        if labeling_type.contains("CASL") {
            Ok(LabelingScheme::Continuous)
        } else if labeling_type.contains("PASL") {
            Ok(LabelingScheme::Pulsed)
        } else {
            Err(MetadataError::UnrecognizedLabelingType(labeling_type.to_string()))
        }
    }

    /// Flag consumed by the Bayesian estimator.
    pub fn is_continuous(self) -> bool {
        self == LabelingScheme::Continuous
    }
}

/// Validated acquisition parameters. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    pub repetition_time: f64,
    pub post_labeling_delay: f64,
    pub labeling_duration: f64,
    pub scheme: LabelingScheme,
    pub m0_scale: f64,
}

impl AcquisitionParams {
    /// Inversion time handed to the Bayesian estimator.
    pub fn inversion_time(&self) -> f64 {
        self.post_labeling_delay + self.labeling_duration
    }
}

impl AslMetadata {
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<AcquisitionParams, MetadataError> {
        let labeling_type = self
            .labeling_type
            .as_deref()
            .ok_or(MetadataError::MissingField("LabelingType"))?;
        let scheme = LabelingScheme::resolve(labeling_type)?;

        Ok(AcquisitionParams {
            repetition_time: positive("RepetitionTime", self.repetition_time)?,
            post_labeling_delay: non_negative("PostLabelingDelay", self.post_labeling_delay)?,
            labeling_duration: positive("LabelingDuration", self.labeling_duration)?,
            scheme,
            m0_scale: positive("M0", self.m0)?,
        })
    }
}

fn non_negative(field: &'static str, value: Option<f64>) -> Result<f64, MetadataError> {
    let value = value.ok_or(MetadataError::MissingField(field))?;
    if !value.is_finite() || value < 0.0 {
        return Err(MetadataError::InvalidField { field, value });
    }
    Ok(value)
}

fn positive(field: &'static str, value: Option<f64>) -> Result<f64, MetadataError> {
    let value = non_negative(field, value)?;
    if value == 0.0 {
        return Err(MetadataError::InvalidField { field, value });
    }
    Ok(value)
}
