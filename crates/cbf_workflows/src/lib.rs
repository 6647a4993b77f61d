//! ASL cerebral blood flow workflows
//!
//! Processing stages and workflow builders for quantifying CBF from an ASL
//! series: mask refinement, tissue projection, the basic, outlier-robust and
//! Bayesian estimators, quality control, regional summaries over brain
//! atlases, report figures and derivative sinks. Workflows are plain
//! [`pipeline::Workflow`] values; any [`pipeline::ExecutionEngine`] runs them.

pub mod config;
pub mod filters;
pub mod logging;
pub mod resample;
pub mod stages;
pub mod templates;
pub mod workflows;

pub use config::{CbfSettings, SettingsError};
pub use resample::{AffineResampler, Interpolation, Resampler};
pub use templates::{InMemoryTemplates, TemplateProvider, TemplateRegistry};
pub use workflows::{
    init_asl_cbf_wf, init_cbf_compt_wf, init_cbfplot_wf, init_cbfqc_compt_wf, init_cbfroiquant_wf,
    Collaborators,
};
