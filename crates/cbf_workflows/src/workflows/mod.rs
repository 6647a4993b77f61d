//! Workflow builders.
//!
//! Each builder returns an unfinalized [`pipeline::Workflow`] so it can be
//! nested into a parent or finalized and run on its own.

mod asl_cbf;
mod cbf;
mod plot;
mod qc;
mod roiquant;

use std::sync::Arc;

pub use asl_cbf::init_asl_cbf_wf;
pub use cbf::init_cbf_compt_wf;
pub use plot::init_cbfplot_wf;
pub use qc::init_cbfqc_compt_wf;
pub use roiquant::{init_cbfroiquant_wf, roi_port};

use asl_types::TissueClass;
use pipeline::{GraphError, NodeHandle, Selector, Workflow};

use crate::resample::{AffineResampler, Interpolation, Resampler};
use crate::stages::{ApplyTransforms, DerivativeSink, FigureRenderer, ImageKind, PgmRenderer};
use crate::templates::TemplateRegistry;

/// External collaborators shared by every workflow of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub resampler: Arc<dyn Resampler>,
    pub templates: Arc<TemplateRegistry>,
    pub sink: Arc<dyn DerivativeSink>,
    pub renderer: Arc<dyn FigureRenderer>,
}

impl Collaborators {
    /// Uses the affine resampler and the PGM renderer.
    pub fn new(templates: Arc<TemplateRegistry>, sink: Arc<dyn DerivativeSink>) -> Self {
        Self {
            resampler: Arc::new(AffineResampler),
            templates,
            sink,
            renderer: Arc::new(PgmRenderer::default()),
        }
    }

    pub fn with_resampler(mut self, resampler: Arc<dyn Resampler>) -> Self {
        self.resampler = resampler;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn FigureRenderer>) -> Self {
        self.renderer = renderer;
        self
    }
}

/// Projection nodes of the three tissue maps, keyed by tissue.
pub(crate) struct TissueNodes {
    pub grey: NodeHandle,
    pub white: NodeHandle,
    pub csf: NodeHandle,
}

impl TissueNodes {
    pub fn get(&self, class: TissueClass) -> NodeHandle {
        match class {
            TissueClass::Grey => self.grey,
            TissueClass::White => self.white,
            TissueClass::Csf => self.csf,
        }
    }
}

/// Adds `gm_tfm`, `wm_tfm` and `csf_tfm`, each fed one field of the tissue
/// maps on `inputnode.tpms`, projected onto `inputnode.reference` through
/// `inputnode.xform` with nearest-neighbour interpolation.
pub(crate) fn add_tissue_projection(
    wf: &mut Workflow,
    collab: &Collaborators,
    tpms: &str,
    reference: &str,
    xform: &str,
) -> Result<TissueNodes, GraphError> {
    let inputnode = wf.inputnode();
    let mut node = |class: TissueClass| -> Result<NodeHandle, GraphError> {
        let stage = ApplyTransforms::new(
            collab.resampler.clone(),
            ImageKind::Intensity,
            Interpolation::NearestNeighbor,
        )?;
        let tfm = wf.add_node(&format!("{}_tfm", class.short_name()), stage)?;
        wf.connect_with(inputnode, tpms, tfm, "input_image", Selector::tissue(class))?;
        wf.connect(inputnode, reference, tfm, "reference_image")?;
        wf.connect(inputnode, xform, tfm, "transforms")?;
        Ok(tfm)
    };
    Ok(TissueNodes {
        grey: node(TissueClass::Grey)?,
        white: node(TissueClass::White)?,
        csf: node(TissueClass::Csf)?,
    })
}
