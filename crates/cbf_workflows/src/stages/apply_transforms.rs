//! Projection of an image into the grid of a reference mask.

use std::sync::Arc;

use asl_types::{AtlasName, DataError, ImageVolume, LabelMap, Mask, TransformChain};
use pipeline::{GraphError, PortSpec, PortType, PortValues, Stage, StageContext, StageError, Value};
use tracing::debug;

use crate::resample::{Interpolation, Resampler};
use crate::templates::TemplateRegistry;

/// What the projected image holds; decides the port types and which
/// interpolations are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Intensity,
    Mask,
    Labels,
}

impl ImageKind {
    pub fn port_type(self) -> PortType {
        match self {
            ImageKind::Intensity => PortType::Volume,
            ImageKind::Mask => PortType::Mask,
            ImageKind::Labels => PortType::Labels,
        }
    }
}

/// Template images taken from the registry instead of an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateImage {
    Atlas(AtlasName),
    BrainMask,
    CarpetSegmentation,
}

impl TemplateImage {
    pub fn kind(self) -> ImageKind {
        match self {
            TemplateImage::BrainMask => ImageKind::Mask,
            TemplateImage::Atlas(_) | TemplateImage::CarpetSegmentation => ImageKind::Labels,
        }
    }
}

enum Source {
    Port,
    Template(TemplateImage, Arc<TemplateRegistry>),
}

/// Resamples `input_image` onto the grid of `reference_image` through the
/// `transforms` chain.
///
/// Ports: `input_image` (unless a template is configured), `reference_image`
/// (mask), `transforms` (unless the chain is fixed to identity) ->
/// `output_image`.
pub struct ApplyTransforms {
    resampler: Arc<dyn Resampler>,
    kind: ImageKind,
    interpolation: Interpolation,
    source: Source,
    identity_chain: bool,
}

impl ApplyTransforms {
    /// Fails when a blending interpolation is requested for masks or labels.
    pub fn new(
        resampler: Arc<dyn Resampler>,
        kind: ImageKind,
        interpolation: Interpolation,
    ) -> Result<Self, GraphError> {
        if kind != ImageKind::Intensity && !interpolation.preserves_labels() {
            return Err(GraphError::InvalidConfiguration(format!(
                "{:?} interpolation would blend {:?} values",
                interpolation, kind
            )));
        }
        Ok(Self {
            resampler,
            kind,
            interpolation,
            source: Source::Port,
            identity_chain: false,
        })
    }

    /// Projects a registry template; the stage then has no `input_image`.
    pub fn template(
        resampler: Arc<dyn Resampler>,
        registry: Arc<TemplateRegistry>,
        template: TemplateImage,
        interpolation: Interpolation,
    ) -> Result<Self, GraphError> {
        let mut stage = Self::new(resampler, template.kind(), interpolation)?;
        stage.source = Source::Template(template, registry);
        Ok(stage)
    }

    /// Drops the `transforms` port and resamples through the identity.
    pub fn identity_chain(mut self) -> Self {
        self.identity_chain = true;
        self
    }

    fn load_input(&self, inputs: &PortValues) -> Result<ImageVolume, StageError> {
        match &self.source {
            Source::Port => Ok(match self.kind {
                ImageKind::Intensity => (*inputs.volume("input_image")?).clone(),
                ImageKind::Mask => inputs.mask("input_image")?.to_volume(),
                ImageKind::Labels => inputs.labels("input_image")?.to_volume(),
            }),
            Source::Template(template, registry) => Ok(match template {
                TemplateImage::Atlas(name) => registry.atlas(*name)?.template.to_volume(),
                TemplateImage::BrainMask => registry.brain_mask()?.to_volume(),
                TemplateImage::CarpetSegmentation => registry.carpet_segmentation()?.to_volume(),
            }),
        }
    }

    fn to_output(&self, source: &ImageVolume, resampled: ImageVolume) -> Result<Value, DataError> {
        match self.kind {
            ImageKind::Intensity => Ok(Value::volume(resampled)),
            ImageKind::Mask => Ok(Value::mask(Mask::from_volume(&resampled)?)),
            ImageKind::Labels => {
                let known = LabelMap::from_volume(source)?.labels();
                let labels = LabelMap::from_volume(&resampled)?;
                if let Some(&stray) = labels.labels().difference(&known).next() {
                    return Err(DataError::LabelIdentityLost(stray as f32));
                }
                Ok(Value::labels(labels))
            }
        }
    }
}

impl Stage for ApplyTransforms {
    fn kind(&self) -> &'static str {
        "apply_transforms"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        let mut ports = Vec::with_capacity(3);
        if matches!(self.source, Source::Port) {
            ports.push(PortSpec::required("input_image", self.kind.port_type()));
        }
        ports.push(PortSpec::required("reference_image", PortType::Mask));
        if !self.identity_chain {
            ports.push(PortSpec::required("transforms", PortType::Transforms));
        }
        ports
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("output_image", self.kind.port_type())]
    }

    fn run(&self, inputs: &PortValues, ctx: &StageContext<'_>) -> Result<PortValues, StageError> {
        let reference = inputs.mask("reference_image")?.geometry();
        let chain = if self.identity_chain {
            Arc::new(TransformChain::identity())
        } else {
            inputs.transforms("transforms")?
        };
        let image = self.load_input(inputs)?;
        debug!(
            "{}: resampling {} onto {} through {} transform(s)",
            ctx.node,
            image.geometry(),
            reference,
            chain.len()
        );
        let resampled = self
            .resampler
            .resample(&image, &reference, &chain, self.interpolation, 0.0)?;
        Ok(PortValues::new().with("output_image", self.to_output(&image, resampled)?))
    }
}
