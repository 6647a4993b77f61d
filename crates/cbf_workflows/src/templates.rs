//! Standard-space templates: atlases, the template brain mask and the
//! carpet-plot segmentation.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use asl_types::{AtlasDefinition, AtlasName, LabelMap, Mask};
use once_cell::sync::OnceCell;
use tracing::debug;

/// Source of template data. Implementations may read from disk or a
/// template store; the registry calls each method at most once per item.
pub trait TemplateProvider: Send + Sync {
    fn atlas(&self, name: AtlasName) -> Result<AtlasDefinition>;

    fn brain_mask(&self) -> Result<Mask>;

    fn carpet_segmentation(&self) -> Result<LabelMap>;
}

/// Provider backed by values already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplates {
    atlases: BTreeMap<AtlasName, AtlasDefinition>,
    brain_mask: Option<Mask>,
    carpet: Option<LabelMap>,
}

impl InMemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_atlas(mut self, atlas: AtlasDefinition) -> Self {
        self.atlases.insert(atlas.name, atlas);
        self
    }

    pub fn with_brain_mask(mut self, mask: Mask) -> Self {
        self.brain_mask = Some(mask);
        self
    }

    pub fn with_carpet_segmentation(mut self, labels: LabelMap) -> Self {
        self.carpet = Some(labels);
        self
    }
}

impl TemplateProvider for InMemoryTemplates {
    fn atlas(&self, name: AtlasName) -> Result<AtlasDefinition> {
        self.atlases
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("atlas {} is not available", name))
    }

    fn brain_mask(&self) -> Result<Mask> {
        self.brain_mask
            .clone()
            .ok_or_else(|| anyhow!("template brain mask is not available"))
    }

    fn carpet_segmentation(&self) -> Result<LabelMap> {
        self.carpet
            .clone()
            .ok_or_else(|| anyhow!("carpet segmentation is not available"))
    }
}

/// Lazily loaded, read-only view over a [`TemplateProvider`].
///
/// Built once per process and shared by `Arc` with every stage that needs a
/// template. Items are loaded on first use; a failed load is retried by the
/// next caller.
pub struct TemplateRegistry {
    provider: Box<dyn TemplateProvider>,
    atlases: BTreeMap<AtlasName, OnceCell<Arc<AtlasDefinition>>>,
    brain_mask: OnceCell<Arc<Mask>>,
    carpet: OnceCell<Arc<LabelMap>>,
}

impl TemplateRegistry {
    pub fn new(provider: impl TemplateProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            atlases: AtlasName::ALL.iter().map(|&a| (a, OnceCell::new())).collect(),
            brain_mask: OnceCell::new(),
            carpet: OnceCell::new(),
        }
    }

    pub fn atlas(&self, name: AtlasName) -> Result<Arc<AtlasDefinition>> {
        let cell = self
            .atlases
            .get(&name)
            .ok_or_else(|| anyhow!("atlas {} is not registered", name))?;
        cell.get_or_try_init(|| {
            debug!("Loading atlas {}", name);
            let atlas = self.provider.atlas(name)?;
            if atlas.name != name {
                return Err(anyhow!("provider returned atlas {} for {}", atlas.name, name));
            }
            Ok(Arc::new(atlas))
        })
        .cloned()
    }

    pub fn brain_mask(&self) -> Result<Arc<Mask>> {
        self.brain_mask
            .get_or_try_init(|| {
                debug!("Loading template brain mask");
                self.provider.brain_mask().map(Arc::new)
            })
            .cloned()
    }

    pub fn carpet_segmentation(&self) -> Result<Arc<LabelMap>> {
        self.carpet
            .get_or_try_init(|| {
                debug!("Loading carpet segmentation");
                self.provider.carpet_segmentation().map(Arc::new)
            })
            .cloned()
    }
}
