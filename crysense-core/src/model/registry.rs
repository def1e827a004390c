//! Name → layer builder resolution.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{attention, layers, Layer, LayerSpec};
use crate::error::Result;

/// Builds a layer from its manifest entry.
pub type LayerBuilder = fn(&LayerSpec, &LoadContext) -> Result<Box<dyn Layer>>;

/// Information a builder may need beyond its own manifest entry.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    /// Directory of the model manifest; relative artifact paths resolve here.
    pub base_dir: PathBuf,
}

/// Maps `class_name` strings from the manifest to builders.
///
/// [`LayerRegistry::default`] knows the built-in layers plus the custom
/// `AttentionLayer`. [`LayerRegistry::with_builtins`] leaves the custom
/// layer out, which is what a runtime without the custom object looks like.
#[derive(Clone)]
pub struct LayerRegistry {
    builders: BTreeMap<String, LayerBuilder>,
}

impl LayerRegistry {
    /// Registry with no entries.
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Standard layers only.
    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.register("Conv2D", layers::Conv2D::build);
        r.register("MaxPooling2D", layers::MaxPooling2D::build);
        r.register("BatchNormalization", layers::BatchNormalization::build);
        r.register("Activation", layers::ActivationLayer::build);
        r.register("Dropout", layers::Dropout::build);
        r.register("Permute", layers::Permute::build);
        r.register("Reshape", layers::Reshape::build);
        r.register("Flatten", layers::Flatten::build);
        r.register("Dense", layers::Dense::build);
        r.register("GlobalAveragePooling1D", layers::GlobalAveragePooling1D::build);
        #[cfg(feature = "onnx")]
        r.register(super::onnx::CLASS_NAME, super::onnx::OnnxSubgraph::build);
        r
    }

    /// Add or replace a builder.
    pub fn register(&mut self, class_name: &str, builder: LayerBuilder) -> &mut Self {
        self.builders.insert(class_name.to_string(), builder);
        self
    }

    pub fn resolve(&self, class_name: &str) -> Option<LayerBuilder> {
        self.builders.get(class_name).copied()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.builders.contains_key(class_name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        let mut r = Self::with_builtins();
        r.register(attention::CLASS_NAME, attention::AttentionLayer::build);
        r
    }
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("classes", &self.names())
            .finish()
    }
}
