//! Persisted classifier graph.
//!
//! A model artifact is a JSON manifest:
//!
//! ```text
//! {
//!   "format": "crysense-graph",
//!   "version": 1,
//!   "input_shape": [128, 216, 1],
//!   "layers": [
//!     { "class_name": "Conv2D", "name": "conv_1",
//!       "config": { "filters": 16, "kernel_size": [3, 3], "padding": "same", "activation": "relu" },
//!       "weights": { "kernel": { "shape": [3, 3, 1, 16], "data": [...] },
//!                    "bias":   { "shape": [16], "data": [...] } } },
//!     ...
//!     { "class_name": "AttentionLayer", "name": "attention", "weights": { ... } },
//!     { "class_name": "Dense", "name": "output", "config": { "units": 5, "activation": "softmax" }, ... }
//!   ]
//! }
//! ```
//!
//! Layers name their computation symbolically through `class_name`. Loading
//! resolves every name through a [`LayerRegistry`]; a name the registry does
//! not know fails the load. Shapes are checked at load time by walking
//! `input_shape` through every layer, so a model that loads is a model whose
//! forward pass is shape-consistent.
//!
//! Tensors inside the graph carry no batch axis and are channels-last.

pub mod attention;
pub mod layers;
pub mod registry;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use registry::{LayerBuilder, LayerRegistry, LoadContext};

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array2, ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CryError, Result};

pub const MODEL_FORMAT: &str = "crysense-graph";
pub const MODEL_VERSION: u32 = 1;

// ── Manifest ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub format: String,
    pub version: u32,
    /// Per-example input shape (no batch axis).
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub class_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub weights: BTreeMap<String, WeightTensor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl WeightTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn to_array(&self) -> Result<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone()).map_err(|e| {
            CryError::ModelLoad(format!(
                "weight shape {:?} does not fit {} values: {e}",
                self.shape,
                self.data.len()
            ))
        })
    }
}

impl ModelFile {
    pub fn new(input_shape: Vec<usize>, layers: Vec<LayerSpec>) -> Self {
        Self {
            format: MODEL_FORMAT.into(),
            version: MODEL_VERSION,
            input_shape,
            layers,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json =
            serde_json::to_string(self).map_err(|e| CryError::Other(anyhow::anyhow!(e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl LayerSpec {
    pub fn new(class_name: &str, name: &str) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            config: serde_json::Value::Null,
            weights: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_weight(mut self, key: &str, shape: Vec<usize>, data: Vec<f32>) -> Self {
        self.weights
            .insert(key.into(), WeightTensor::new(shape, data));
        self
    }

    /// Required weight tensor.
    pub fn weight(&self, key: &str) -> Result<ArrayD<f32>> {
        self.weights
            .get(key)
            .ok_or_else(|| {
                CryError::ModelLoad(format!(
                    "layer '{}' ({}) is missing weight '{key}'",
                    self.name, self.class_name
                ))
            })?
            .to_array()
    }

    /// Optional weight tensor.
    pub fn weight_opt(&self, key: &str) -> Result<Option<ArrayD<f32>>> {
        self.weights.get(key).map(WeightTensor::to_array).transpose()
    }
}

// ── Layer contract ───────────────────────────────────────────────────────────

/// A single computation in the graph.
pub trait Layer: Send + Sync {
    /// Registry name this layer was built from.
    fn class_name(&self) -> &'static str;

    /// Static shape inference: per-example input shape → output shape.
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>>;

    /// Run one example through the layer.
    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>>;
}

struct NamedLayer {
    name: String,
    layer: Box<dyn Layer>,
    output_shape: Vec<usize>,
}

/// Row of [`GraphModel::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub class_name: String,
    pub output_shape: Vec<usize>,
}

// ── GraphModel ───────────────────────────────────────────────────────────────

/// Loaded, shape-checked, immutable classifier graph.
pub struct GraphModel {
    input_shape: Vec<usize>,
    layers: Vec<NamedLayer>,
    output_width: usize,
}

impl GraphModel {
    /// Load a manifest from disk, resolving layer classes through `registry`.
    ///
    /// # Errors
    /// `ModelNotFound` if the file is absent, `ModelLoad` if it is corrupt,
    /// names an unknown layer class, or is shape-inconsistent.
    pub fn load(path: impl AsRef<Path>, registry: &LayerRegistry) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CryError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / 1_048_576.0)
            .unwrap_or(0.0);
        info!("=== CrySense Model Startup Report ===");
        info!("  path: {:?}", path);
        info!("  size: {:.2} MB", size_mb);

        let raw = std::fs::read_to_string(path)
            .map_err(|e| CryError::ModelLoad(format!("read {}: {e}", path.display())))?;
        let file: ModelFile = serde_json::from_str(&raw)
            .map_err(|e| CryError::ModelLoad(format!("parse {}: {e}", path.display())))?;

        let ctx = LoadContext {
            base_dir: path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        let model = Self::from_file(file, &ctx, registry)?;

        info!("  layers: {}", model.layers.len());
        info!("  input: {:?}", model.input_shape);
        info!("  classes: {}", model.output_width);
        info!("=== CrySense model ready ===");
        Ok(model)
    }

    /// Build from an in-memory manifest.
    pub fn from_file(file: ModelFile, ctx: &LoadContext, registry: &LayerRegistry) -> Result<Self> {
        if file.format != MODEL_FORMAT {
            return Err(CryError::ModelLoad(format!(
                "unsupported model format '{}' (expected '{MODEL_FORMAT}')",
                file.format
            )));
        }
        if file.version != MODEL_VERSION {
            return Err(CryError::ModelLoad(format!(
                "unsupported model version {} (expected {MODEL_VERSION})",
                file.version
            )));
        }
        if file.input_shape.is_empty() || file.input_shape.contains(&0) {
            return Err(CryError::ModelLoad(format!(
                "invalid input shape {:?}",
                file.input_shape
            )));
        }
        if file.layers.is_empty() {
            return Err(CryError::ModelLoad("model has no layers".into()));
        }

        let mut shape = file.input_shape.clone();
        let mut layers = Vec::with_capacity(file.layers.len());
        for (i, spec) in file.layers.iter().enumerate() {
            let name = if spec.name.is_empty() {
                format!("{}_{i}", spec.class_name.to_ascii_lowercase())
            } else {
                spec.name.clone()
            };
            let builder = registry.resolve(&spec.class_name).ok_or_else(|| {
                CryError::ModelLoad(format!(
                    "layer '{name}' references unknown class '{}'; registered: {:?}",
                    spec.class_name,
                    registry.names()
                ))
            })?;
            let layer = builder(spec, ctx)?;
            shape = layer.output_shape(&shape).map_err(|e| {
                CryError::ModelLoad(format!("layer '{name}' ({}): {e}", spec.class_name))
            })?;
            debug!(layer = %name, class = spec.class_name, ?shape, "layer resolved");
            layers.push(NamedLayer {
                name,
                layer,
                output_shape: shape.clone(),
            });
        }

        let output_width = match shape.as_slice() {
            [n] if *n > 0 => *n,
            other => {
                return Err(CryError::ModelLoad(format!(
                    "model must end in a 1-D class vector, got shape {other:?}"
                )))
            }
        };

        Ok(Self {
            input_shape: file.input_shape,
            layers,
            output_width,
        })
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Number of classes the graph scores.
    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn summary(&self) -> Vec<LayerSummary> {
        self.layers
            .iter()
            .map(|l| LayerSummary {
                name: l.name.clone(),
                class_name: l.layer.class_name().to_string(),
                output_shape: l.output_shape.clone(),
            })
            .collect()
    }

    /// Run a batch `(N, input_shape…)` and return `(N, classes)` scores.
    pub fn forward(&self, batch: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
        let shape = batch.shape();
        if shape.len() != self.input_shape.len() + 1 || shape[1..] != self.input_shape[..] {
            return Err(CryError::Inference(format!(
                "input shape {shape:?} does not match (N, {:?})",
                self.input_shape
            )));
        }

        let n = shape[0];
        let mut out = Array2::<f32>::zeros((n, self.output_width));
        for (i, example) in batch.axis_iter(Axis(0)).enumerate() {
            let mut x = example.to_owned();
            for l in &self.layers {
                x = l.layer.forward(x).map_err(|e| match e {
                    CryError::Inference(msg) => {
                        CryError::Inference(format!("layer '{}': {msg}", l.name))
                    }
                    other => other,
                })?;
            }
            if x.len() != self.output_width {
                return Err(CryError::Inference(format!(
                    "graph produced {} scores, expected {}",
                    x.len(),
                    self.output_width
                )));
            }
            for (dst, v) in out.row_mut(i).iter_mut().zip(x.iter()) {
                *dst = *v;
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for GraphModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphModel")
            .field("input_shape", &self.input_shape)
            .field("layers", &self.layers.len())
            .field("output_width", &self.output_width)
            .finish()
    }
}
