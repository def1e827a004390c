//! `OnnxSubgraph` layer: runs an exported sub-network through ONNX Runtime.
//!
//! Config:
//!
//! ```text
//! { "path": "backbone.onnx",          // relative to the model manifest
//!   "output_shape": [54, 128],        // per-example, no batch axis
//!   "input_name": "input",            // optional, defaults to the first input
//!   "output_name": "features" }       // optional, defaults to the first output
//! ```

use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::TensorRef;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use super::{Layer, LayerSpec, LoadContext};
use crate::error::{CryError, Result};

pub const CLASS_NAME: &str = "OnnxSubgraph";

pub struct OnnxSubgraph {
    // Session::run needs &mut.
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    output_shape: Vec<usize>,
}

fn create_session(path: &Path) -> Result<Session> {
    SessionBuilder::new()
        .map_err(|e| CryError::ModelLoad(e.to_string()))?
        .with_intra_threads(1)
        .map_err(|e| CryError::ModelLoad(e.to_string()))?
        .with_inter_threads(1)
        .map_err(|e| CryError::ModelLoad(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| CryError::ModelLoad(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| CryError::ModelLoad(format!("{}: {e}", path.display())))
}

impl OnnxSubgraph {
    pub fn build(spec: &LayerSpec, ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let rel = spec
            .config
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| CryError::ModelLoad(format!("layer '{}': missing 'path'", spec.name)))?;
        let path = ctx.base_dir.join(rel);
        if !path.exists() {
            return Err(CryError::ModelNotFound { path });
        }

        let output_shape: Vec<usize> = spec
            .config
            .get("output_shape")
            .and_then(Value::as_array)
            .and_then(|dims| dims.iter().map(|d| d.as_u64().map(|d| d as usize)).collect())
            .filter(|dims: &Vec<usize>| !dims.is_empty() && !dims.contains(&0))
            .ok_or_else(|| {
                CryError::ModelLoad(format!(
                    "layer '{}': 'output_shape' must be a list of positive integers",
                    spec.name
                ))
            })?;

        let session = create_session(&path)?;
        let input_name = match spec.config.get("input_name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => session
                .inputs()
                .first()
                .map(|i| i.name().to_string())
                .ok_or_else(|| CryError::ModelLoad(format!("{} has no inputs", path.display())))?,
        };
        let output_name = match spec.config.get("output_name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => session
                .outputs()
                .first()
                .map(|o| o.name().to_string())
                .ok_or_else(|| CryError::ModelLoad(format!("{} has no outputs", path.display())))?,
        };

        info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            ?output_shape,
            "ONNX sub-graph loaded"
        );

        Ok(Box::new(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            output_shape,
        }))
    }
}

impl Layer for OnnxSubgraph {
    fn class_name(&self) -> &'static str {
        CLASS_NAME
    }

    fn output_shape(&self, _input: &[usize]) -> Result<Vec<usize>> {
        Ok(self.output_shape.clone())
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut dims: Vec<i64> = Vec::with_capacity(x.ndim() + 1);
        dims.push(1);
        dims.extend(x.shape().iter().map(|&d| d as i64));
        let x = x.as_standard_layout();
        let data = x
            .as_slice()
            .ok_or_else(|| CryError::Inference("sub-graph input not contiguous".into()))?;

        let input = TensorRef::from_array_view((dims, data))
            .map_err(|e| CryError::Inference(e.to_string()))?;
        let inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), SessionInputValue::from(input))];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| CryError::Inference(e.to_string()))?;
        let (_, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| CryError::Inference(e.to_string()))?;

        let expected: usize = self.output_shape.iter().product();
        if values.len() != expected {
            return Err(CryError::Inference(format!(
                "sub-graph produced {} values, declared shape {:?}",
                values.len(),
                self.output_shape
            )));
        }
        ArrayD::from_shape_vec(IxDyn(&self.output_shape), values.to_vec())
            .map_err(|e| CryError::Inference(e.to_string()))
    }
}
