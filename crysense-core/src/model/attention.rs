//! Additive attention pooling over the time axis.
//!
//! For a feature map `x: (T, D)`, a scoring vector `w: (D,)` and a per-step
//! bias `b: (T,)`:
//!
//! ```text
//! e_t = tanh(x_t · w + b_t)
//! a   = softmax_t(e)
//! out = Σ_t a_t · x_t            // (D,)
//! ```
//!
//! The math lives in [`attention_pool`]; [`AttentionLayer`] only captures the
//! trained weights so the registry can hand it to the graph under the name
//! `"AttentionLayer"`.

use ndarray::{Array1, ArrayD, ArrayView1, ArrayView2, Ix2};

use super::{Layer, LayerSpec, LoadContext};
use crate::error::{CryError, Result};

pub const CLASS_NAME: &str = "AttentionLayer";

/// Attention-weighted sum of the rows of `x`.
///
/// `w.len()` must equal `x.ncols()` and `b.len()` must equal `x.nrows()`;
/// callers check this at load time.
pub fn attention_pool(x: ArrayView2<'_, f32>, w: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> Array1<f32> {
    let scores = (x.dot(&w) + &b).mapv(f32::tanh);
    let weights = softmax(scores);
    weights.dot(&x)
}

/// Per-step attention weights, exposed for diagnostics and tests.
pub fn attention_weights(x: ArrayView2<'_, f32>, w: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> Array1<f32> {
    softmax((x.dot(&w) + &b).mapv(f32::tanh))
}

fn softmax(mut v: Array1<f32>) -> Array1<f32> {
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    v.mapv_inplace(|e| (e - max).exp());
    let sum = v.sum();
    if sum > 0.0 {
        v /= sum;
    }
    v
}

pub struct AttentionLayer {
    w: Array1<f32>,
    b: Array1<f32>,
}

impl AttentionLayer {
    pub fn new(w: Array1<f32>, b: Array1<f32>) -> Self {
        Self { w, b }
    }

    /// Registry builder. Expects `att_weight: (D, 1)` and `att_bias: (T, 1)`.
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let w = column(spec, "att_weight")?;
        let b = column(spec, "att_bias")?;
        Ok(Box::new(Self::new(w, b)))
    }
}

fn column(spec: &LayerSpec, key: &str) -> Result<Array1<f32>> {
    let t = spec.weight(key)?;
    match t.shape() {
        [_, 1] | [_] => Ok(Array1::from_iter(t.iter().copied())),
        other => Err(CryError::ModelLoad(format!(
            "layer '{}': {key} must be (n, 1), got {other:?}",
            spec.name
        ))),
    }
}

impl Layer for AttentionLayer {
    fn class_name(&self) -> &'static str {
        CLASS_NAME
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input {
            [t, d] if *d == self.w.len() && *t == self.b.len() => Ok(vec![*d]),
            _ => Err(CryError::ModelLoad(format!(
                "expects ({}, {}) input, got {input:?}",
                self.b.len(),
                self.w.len()
            ))),
        }
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x
            .into_dimensionality::<Ix2>()
            .map_err(|e| CryError::Inference(format!("attention input: {e}")))?;
        Ok(attention_pool(x.view(), self.w.view(), self.b.view()).into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn output_is_convex_combination_of_rows() {
        let x = array![[1.0f32, -2.0], [3.0, 0.5], [-1.0, 4.0]];
        let w = array![0.3f32, -0.7];
        let b = array![0.1f32, 0.0, -0.2];

        let a = attention_weights(x.view(), w.view(), b.view());
        assert_relative_eq!(a.sum(), 1.0, epsilon = 1e-6);
        assert!(a.iter().all(|v| *v > 0.0));

        let out = attention_pool(x.view(), w.view(), b.view());
        for d in 0..2 {
            let col = x.column(d);
            let lo = col.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = col.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            assert!(out[d] >= lo && out[d] <= hi);
            let expected: f32 = (0..3).map(|t| a[t] * x[[t, d]]).sum();
            assert_relative_eq!(out[d], expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn zero_weights_average_uniformly() {
        let x = array![[2.0f32, 0.0], [4.0, 6.0]];
        let out = attention_pool(x.view(), array![0.0f32, 0.0].view(), array![0.0f32, 0.0].view());
        assert_relative_eq!(out[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn bias_shifts_focus_to_a_step() {
        let x = array![[1.0f32], [0.0]];
        let out = attention_pool(x.view(), array![0.0f32].view(), array![5.0f32, -5.0].view());
        let e = 5.0f32.tanh();
        let expected = e.exp() / (e.exp() + (-e).exp());
        assert_relative_eq!(out[0], expected, epsilon = 1e-6);
        assert!(out[0] > 0.88 && out[0] < 0.881);
    }

    #[test]
    fn layer_checks_time_and_feature_dims() {
        let layer = AttentionLayer::new(array![1.0, 1.0, 1.0], array![0.0, 0.0]);
        assert_eq!(layer.output_shape(&[2, 3]).unwrap(), vec![3]);
        assert!(layer.output_shape(&[3, 3]).is_err());
        assert!(layer.output_shape(&[2, 3, 1]).is_err());
    }
}
