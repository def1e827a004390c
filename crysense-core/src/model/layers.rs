//! Built-in layers.
//!
//! Every layer works on a single example, channels-last, without the batch
//! axis. Weight names and config keys follow the usual Keras export names
//! (`kernel`, `bias`, `gamma`, `beta`, `moving_mean`, `moving_variance`,
//! `filters`, `kernel_size`, `strides`, `padding`, `activation`, …).

use ndarray::{Array1, Array2, Array3, ArrayD, Axis, Ix1, Ix2, Ix4, IxDyn};
use serde_json::Value;

use super::{Layer, LayerSpec, LoadContext};
use crate::error::{CryError, Result};

// ── Config helpers ───────────────────────────────────────────────────────────

fn load_err(spec: &LayerSpec, msg: impl std::fmt::Display) -> CryError {
    CryError::ModelLoad(format!("layer '{}' ({}): {msg}", spec.name, spec.class_name))
}

fn cfg_usize(spec: &LayerSpec, key: &str) -> Result<Option<usize>> {
    match spec.config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| load_err(spec, format!("'{key}' must be a non-negative integer"))),
    }
}

/// `3` or `[3, 3]` style pair.
fn cfg_pair(spec: &LayerSpec, key: &str) -> Result<Option<[usize; 2]>> {
    match spec.config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|&n| n > 0)
            .map(|n| Some([n as usize, n as usize]))
            .ok_or_else(|| load_err(spec, format!("'{key}' must be positive"))),
        Some(Value::Array(items)) => match items.as_slice() {
            [a, b] => match (a.as_u64(), b.as_u64()) {
                (Some(a), Some(b)) if a > 0 && b > 0 => Ok(Some([a as usize, b as usize])),
                _ => Err(load_err(spec, format!("'{key}' must hold positive integers"))),
            },
            _ => Err(load_err(spec, format!("'{key}' must have two entries"))),
        },
        Some(_) => Err(load_err(spec, format!("'{key}' must be an integer or a pair"))),
    }
}

fn cfg_str<'a>(spec: &'a LayerSpec, key: &str) -> Option<&'a str> {
    spec.config.get(key).and_then(Value::as_str)
}

fn cfg_bool(spec: &LayerSpec, key: &str, default: bool) -> bool {
    spec.config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn cfg_f32(spec: &LayerSpec, key: &str, default: f32) -> f32 {
    spec.config
        .get(key)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(default)
}

fn vector(spec: &LayerSpec, key: &str, len: usize) -> Result<Array1<f32>> {
    let t = spec
        .weight(key)?
        .into_dimensionality::<Ix1>()
        .map_err(|_| load_err(spec, format!("'{key}' must be 1-D")))?;
    if t.len() != len {
        return Err(load_err(
            spec,
            format!("'{key}' has {} entries, expected {len}", t.len()),
        ));
    }
    Ok(t)
}

fn inference_err(what: &str, e: impl std::fmt::Display) -> CryError {
    CryError::Inference(format!("{what}: {e}"))
}

fn shape_err(expected: impl std::fmt::Display, got: &[usize]) -> CryError {
    CryError::ModelLoad(format!("expects {expected} input, got {got:?}"))
}

// ── Activation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Tanh,
    Sigmoid,
    /// Over the last axis.
    Softmax,
}

impl Activation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "linear" | "" => Some(Self::Linear),
            "relu" => Some(Self::Relu),
            "tanh" => Some(Self::Tanh),
            "sigmoid" => Some(Self::Sigmoid),
            "softmax" => Some(Self::Softmax),
            _ => None,
        }
    }

    fn from_spec(spec: &LayerSpec) -> Result<Self> {
        let name = cfg_str(spec, "activation").unwrap_or("linear");
        Self::parse(name).ok_or_else(|| load_err(spec, format!("unsupported activation '{name}'")))
    }

    pub fn apply(self, mut x: ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Self::Linear => {}
            Self::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Self::Tanh => x.mapv_inplace(f32::tanh),
            Self::Sigmoid => x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
            Self::Softmax => {
                if x.ndim() == 0 {
                    return x;
                }
                let last = Axis(x.ndim() - 1);
                for mut lane in x.lanes_mut(last) {
                    let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    lane.mapv_inplace(|v| (v - max).exp());
                    let sum = lane.sum();
                    if sum > 0.0 {
                        lane /= sum;
                    }
                }
            }
        }
        x
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    Valid,
    Same,
}

impl Padding {
    fn from_spec(spec: &LayerSpec) -> Result<Self> {
        match cfg_str(spec, "padding").unwrap_or("valid") {
            "valid" => Ok(Self::Valid),
            "same" => Ok(Self::Same),
            other => Err(load_err(spec, format!("unsupported padding '{other}'"))),
        }
    }

    /// `(output_len, pad_before)` for one spatial axis.
    fn window(self, input: usize, k: usize, s: usize) -> Option<(usize, usize)> {
        match self {
            Self::Valid => (input >= k).then(|| ((input - k) / s + 1, 0)),
            Self::Same => {
                let out = input.div_ceil(s);
                if out == 0 {
                    return None;
                }
                let total = ((out - 1) * s + k).saturating_sub(input);
                Some((out, total / 2))
            }
        }
    }
}

// ── Conv2D ───────────────────────────────────────────────────────────────────

pub struct Conv2D {
    /// Row-major `(kh, kw, cin, cout)`.
    kernel: Vec<f32>,
    dims: [usize; 4],
    bias: Option<Array1<f32>>,
    strides: [usize; 2],
    padding: Padding,
    activation: Activation,
}

impl Conv2D {
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let kernel = spec
            .weight("kernel")?
            .into_dimensionality::<Ix4>()
            .map_err(|_| load_err(spec, "kernel must be (kh, kw, cin, cout)"))?;
        let (kh, kw, cin, cout) = kernel.dim();
        if let Some(filters) = cfg_usize(spec, "filters")? {
            if filters != cout {
                return Err(load_err(
                    spec,
                    format!("filters={filters} but kernel has {cout} outputs"),
                ));
            }
        }
        if let Some(ks) = cfg_pair(spec, "kernel_size")? {
            if ks != [kh, kw] {
                return Err(load_err(
                    spec,
                    format!("kernel_size={ks:?} but kernel is {kh}x{kw}"),
                ));
            }
        }
        let bias = if cfg_bool(spec, "use_bias", true) {
            Some(vector(spec, "bias", cout)?)
        } else {
            None
        };

        Ok(Box::new(Self {
            kernel: kernel.iter().copied().collect(),
            dims: [kh, kw, cin, cout],
            bias,
            strides: cfg_pair(spec, "strides")?.unwrap_or([1, 1]),
            padding: Padding::from_spec(spec)?,
            activation: Activation::from_spec(spec)?,
        }))
    }

    fn geometry(&self, h: usize, w: usize) -> Option<[(usize, usize); 2]> {
        let [kh, kw, _, _] = self.dims;
        Some([
            self.padding.window(h, kh, self.strides[0])?,
            self.padding.window(w, kw, self.strides[1])?,
        ])
    }
}

impl Layer for Conv2D {
    fn class_name(&self) -> &'static str {
        "Conv2D"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let [_, _, cin, cout] = self.dims;
        match input {
            [h, w, c] if *c == cin => {
                let [(oh, _), (ow, _)] = self
                    .geometry(*h, *w)
                    .ok_or_else(|| shape_err("input at least as large as the kernel", input))?;
                Ok(vec![oh, ow, cout])
            }
            _ => Err(shape_err(format!("(H, W, {cin})"), input)),
        }
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let [kh, kw, cin, cout] = self.dims;
        let x = x
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| inference_err("Conv2D input", e))?;
        let (h, w, c) = x.dim();
        if c != cin {
            return Err(CryError::Inference(format!(
                "Conv2D expects {cin} channels, got {c}"
            )));
        }
        let [(oh, pad_t), (ow, pad_l)] = self
            .geometry(h, w)
            .ok_or_else(|| CryError::Inference(format!("Conv2D input {h}x{w} too small")))?;

        let x = x.as_standard_layout();
        let xs = x
            .as_slice()
            .ok_or_else(|| CryError::Inference("Conv2D input not contiguous".into()))?;
        let [sy, sx] = self.strides;
        let mut out = vec![0.0f32; oh * ow * cout];

        for oy in 0..oh {
            for ox in 0..ow {
                let o = &mut out[(oy * ow + ox) * cout..(oy * ow + ox + 1) * cout];
                if let Some(bias) = &self.bias {
                    for (dst, b) in o.iter_mut().zip(bias.iter()) {
                        *dst = *b;
                    }
                }
                for ky in 0..kh {
                    let Some(iy) = (oy * sy + ky).checked_sub(pad_t).filter(|&iy| iy < h) else {
                        continue;
                    };
                    for kx in 0..kw {
                        let Some(ix) = (ox * sx + kx).checked_sub(pad_l).filter(|&ix| ix < w)
                        else {
                            continue;
                        };
                        let xbase = (iy * w + ix) * cin;
                        let kbase = (ky * kw + kx) * cin * cout;
                        for ci in 0..cin {
                            let xv = xs[xbase + ci];
                            let krow = &self.kernel[kbase + ci * cout..kbase + (ci + 1) * cout];
                            for (dst, k) in o.iter_mut().zip(krow) {
                                *dst += xv * k;
                            }
                        }
                    }
                }
            }
        }

        let y = Array3::from_shape_vec((oh, ow, cout), out)
            .map_err(|e| inference_err("Conv2D output", e))?;
        Ok(self.activation.apply(y.into_dyn()))
    }
}

// ── MaxPooling2D ─────────────────────────────────────────────────────────────

pub struct MaxPooling2D {
    pool: [usize; 2],
    strides: [usize; 2],
    padding: Padding,
}

impl MaxPooling2D {
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let pool = cfg_pair(spec, "pool_size")?.unwrap_or([2, 2]);
        Ok(Box::new(Self {
            pool,
            strides: cfg_pair(spec, "strides")?.unwrap_or(pool),
            padding: Padding::from_spec(spec)?,
        }))
    }

    fn geometry(&self, h: usize, w: usize) -> Option<[(usize, usize); 2]> {
        Some([
            self.padding.window(h, self.pool[0], self.strides[0])?,
            self.padding.window(w, self.pool[1], self.strides[1])?,
        ])
    }
}

impl Layer for MaxPooling2D {
    fn class_name(&self) -> &'static str {
        "MaxPooling2D"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input {
            [h, w, c] => {
                let [(oh, _), (ow, _)] = self
                    .geometry(*h, *w)
                    .ok_or_else(|| shape_err("input at least as large as the pool", input))?;
                Ok(vec![oh, ow, *c])
            }
            _ => Err(shape_err("(H, W, C)", input)),
        }
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = x
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| inference_err("MaxPooling2D input", e))?;
        let (h, w, c) = x.dim();
        let [(oh, pad_t), (ow, pad_l)] = self
            .geometry(h, w)
            .ok_or_else(|| CryError::Inference(format!("MaxPooling2D input {h}x{w} too small")))?;
        let [ph, pw] = self.pool;
        let [sy, sx] = self.strides;

        let mut out = Array3::<f32>::from_elem((oh, ow, c), f32::NEG_INFINITY);
        for oy in 0..oh {
            for ox in 0..ow {
                for ky in 0..ph {
                    let Some(iy) = (oy * sy + ky).checked_sub(pad_t).filter(|&iy| iy < h) else {
                        continue;
                    };
                    for kx in 0..pw {
                        let Some(ix) = (ox * sx + kx).checked_sub(pad_l).filter(|&ix| ix < w)
                        else {
                            continue;
                        };
                        for ch in 0..c {
                            let v = x[[iy, ix, ch]];
                            let dst = &mut out[[oy, ox, ch]];
                            if v > *dst {
                                *dst = v;
                            }
                        }
                    }
                }
            }
        }
        Ok(out.into_dyn())
    }
}

// ── BatchNormalization ───────────────────────────────────────────────────────

/// Inference-time batch norm folded to `x * scale + shift` on the last axis.
pub struct BatchNormalization {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNormalization {
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let mean = spec
            .weight("moving_mean")?
            .into_dimensionality::<Ix1>()
            .map_err(|_| load_err(spec, "moving_mean must be 1-D"))?;
        let n = mean.len();
        let var = vector(spec, "moving_variance", n)?;
        let gamma = match spec.weight_opt("gamma")? {
            Some(_) => vector(spec, "gamma", n)?,
            None => Array1::ones(n),
        };
        let beta = match spec.weight_opt("beta")? {
            Some(_) => vector(spec, "beta", n)?,
            None => Array1::zeros(n),
        };
        let eps = cfg_f32(spec, "epsilon", 1e-3);

        let scale = &gamma / &var.mapv(|v| (v + eps).sqrt());
        let shift = &beta - &(&mean * &scale);
        Ok(Box::new(Self { scale, shift }))
    }
}

impl Layer for BatchNormalization {
    fn class_name(&self) -> &'static str {
        "BatchNormalization"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input.last() {
            Some(&c) if c == self.scale.len() => Ok(input.to_vec()),
            _ => Err(shape_err(format!("(…, {})", self.scale.len()), input)),
        }
    }

    fn forward(&self, mut x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let last = x.ndim().checked_sub(1).map(Axis).ok_or_else(|| {
            CryError::Inference("BatchNormalization on a scalar".into())
        })?;
        for mut lane in x.lanes_mut(last) {
            for ((v, s), b) in lane.iter_mut().zip(&self.scale).zip(&self.shift) {
                *v = *v * s + b;
            }
        }
        Ok(x)
    }
}

// ── Shape-only layers ────────────────────────────────────────────────────────

pub struct ActivationLayer(Activation);

impl ActivationLayer {
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        if cfg_str(spec, "activation").is_none() {
            return Err(load_err(spec, "missing 'activation'"));
        }
        Ok(Box::new(Self(Activation::from_spec(spec)?)))
    }
}

impl Layer for ActivationLayer {
    fn class_name(&self) -> &'static str {
        "Activation"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(input.to_vec())
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(self.0.apply(x))
    }
}

/// Identity at inference time.
pub struct Dropout;

impl Dropout {
    pub fn build(_spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        Ok(Box::new(Self))
    }
}

impl Layer for Dropout {
    fn class_name(&self) -> &'static str {
        "Dropout"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(input.to_vec())
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(x)
    }
}

/// Axis permutation; `dims` is 1-based like the exported config.
pub struct Permute {
    axes: Vec<usize>,
}

impl Permute {
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let dims: Vec<usize> = spec
            .config
            .get("dims")
            .and_then(Value::as_array)
            .ok_or_else(|| load_err(spec, "missing 'dims'"))?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize))
            .collect::<Option<_>>()
            .ok_or_else(|| load_err(spec, "'dims' must be integers"))?;
        let mut sorted = dims.clone();
        sorted.sort_unstable();
        if sorted != (1..=dims.len()).collect::<Vec<_>>() {
            return Err(load_err(spec, format!("'dims' {dims:?} is not a permutation")));
        }
        Ok(Box::new(Self {
            axes: dims.iter().map(|d| d - 1).collect(),
        }))
    }
}

impl Layer for Permute {
    fn class_name(&self) -> &'static str {
        "Permute"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        if input.len() != self.axes.len() {
            return Err(shape_err(format!("rank {}", self.axes.len()), input));
        }
        Ok(self.axes.iter().map(|&a| input[a]).collect())
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if x.ndim() != self.axes.len() {
            return Err(CryError::Inference(format!(
                "Permute expects rank {}, got {}",
                self.axes.len(),
                x.ndim()
            )));
        }
        Ok(x.permuted_axes(IxDyn(&self.axes))
            .as_standard_layout()
            .into_owned())
    }
}

/// Reshape to `target_shape`; one entry may be `-1`.
pub struct Reshape {
    target: Vec<i64>,
}

impl Reshape {
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let target: Vec<i64> = spec
            .config
            .get("target_shape")
            .and_then(Value::as_array)
            .ok_or_else(|| load_err(spec, "missing 'target_shape'"))?
            .iter()
            .map(Value::as_i64)
            .collect::<Option<_>>()
            .ok_or_else(|| load_err(spec, "'target_shape' must be integers"))?;
        let wildcards = target.iter().filter(|&&d| d == -1).count();
        if target.is_empty() || wildcards > 1 || target.iter().any(|&d| d == 0 || d < -1) {
            return Err(load_err(spec, format!("invalid 'target_shape' {target:?}")));
        }
        Ok(Box::new(Self { target }))
    }

    fn resolve(&self, input: &[usize]) -> Option<Vec<usize>> {
        let total: usize = input.iter().product();
        let known: usize = self
            .target
            .iter()
            .filter(|&&d| d > 0)
            .map(|&d| d as usize)
            .product();
        if known == 0 || total % known != 0 {
            return None;
        }
        let shape: Vec<usize> = self
            .target
            .iter()
            .map(|&d| if d == -1 { total / known } else { d as usize })
            .collect();
        (shape.iter().product::<usize>() == total).then_some(shape)
    }
}

impl Layer for Reshape {
    fn class_name(&self) -> &'static str {
        "Reshape"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        self.resolve(input).ok_or_else(|| {
            CryError::ModelLoad(format!("cannot reshape {input:?} into {:?}", self.target))
        })
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = self.resolve(x.shape()).ok_or_else(|| {
            CryError::Inference(format!("cannot reshape {:?} into {:?}", x.shape(), self.target))
        })?;
        x.as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&shape))
            .map_err(|e| inference_err("Reshape", e))
    }
}

pub struct Flatten;

impl Flatten {
    pub fn build(_spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        Ok(Box::new(Self))
    }
}

impl Layer for Flatten {
    fn class_name(&self) -> &'static str {
        "Flatten"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        Ok(vec![input.iter().product()])
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let n = x.len();
        x.as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&[n]))
            .map_err(|e| inference_err("Flatten", e))
    }
}

// ── Dense ────────────────────────────────────────────────────────────────────

/// Fully connected layer applied along the last axis.
pub struct Dense {
    kernel: Array2<f32>,
    bias: Option<Array1<f32>>,
    activation: Activation,
}

impl Dense {
    pub fn build(spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        let kernel = spec
            .weight("kernel")?
            .into_dimensionality::<Ix2>()
            .map_err(|_| load_err(spec, "kernel must be (in, out)"))?;
        let units = kernel.ncols();
        if let Some(declared) = cfg_usize(spec, "units")? {
            if declared != units {
                return Err(load_err(
                    spec,
                    format!("units={declared} but kernel has {units} columns"),
                ));
            }
        }
        let bias = if cfg_bool(spec, "use_bias", true) {
            Some(vector(spec, "bias", units)?)
        } else {
            None
        };
        Ok(Box::new(Self {
            kernel,
            bias,
            activation: Activation::from_spec(spec)?,
        }))
    }
}

impl Layer for Dense {
    fn class_name(&self) -> &'static str {
        "Dense"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input.split_last() {
            Some((&last, rest)) if last == self.kernel.nrows() => {
                let mut out = rest.to_vec();
                out.push(self.kernel.ncols());
                Ok(out)
            }
            _ => Err(shape_err(format!("(…, {})", self.kernel.nrows()), input)),
        }
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let (n_in, n_out) = self.kernel.dim();
        let mut out_shape = x.shape().to_vec();
        match out_shape.last_mut() {
            Some(last) if *last == n_in => *last = n_out,
            _ => {
                return Err(CryError::Inference(format!(
                    "Dense expects last axis {n_in}, got {:?}",
                    x.shape()
                )))
            }
        }
        let rows = x.len() / n_in;
        let x2 = x
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((rows, n_in))
            .map_err(|e| inference_err("Dense input", e))?;
        let mut y = x2.dot(&self.kernel);
        if let Some(bias) = &self.bias {
            y += bias;
        }
        let y = y
            .into_shape_with_order(IxDyn(&out_shape))
            .map_err(|e| inference_err("Dense output", e))?;
        Ok(self.activation.apply(y))
    }
}

/// Mean over the time axis: `(T, D)` → `(D,)`.
pub struct GlobalAveragePooling1D;

impl GlobalAveragePooling1D {
    pub fn build(_spec: &LayerSpec, _ctx: &LoadContext) -> Result<Box<dyn Layer>> {
        Ok(Box::new(Self))
    }
}

impl Layer for GlobalAveragePooling1D {
    fn class_name(&self) -> &'static str {
        "GlobalAveragePooling1D"
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match input {
            [t, d] if *t > 0 => Ok(vec![*d]),
            _ => Err(shape_err("(T, D)", input)),
        }
    }

    fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if x.ndim() != 2 {
            return Err(CryError::Inference(format!(
                "GlobalAveragePooling1D expects (T, D), got {:?}",
                x.shape()
            )));
        }
        x.mean_axis(Axis(0))
            .ok_or_else(|| CryError::Inference("GlobalAveragePooling1D over zero steps".into()))
    }
}
