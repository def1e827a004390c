//! Inference engine: WAV path → `(label, confidence)`.
//!
//! Three ways in:
//!
//! - [`CryClassifier`] loads the model and encoder once and can be reused
//!   for any number of predictions.
//! - [`predict_audio`] / [`predict_audio_with`] load both artifacts on every
//!   call. Nothing is shared between calls.
//! - [`ClassifierHandle`] is a cloneable handle that loads on first use under
//!   a `parking_lot::Mutex` and hands out the shared classifier afterwards.
//!   [`predict_with_timeout`] runs a handle prediction on a worker thread with
//!   a deadline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::AudioClip;
use crate::encoder::LabelEncoder;
use crate::error::{CryError, Result};
use crate::features::{FeatureConfig, FeatureExtractor, FeatureTensor};
use crate::model::{GraphModel, LayerRegistry};

pub const MODEL_DIR_ENV: &str = "CRYSENSE_MODEL_DIR";
pub const DEFAULT_MODEL_FILE: &str = "cry_classifier.json";
pub const DEFAULT_ENCODER_FILE: &str = "label_encoder.json";

// ── Configuration ────────────────────────────────────────────────────────────

/// Platform models directory.
pub fn default_models_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("CrySense").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("crysense")
            .join("models")
    }
}

/// `CRYSENSE_MODEL_DIR` if set and non-empty, otherwise [`default_models_dir`].
pub fn resolve_models_dir() -> PathBuf {
    std::env::var(MODEL_DIR_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_models_dir)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub encoder_path: PathBuf,
    pub features: FeatureConfig,
}

impl ClassifierConfig {
    /// Default artifact names inside `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            model_path: dir.join(DEFAULT_MODEL_FILE),
            encoder_path: dir.join(DEFAULT_ENCODER_FILE),
            features: FeatureConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::from_dir(resolve_models_dir())
    }
}

// ── Prediction ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub label: String,
    /// Probability of `label`, in `[0, 1]`.
    pub confidence: f32,
    pub class_index: usize,
    pub probabilities: Vec<f32>,
}

/// Index of the largest score. Ties go to the lowest index; NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in scores.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

// ── CryClassifier ────────────────────────────────────────────────────────────

/// Loaded model + encoder + feature frontend. Read-only after construction.
pub struct CryClassifier {
    model: GraphModel,
    encoder: LabelEncoder,
    extractor: FeatureExtractor,
}

impl CryClassifier {
    /// Load with the default layer registry (built-ins plus `AttentionLayer`).
    pub fn load(config: &ClassifierConfig) -> Result<Self> {
        Self::load_with(config, &LayerRegistry::default())
    }

    pub fn load_with(config: &ClassifierConfig, registry: &LayerRegistry) -> Result<Self> {
        let started = Instant::now();
        let model = GraphModel::load(&config.model_path, registry)?;
        let encoder = LabelEncoder::load(&config.encoder_path)?;
        let classifier = Self::from_parts(model, encoder, config.features.clone())?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            classes = classifier.encoder.len(),
            "classifier ready"
        );
        Ok(classifier)
    }

    /// Assemble from already loaded parts, checking they agree with each other.
    pub fn from_parts(model: GraphModel, encoder: LabelEncoder, features: FeatureConfig) -> Result<Self> {
        if model.output_width() != encoder.len() {
            return Err(CryError::ModelLoad(format!(
                "model scores {} classes but the encoder lists {}",
                model.output_width(),
                encoder.len()
            )));
        }
        let expected_input = [features.n_mels, features.max_frames, 1];
        if model.input_shape() != expected_input {
            return Err(CryError::ModelLoad(format!(
                "model expects input {:?} but features are {:?}",
                model.input_shape(),
                expected_input
            )));
        }
        Ok(Self {
            model,
            encoder,
            extractor: FeatureExtractor::new(features),
        })
    }

    /// Decode, extract and classify one WAV file.
    pub fn predict(&self, path: impl AsRef<Path>) -> Result<Prediction> {
        let path = path.as_ref();
        let features = self.extractor.extract_file(path)?;
        let prediction = self.predict_features(&features)?;
        debug!(
            path = %path.display(),
            label = %prediction.label,
            confidence = prediction.confidence,
            "prediction"
        );
        Ok(prediction)
    }

    pub fn predict_clip(&self, clip: &AudioClip) -> Result<Prediction> {
        let features = self.extractor.extract(clip)?;
        self.predict_features(&features)
    }

    /// Classify an already extracted `(1, mels, frames, 1)` tensor.
    pub fn predict_features(&self, features: &FeatureTensor) -> Result<Prediction> {
        let scores = self.model.forward(features.as_array().view().into_dyn())?;
        if scores.nrows() != 1 {
            return Err(CryError::Inference(format!(
                "expected a single example, got a batch of {}",
                scores.nrows()
            )));
        }
        self.decide(scores.row(0).to_vec())
    }

    fn decide(&self, probabilities: Vec<f32>) -> Result<Prediction> {
        let class_index = argmax(&probabilities)
            .ok_or_else(|| CryError::Inference("model produced no comparable scores".into()))?;
        let label = self.encoder.inverse_transform(class_index)?.to_string();
        let confidence = probabilities[class_index].clamp(0.0, 1.0);
        Ok(Prediction {
            label,
            confidence,
            class_index,
            probabilities,
        })
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }
}

impl std::fmt::Debug for CryClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryClassifier")
            .field("model", &self.model)
            .field("classes", &self.encoder.classes())
            .finish()
    }
}

// ── One-shot helpers ─────────────────────────────────────────────────────────

/// Classify `path` with artifacts from the default locations, loaded fresh.
pub fn predict_audio(path: impl AsRef<Path>) -> Result<Prediction> {
    predict_audio_with(&ClassifierConfig::default(), path)
}

/// Classify `path` with artifacts from `config`, loaded fresh for this call.
///
/// The audio is decoded first, so an unreadable clip fails with
/// `CryError::Decode` without touching the model.
pub fn predict_audio_with(config: &ClassifierConfig, path: impl AsRef<Path>) -> Result<Prediction> {
    let features = FeatureExtractor::new(config.features.clone()).extract_file(path)?;
    CryClassifier::load(config)?.predict_features(&features)
}

// ── Shared handle ────────────────────────────────────────────────────────────

struct HandleInner {
    config: ClassifierConfig,
    registry: LayerRegistry,
    slot: Mutex<Option<Arc<CryClassifier>>>,
}

/// Cloneable handle with lazy, one-time classifier initialisation.
///
/// The first successful `get` loads the artifacts; later calls share the same
/// `Arc<CryClassifier>`. A failed load leaves the slot empty, so the next call
/// tries again.
#[derive(Clone)]
pub struct ClassifierHandle(Arc<HandleInner>);

impl ClassifierHandle {
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_registry(config, LayerRegistry::default())
    }

    pub fn with_registry(config: ClassifierConfig, registry: LayerRegistry) -> Self {
        Self(Arc::new(HandleInner {
            config,
            registry,
            slot: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.0.config
    }

    pub fn is_loaded(&self) -> bool {
        self.0.slot.lock().is_some()
    }

    /// Loaded classifier, loading it first if needed.
    pub fn get(&self) -> Result<Arc<CryClassifier>> {
        let mut slot = self.0.slot.lock();
        if let Some(classifier) = slot.as_ref() {
            return Ok(Arc::clone(classifier));
        }
        let classifier = Arc::new(CryClassifier::load_with(&self.0.config, &self.0.registry)?);
        *slot = Some(Arc::clone(&classifier));
        Ok(classifier)
    }

    pub fn predict(&self, path: impl AsRef<Path>) -> Result<Prediction> {
        // The lock is released before the prediction runs.
        let classifier = self.get()?;
        classifier.predict(path)
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle")
            .field("model_path", &self.0.config.model_path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Run `handle.predict(path)` on a worker thread and wait at most `timeout`.
///
/// On timeout the worker is left to finish on its own and its result is
/// dropped.
pub fn predict_with_timeout(
    handle: &ClassifierHandle,
    path: impl AsRef<Path>,
    timeout: Duration,
) -> Result<Prediction> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let worker_handle = handle.clone();
    let path = path.as_ref().to_path_buf();

    std::thread::Builder::new()
        .name("crysense-predict".into())
        .spawn(move || {
            let _ = tx.send(worker_handle.predict(&path));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(?timeout, "prediction deadline exceeded");
            Err(CryError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(CryError::Inference(
            "prediction worker exited without a result".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LayerSpec, ModelFile};
    use approx::assert_relative_eq;
    use ndarray::Array4;
    use serde_json::json;

    const CLASSES: [&str; 3] = ["belly_pain", "burping", "hungry"];

    fn tiny_features() -> FeatureConfig {
        FeatureConfig {
            n_mels: 4,
            max_frames: 3,
            ..FeatureConfig::default()
        }
    }

    /// Flatten → Dense(12 → 3, softmax) whose output ignores the input and
    /// always favours `winner`.
    fn constant_model(winner: usize) -> ModelFile {
        let mut bias = vec![0.0f32; 3];
        bias[winner] = 4.0;
        ModelFile::new(
            vec![4, 3, 1],
            vec![
                LayerSpec::new("Flatten", "flatten"),
                LayerSpec::new("Dense", "output")
                    .with_config(json!({ "units": 3, "activation": "softmax" }))
                    .with_weight("kernel", vec![12, 3], vec![0.0; 36])
                    .with_weight("bias", vec![3], bias),
            ],
        )
    }

    fn write_artifacts(dir: &Path, model: &ModelFile, classes: &[&str]) -> ClassifierConfig {
        let mut config = ClassifierConfig::from_dir(dir);
        config.features = tiny_features();
        model.save(&config.model_path).unwrap();
        LabelEncoder::new(classes.iter().map(|s| s.to_string()).collect())
            .unwrap()
            .save(&config.encoder_path)
            .unwrap();
        config
    }

    fn write_tone(path: &Path, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(seconds * 22_050.0) as usize {
            let t = i as f32 / 22_050.0;
            w.write_sample(((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8_000.0) as i16)
                .unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax(&[f32::NAN, 0.1, 0.05]), Some(1));
        assert_eq!(argmax(&[f32::NAN, f32::NAN]), None);
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn class_index_maps_to_encoder_position() {
        let dir = tempfile::tempdir().unwrap();
        for (winner, expected) in CLASSES.iter().enumerate() {
            let config = write_artifacts(dir.path(), &constant_model(winner), &CLASSES);
            let classifier = CryClassifier::load(&config).unwrap();
            let tensor = FeatureTensor::from_array(Array4::zeros((1, 4, 3, 1)), 3);
            let p = classifier.predict_features(&tensor).unwrap();
            assert_eq!(p.class_index, winner);
            assert_eq!(p.label, *expected);
        }
    }

    #[test]
    fn confidence_is_the_winning_probability() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_artifacts(dir.path(), &constant_model(2), &CLASSES);
        let classifier = CryClassifier::load(&config).unwrap();
        let tensor = FeatureTensor::from_array(Array4::zeros((1, 4, 3, 1)), 3);
        let p = classifier.predict_features(&tensor).unwrap();

        assert_relative_eq!(p.probabilities.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        let max = p.probabilities.iter().copied().fold(f32::MIN, f32::max);
        assert_eq!(p.confidence, max);
        assert!((0.0..=1.0).contains(&p.confidence));
        // e^4 / (e^4 + 2)
        assert_relative_eq!(p.confidence, 4f32.exp() / (4f32.exp() + 2.0), epsilon = 1e-5);
    }

    #[test]
    fn encoder_size_must_match_model_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_artifacts(dir.path(), &constant_model(0), &["cry", "laugh"]);
        let err = CryClassifier::load(&config).unwrap_err();
        assert!(err.is_model_load());
        assert!(err.to_string().contains("3 classes"), "{err}");
    }

    #[test]
    fn model_input_must_match_feature_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_artifacts(dir.path(), &constant_model(0), &CLASSES);
        config.features = FeatureConfig::default();
        assert!(CryClassifier::load(&config).unwrap_err().is_model_load());
    }

    #[test]
    fn predict_audio_with_reads_wav() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_artifacts(dir.path(), &constant_model(1), &CLASSES);
        let wav = dir.path().join("tone.wav");
        write_tone(&wav, 0.5);
        let p = predict_audio_with(&config, &wav).unwrap();
        assert_eq!(p.label, "burping");
    }

    #[test]
    fn bad_audio_fails_before_model_load() {
        let dir = tempfile::tempdir().unwrap();
        // No artifacts written: a model load would be ModelNotFound.
        let mut config = ClassifierConfig::from_dir(dir.path());
        config.features = tiny_features();
        let wav = dir.path().join("empty.wav");
        std::fs::write(&wav, b"").unwrap();
        assert!(predict_audio_with(&config, &wav).unwrap_err().is_decode());
    }

    #[test]
    fn handle_loads_once_and_shares() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_artifacts(dir.path(), &constant_model(0), &CLASSES);
        let handle = ClassifierHandle::new(config);
        assert!(!handle.is_loaded());
        let a = handle.get().unwrap();
        let b = handle.clone().get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(handle.is_loaded());
    }

    #[test]
    fn handle_retries_after_failed_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClassifierConfig::from_dir(dir.path());
        config.features = tiny_features();
        let handle = ClassifierHandle::new(config);
        assert!(matches!(handle.get(), Err(CryError::ModelNotFound { .. })));
        assert!(!handle.is_loaded());

        write_artifacts(dir.path(), &constant_model(0), &CLASSES);
        assert!(handle.get().is_ok());
    }

    #[test]
    fn timeout_wrapper_returns_result_or_deadline_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_artifacts(dir.path(), &constant_model(2), &CLASSES);
        let wav = dir.path().join("tone.wav");
        write_tone(&wav, 0.5);
        let handle = ClassifierHandle::new(config);

        let p = predict_with_timeout(&handle, &wav, Duration::from_secs(30)).unwrap();
        assert_eq!(p.label, "hungry");

        let long = dir.path().join("long.wav");
        write_tone(&long, 20.0);
        let err = predict_with_timeout(&handle, &long, Duration::ZERO).unwrap_err();
        assert!(matches!(err, CryError::Timeout(_)));
    }

    #[test]
    fn worker_errors_propagate_through_timeout_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_artifacts(dir.path(), &constant_model(0), &CLASSES);
        let handle = ClassifierHandle::new(config);
        let err = predict_with_timeout(&handle, dir.path().join("missing.wav"), Duration::from_secs(30))
            .unwrap_err();
        assert!(err.is_decode());
    }
}
