use std::path::{Path, PathBuf};

use crysense_core::model::{LayerSpec, ModelFile};
use crysense_core::{
    predict_audio_with, ClassifierConfig, CryClassifier, CryError, FeatureExtractor, LabelEncoder,
    LayerRegistry,
};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde_json::json;

const MELS: usize = 128;
const FRAMES: usize = 216;
const CLASSES: [&str; 5] = ["belly_pain", "burping", "discomfort", "hungry", "tired"];

/// (128, 216, 1) → Permute → (216, 128, 1) → Reshape → (216, 128)
/// → AttentionLayer → (128,) → Dense softmax → (5,)
///
/// The dense bias favours `winner`. The kernel reads the mean level of the
/// pooled mel vector into every class equally, so the input never changes
/// which class wins.
fn attention_model(winner: usize) -> ModelFile {
    let mut bias = vec![0.0f32; CLASSES.len()];
    bias[winner] = 3.0;
    ModelFile::new(
        vec![MELS, FRAMES, 1],
        vec![
            LayerSpec::new("Permute", "to_time_major").with_config(json!({ "dims": [2, 1, 3] })),
            LayerSpec::new("Reshape", "sequence")
                .with_config(json!({ "target_shape": [FRAMES, MELS] })),
            LayerSpec::new("AttentionLayer", "attention")
                .with_weight("att_weight", vec![MELS, 1], vec![0.01; MELS])
                .with_weight("att_bias", vec![FRAMES, 1], vec![0.0; FRAMES]),
            LayerSpec::new("Dense", "output")
                .with_config(json!({ "units": CLASSES.len(), "activation": "softmax" }))
                .with_weight(
                    "kernel",
                    vec![MELS, CLASSES.len()],
                    vec![1.0 / MELS as f32; MELS * CLASSES.len()],
                )
                .with_weight("bias", vec![CLASSES.len()], bias),
        ],
    )
}

fn write_artifacts(dir: &Path, model: &ModelFile, classes: &[&str]) -> ClassifierConfig {
    let config = ClassifierConfig::from_dir(dir);
    model.save(&config.model_path).unwrap();
    LabelEncoder::new(classes.iter().map(|s| s.to_string()).collect())
        .unwrap()
        .save(&config.encoder_path)
        .unwrap();
    config
}

fn write_wav(path: &Path, samples: impl IntoIterator<Item = i16>, rate: u32) -> PathBuf {
    let spec = WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut w = WavWriter::create(path, spec).unwrap();
    for s in samples {
        w.write_sample(s).unwrap();
    }
    w.finalize().unwrap();
    path.to_path_buf()
}

fn silent_second(dir: &Path) -> PathBuf {
    write_wav(&dir.join("silence.wav"), std::iter::repeat(0).take(22_050), 22_050)
}

#[test]
fn silent_second_flows_through_to_known_label() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), &attention_model(3), &CLASSES);
    let wav = silent_second(dir.path());

    let features = FeatureExtractor::default().extract_file(&wav).unwrap();
    assert_eq!(features.shape(), [1, 128, 216, 1]);
    assert!(features.all_finite());

    let prediction = predict_audio_with(&config, &wav).unwrap();
    assert_eq!(prediction.label, "hungry");
    assert_eq!(prediction.class_index, 3);
    assert!((0.0..=1.0).contains(&prediction.confidence));
    let sum: f32 = prediction.probabilities.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5, "sum={sum}");
}

#[test]
fn repeated_predictions_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), &attention_model(0), &CLASSES);
    let tone: Vec<i16> = (0..3 * 44_100)
        .map(|i| ((i as f32 * 0.05).sin() * 9_000.0) as i16)
        .collect();
    let wav = write_wav(&dir.path().join("tone44k.wav"), tone, 44_100);

    let classifier = CryClassifier::load(&config).unwrap();
    let first = classifier.predict(&wav).unwrap();
    for _ in 0..3 {
        assert_eq!(classifier.predict(&wav).unwrap(), first);
    }
    assert_eq!(predict_audio_with(&config, &wav).unwrap(), first);
}

#[test]
fn index_to_label_mapping_is_pinned() {
    let dir = tempfile::tempdir().unwrap();
    let wav = silent_second(dir.path());
    for (winner, expected) in CLASSES.iter().enumerate() {
        let config = write_artifacts(dir.path(), &attention_model(winner), &CLASSES);
        let p = predict_audio_with(&config, &wav).unwrap();
        assert_eq!(p.label, *expected, "class index {winner}");
    }
}

#[test]
fn zero_byte_audio_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), &attention_model(0), &CLASSES);
    let wav = dir.path().join("empty.wav");
    std::fs::write(&wav, b"").unwrap();

    let classifier = CryClassifier::load(&config).unwrap();
    assert!(matches!(classifier.predict(&wav), Err(CryError::Decode(_))));
    assert!(matches!(
        predict_audio_with(&config, &wav),
        Err(CryError::Decode(_))
    ));
}

#[test]
fn registry_without_attention_cannot_load_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), &attention_model(0), &CLASSES);

    let err = CryClassifier::load_with(&config, &LayerRegistry::with_builtins()).unwrap_err();
    assert!(err.is_model_load());
    assert!(err.to_string().contains("AttentionLayer"), "{err}");
}

#[test]
fn class_count_mismatch_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), &attention_model(0), &CLASSES[..4]);
    assert!(CryClassifier::load(&config).unwrap_err().is_model_load());
}

#[test]
fn missing_and_corrupt_artifacts_fail_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClassifierConfig::from_dir(dir.path());
    assert!(matches!(
        CryClassifier::load(&config),
        Err(CryError::ModelNotFound { .. })
    ));

    std::fs::write(&config.model_path, b"HDF\x89 not json").unwrap();
    assert!(matches!(
        CryClassifier::load(&config),
        Err(CryError::ModelLoad(_))
    ));
}
