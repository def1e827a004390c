//! # crysense-core
//!
//! Infant-cry classification SDK.
//!
//! ## Architecture
//!
//! ```text
//! WAV path → audio::decode_file (mono, 22.05 kHz)
//!                   │
//!        FeatureExtractor::extract → FeatureTensor (1, 128, 216, 1)
//!                   │
//!        GraphModel::forward (layers resolved by name via LayerRegistry)
//!                   │
//!        argmax → LabelEncoder::inverse_transform → Prediction
//! ```
//!
//! Everything runs synchronously on the calling thread. `CryClassifier`
//! loads the artifacts once; `predict_audio` reloads them on every call.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod encoder;
pub mod error;
pub mod features;
pub mod inference;
pub mod model;

// Convenience re-exports for downstream crates
pub use audio::{decode_file, AudioClip};
pub use encoder::LabelEncoder;
pub use error::{CryError, Result};
pub use features::{FeatureConfig, FeatureExtractor, FeatureTensor};
pub use inference::{
    predict_audio, predict_audio_with, predict_with_timeout, ClassifierConfig, ClassifierHandle,
    CryClassifier, Prediction,
};
pub use model::{GraphModel, LayerRegistry};
