//! Label encoder: class index ⇄ label name.
//!
//! Persisted as `{"classes": ["belly_pain", "burping", ...]}` where the
//! position in `classes` is the model's output index.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CryError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncoderFile {
    classes: Vec<String>,
}

/// Immutable bidirectional mapping between class indices and labels.
#[derive(Debug, Clone)]
pub struct LabelEncoder {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelEncoder {
    /// Build from an ordered class list. Labels must be non-empty and unique.
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            return Err(CryError::ModelLoad("label encoder has no classes".into()));
        }
        let mut index = HashMap::with_capacity(classes.len());
        for (i, label) in classes.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(CryError::ModelLoad(format!(
                    "label encoder class {i} is blank"
                )));
            }
            if index.insert(label.clone(), i).is_some() {
                return Err(CryError::ModelLoad(format!(
                    "label encoder lists '{label}' twice"
                )));
            }
        }
        Ok(Self { classes, index })
    }

    /// Load a persisted encoder.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CryError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CryError::ModelLoad(format!("read {}: {e}", path.display())))?;
        let file: EncoderFile = serde_json::from_str(&raw)
            .map_err(|e| CryError::ModelLoad(format!("parse {}: {e}", path.display())))?;
        let encoder = Self::new(file.classes)?;
        info!(
            path = %path.display(),
            classes = ?encoder.classes,
            "label encoder loaded"
        );
        Ok(encoder)
    }

    /// Persist in the same format `load` reads.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = EncoderFile {
            classes: self.classes.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| CryError::Other(anyhow::anyhow!(e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Index → label.
    pub fn inverse_transform(&self, index: usize) -> Result<&str> {
        self.classes.get(index).map(String::as_str).ok_or_else(|| {
            CryError::Inference(format!(
                "class index {index} out of range for {} labels",
                self.classes.len()
            ))
        })
    }

    /// Label → index.
    pub fn transform(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn index_and_label_round_trip() {
        let enc = LabelEncoder::new(labels(&["cry", "laugh", "noise"])).unwrap();
        assert_eq!(enc.inverse_transform(0).unwrap(), "cry");
        assert_eq!(enc.inverse_transform(2).unwrap(), "noise");
        assert_eq!(enc.transform("laugh"), Some(1));
        assert_eq!(enc.transform("silence"), None);
    }

    #[test]
    fn out_of_range_index_is_inference_error() {
        let enc = LabelEncoder::new(labels(&["cry"])).unwrap();
        assert!(matches!(enc.inverse_transform(1), Err(CryError::Inference(_))));
    }

    #[test]
    fn duplicate_and_empty_encoders_are_rejected() {
        assert!(LabelEncoder::new(vec![]).unwrap_err().is_model_load());
        assert!(LabelEncoder::new(labels(&["cry", "cry"]))
            .unwrap_err()
            .is_model_load());
        assert!(LabelEncoder::new(labels(&["cry", " "]))
            .unwrap_err()
            .is_model_load());
    }

    #[test]
    fn save_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label_encoder.json");
        let enc = LabelEncoder::new(labels(&["tired", "hungry", "discomfort"])).unwrap();
        enc.save(&path).unwrap();
        let loaded = LabelEncoder::load(&path).unwrap();
        assert_eq!(loaded.classes(), enc.classes());
    }

    #[test]
    fn missing_file_is_model_not_found() {
        let err = LabelEncoder::load("/nonexistent/label_encoder.json").unwrap_err();
        assert!(matches!(err, CryError::ModelNotFound { .. }));
    }

    #[test]
    fn corrupt_file_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label_encoder.json");
        std::fs::write(&path, "\u{80}\u{3}pickle").unwrap();
        assert!(matches!(
            LabelEncoder::load(&path),
            Err(CryError::ModelLoad(_))
        ));
    }
}
