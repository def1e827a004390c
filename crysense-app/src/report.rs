//! Verdict text shown after an analysis.

use chrono::{DateTime, Local};
use serde::Serialize;

use crysense_core::Prediction;

use crate::settings::AppSettings;

const BAR_CELLS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Alert,
    Possible,
    Uncertain,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub severity: Severity,
    pub headline: String,
    pub label: String,
    pub confidence: f32,
}

pub fn verdict(prediction: &Prediction, settings: &AppSettings) -> Verdict {
    let confidence = prediction.confidence;
    let (severity, headline) = if prediction.label.eq_ignore_ascii_case(&settings.cry_label) {
        if confidence > settings.cry_alert_threshold {
            (Severity::Alert, "BABY CRY DETECTED".to_string())
        } else if confidence > settings.cry_possible_threshold {
            (Severity::Possible, "Possible baby cry".to_string())
        } else {
            (Severity::Uncertain, "Uncertain cry detection".to_string())
        }
    } else {
        (
            Severity::Other,
            format!("Sound classified as: {}", title_case(&prediction.label)),
        )
    };
    Verdict {
        severity,
        headline,
        label: prediction.label.clone(),
        confidence,
    }
}

/// `belly_pain` → `Belly_Pain`: a letter starts a word unless it follows
/// another letter. Separators are kept as they are.
pub fn title_case(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut prev_alpha = false;
    for c in label.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

pub fn confidence_bar(confidence: f32) -> String {
    let filled = (confidence.clamp(0.0, 1.0) * BAR_CELLS as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_CELLS - filled))
}

pub fn render(verdict: &Verdict, at: DateTime<Local>) -> String {
    format!(
        "{}\nConfidence: {:.2}% {}\nAnalyzed at: {}",
        verdict.headline,
        verdict.confidence * 100.0,
        confidence_bar(verdict.confidence),
        at.format("%Y-%m-%d %H:%M:%S")
    )
}
