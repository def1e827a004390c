//! Mel filter bank, analysis window and dB scaling.
//!
//! All three follow the reference audio library's defaults so that features
//! computed here line up with the ones the classifier was trained on:
//! periodic Hann window, Slaney mel scale with Slaney area normalisation, and
//! `power_to_db(S, ref=max, amin=1e-10, top_db=80)`.

use ndarray::Array2;

/// One triangular mel band, stored sparsely over the FFT bins it covers.
#[derive(Debug, Clone)]
pub struct MelBand {
    /// First FFT bin with non-zero weight.
    pub start: usize,
    /// Weights for bins `start..start + weights.len()`.
    pub weights: Vec<f32>,
}

impl MelBand {
    /// Weighted sum of `power[start..]` under this band.
    #[inline]
    pub fn apply(&self, power: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(&power[self.start..self.start + self.weights.len()])
            .map(|(w, p)| w * p)
            .sum()
    }
}

/// Periodic Hann window of length `n`.
pub fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f64::consts::PI;
    (0..n)
        .map(|i| (0.5 * (1.0 - (2.0 * PI * i as f64 / n as f64).cos())) as f32)
        .collect()
}

/// Slaney-normalised triangular mel filters over `n_fft / 2 + 1` bins.
pub fn build_mel_filters(
    n_fft: usize,
    sr: u32,
    n_mels: usize,
    fmin: f64,
    fmax: f64,
) -> Vec<MelBand> {
    let n_freqs = n_fft / 2 + 1;
    let mel_min = hz_to_mel_slaney(fmin);
    let mel_max = hz_to_mel_slaney(fmax);

    let hz_pts: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz_slaney(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| k as f64 * sr as f64 / n_fft as f64)
        .collect();

    (0..n_mels)
        .map(|m| {
            let lower = hz_pts[m];
            let center = hz_pts[m + 1];
            let upper = hz_pts[m + 2];
            let down_denom = (center - lower).max(1e-10);
            let up_denom = (upper - center).max(1e-10);
            let enorm = 2.0 / (upper - lower).max(1e-10);

            let dense: Vec<f32> = fft_freqs
                .iter()
                .map(|&freq| {
                    let rising = (freq - lower) / down_denom;
                    let falling = (upper - freq) / up_denom;
                    (rising.min(falling).max(0.0) * enorm) as f32
                })
                .collect();

            match dense.iter().position(|&w| w > 0.0) {
                Some(start) => {
                    let end = dense.iter().rposition(|&w| w > 0.0).unwrap_or(start) + 1;
                    MelBand {
                        start,
                        weights: dense[start..end].to_vec(),
                    }
                }
                // Narrow low bands can fall between FFT bins.
                None => MelBand {
                    start: 0,
                    weights: Vec::new(),
                },
            }
        })
        .collect()
}

/// Convert a power spectrogram to dB relative to its own maximum, in place.
///
/// `10·log10(max(S, amin)) − 10·log10(max(max(S), amin))`, then everything is
/// clipped from below at `peak − top_db`.
pub fn power_to_db(spec: &mut Array2<f32>, amin: f32, top_db: Option<f32>) {
    let reference = spec.iter().copied().fold(0.0f32, f32::max);
    let ref_db = 10.0 * reference.max(amin).log10();
    spec.mapv_inplace(|v| 10.0 * v.max(amin).log10() - ref_db);

    if let Some(top_db) = top_db {
        let peak = spec.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - top_db;
        spec.mapv_inplace(|v| v.max(floor));
    }
}

pub fn hz_to_mel_slaney(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp; // 15
    let logstep = (6.4_f64).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

pub fn mel_to_hz_slaney(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f64).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}
