//! Feature extraction: mono clip → fixed `(1, 128, 216, 1)` log-mel tensor.
//!
//! ## Frontend parameters (must match training)
//!
//! | Parameter       | Value                     |
//! |-----------------|---------------------------|
//! | Sample rate     | 22 050 Hz                 |
//! | Hann window     | 2048 samples (periodic)   |
//! | FFT size        | 2048                      |
//! | Frequency bins  | 1025 (2048/2+1)           |
//! | Hop length      | 512                       |
//! | Centering       | 1024 zeros on each side   |
//! | Mel bands       | 128 (Slaney, 0–11 025 Hz) |
//! | dB reference    | clip maximum, top_db 80   |
//! | Frames          | 216 (≈5.0 s)              |
//!
//! The time axis is right-padded with `0.0` (after dB scaling) or truncated
//! to 216 frames. The dB reference is taken over the full clip *before*
//! truncation.

pub mod mel;

use std::path::Path;
use std::sync::Arc;

use ndarray::{s, Array2, Array4};
use rustfft::{num_complex::Complex, FftPlanner};
use tracing::debug;

use crate::audio::{self, AudioClip};
use crate::error::{CryError, Result};
use mel::MelBand;

/// Frontend constants.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    /// Fixed time-axis length of the model input.
    pub max_frames: usize,
    /// Power floor before `log10`.
    pub amin: f32,
    /// Dynamic range kept below the clip peak. `None` disables clipping.
    pub top_db: Option<f32>,
    /// Value written into right-padded frames (post-dB).
    pub pad_value: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: audio::TARGET_SAMPLE_RATE,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            max_frames: 216,
            amin: 1e-10,
            top_db: Some(80.0),
            pad_value: 0.0,
        }
    }
}

/// Model-ready log-mel tensor: `(batch=1, n_mels, max_frames, channel=1)`.
#[derive(Debug, Clone)]
pub struct FeatureTensor {
    data: Array4<f32>,
    content_frames: usize,
}

impl FeatureTensor {
    /// Wrap an existing `(1, mels, frames, 1)` array, e.g. for replaying
    /// stored features through a classifier.
    pub fn from_array(data: Array4<f32>, content_frames: usize) -> Self {
        let content_frames = content_frames.min(data.shape()[2]);
        Self {
            data,
            content_frames,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    /// Frames that came from real audio; the rest are padding.
    pub fn content_frames(&self) -> usize {
        self.content_frames
    }

    /// All mel values of time frame `t`.
    pub fn column(&self, t: usize) -> Vec<f32> {
        self.data.slice(s![0, .., t, 0]).to_vec()
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Reusable log-mel frontend. Window, filter bank and FFT plan are built once.
pub struct FeatureExtractor {
    config: FeatureConfig,
    hann_window: Vec<f32>,
    mel_filters: Vec<MelBand>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let hann_window = mel::build_hann_window(config.n_fft);
        let mel_filters = mel::build_mel_filters(
            config.n_fft,
            config.sample_rate,
            config.n_mels,
            0.0,
            config.sample_rate as f64 / 2.0,
        );
        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.n_fft);

        Self {
            config,
            hann_window,
            mel_filters,
            fft,
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Decode `path` and extract its feature tensor.
    pub fn extract_file(&self, path: impl AsRef<Path>) -> Result<FeatureTensor> {
        let clip = audio::decode_file(path, self.config.sample_rate)?;
        self.extract(&clip)
    }

    /// Extract the feature tensor of an already decoded clip.
    pub fn extract(&self, clip: &AudioClip) -> Result<FeatureTensor> {
        if clip.sample_rate != self.config.sample_rate {
            return Err(CryError::Decode(format!(
                "clip is {} Hz but the frontend expects {} Hz",
                clip.sample_rate, self.config.sample_rate
            )));
        }
        if clip.is_empty() {
            return Err(CryError::Decode("clip contains no samples".into()));
        }

        let mut mel = self.mel_spectrogram(&clip.samples);
        mel::power_to_db(&mut mel, self.config.amin, self.config.top_db);
        let content_frames = mel.ncols().min(self.config.max_frames);
        let fixed = self.fix_frames(mel);

        debug!(
            seconds = format_args!("{:.2}", clip.duration_secs()),
            content_frames,
            max_frames = self.config.max_frames,
            "extracted log-mel features"
        );

        let data = fixed
            .insert_axis(ndarray::Axis(2))
            .insert_axis(ndarray::Axis(0));
        Ok(FeatureTensor {
            data,
            content_frames,
        })
    }

    /// Mel power spectrogram `(n_mels, 1 + len / hop)` of centred frames.
    pub fn mel_spectrogram(&self, samples: &[f32]) -> Array2<f32> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;

        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);
        let n_frames = 1 + (padded.len() - n_fft) / hop;

        let mut mel = Array2::<f32>::zeros((self.config.n_mels, n_frames));
        let mut fft_buf = vec![Complex::new(0.0f32, 0.0); n_fft];
        let mut power = vec![0.0f32; n_fft / 2 + 1];

        for frame in 0..n_frames {
            let start = frame * hop;
            for (i, v) in fft_buf.iter_mut().enumerate() {
                *v = Complex::new(padded[start + i] * self.hann_window[i], 0.0);
            }
            self.fft.process(&mut fft_buf);
            for (p, c) in power.iter_mut().zip(&fft_buf) {
                *p = c.norm_sqr();
            }
            for (m, band) in self.mel_filters.iter().enumerate() {
                mel[[m, frame]] = band.apply(&power);
            }
        }
        mel
    }

    /// Right-pad with `pad_value` or truncate to exactly `max_frames` columns.
    pub fn fix_frames(&self, spec: Array2<f32>) -> Array2<f32> {
        let target = self.config.max_frames;
        let frames = spec.ncols();
        if frames >= target {
            return spec.slice(s![.., ..target]).to_owned();
        }
        let mut out = Array2::from_elem((spec.nrows(), target), self.config.pad_value);
        out.slice_mut(s![.., ..frames]).assign(&spec);
        out
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, seconds: f32, sr: u32) -> AudioClip {
        let n = (seconds * sr as f32) as usize;
        let samples = (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect();
        AudioClip::new(samples, sr)
    }

    #[test]
    fn frame_count_matches_centered_stft() {
        let fx = FeatureExtractor::default();
        let mel = fx.mel_spectrogram(&vec![0.0; 22_050]);
        assert_eq!(mel.dim(), (128, 1 + 22_050 / 512));
    }

    #[test]
    fn long_clip_is_truncated_to_216_frames() {
        let fx = FeatureExtractor::default();
        let t = fx.extract(&sine(440.0, 7.0, 22_050)).unwrap();
        assert_eq!(t.shape(), [1, 128, 216, 1]);
        assert_eq!(t.content_frames(), 216);
        assert!(t.all_finite());
    }

    #[test]
    fn short_clip_is_right_padded_with_constant() {
        let fx = FeatureExtractor::default();
        let t = fx.extract(&sine(440.0, 1.0, 22_050)).unwrap();
        assert_eq!(t.shape(), [1, 128, 216, 1]);
        let content = 1 + 22_050 / 512;
        assert_eq!(t.content_frames(), content);
        for frame in content..216 {
            assert!(t.column(frame).iter().all(|v| *v == 0.0), "frame {frame}");
        }
    }

    #[test]
    fn db_values_peak_at_zero_and_respect_top_db() {
        let fx = FeatureExtractor::default();
        let t = fx.extract(&sine(1_000.0, 2.0, 22_050)).unwrap();
        let content: Vec<f32> = (0..t.content_frames()).flat_map(|f| t.column(f)).collect();
        let max = content.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = content.iter().copied().fold(f32::INFINITY, f32::min);
        assert_relative_eq!(max, 0.0, epsilon = 1e-4);
        assert!(min >= -80.0 - 1e-3, "min={min}");
    }

    #[test]
    fn tone_energy_lands_in_matching_mel_band() {
        let fx = FeatureExtractor::default();
        let mel = fx.mel_spectrogram(&sine(1_000.0, 1.0, 22_050).samples);
        let mid = mel.ncols() / 2;
        let column = mel.column(mid);
        let (peak_band, _) = column
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        // 1 kHz sits at 15 Slaney mels; 128 bands span ~0–63 mels.
        let top_mel = mel::hz_to_mel_slaney(11_025.0);
        let expected = (15.0 / top_mel * 129.0) as usize;
        assert!(
            (peak_band as isize - expected as isize).abs() <= 2,
            "peak band {peak_band}, expected near {expected}"
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        let fx = FeatureExtractor::default();
        let clip = sine(300.0, 0.5, 22_050);
        let a = fx.extract(&clip).unwrap();
        let b = fx.extract(&clip).unwrap();
        assert_eq!(a.as_array(), b.as_array());
    }

    #[test]
    fn wrong_sample_rate_is_rejected() {
        let fx = FeatureExtractor::default();
        let err = fx.extract(&sine(440.0, 0.5, 16_000)).unwrap_err();
        assert!(err.is_decode());
    }
}
