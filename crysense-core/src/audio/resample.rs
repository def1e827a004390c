//! Audio sample-rate conversion using a band-limited rubato `SincFixedIn`
//! resampler.
//!
//! ## Design
//!
//! Uploaded clips arrive at whatever rate the recorder used (8 kHz phone
//! memos, 44.1 kHz, 48 kHz video soundtracks). The feature frontend needs
//! 22.05 kHz mono f32. `RateConverter` bridges that gap for a whole clip.
//! The windowed-sinc filter cuts off just below the lower of the two Nyquist
//! frequencies, so content above 11.025 kHz is removed rather than folded
//! back into the mel bands.
//!
//! When source rate == target rate, `RateConverter` is a passthrough and no
//! rubato session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let out = resample_mono(&samples, 48_000, 22_050)?; // Vec<f32> at 22.05 kHz
//! ```

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{CryError, Result};

/// Input frame count per rubato call for offline conversion.
pub const RESAMPLE_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<SincFixedIn<f32>>,
    /// Partial input chunk carried over between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `source_rate`: Sample rate of the incoming audio (Hz).
    /// - `target_rate`: Sample rate expected by the frontend (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `1024`).
    ///
    /// # Errors
    /// Returns `CryError::Decode` if either rate is zero or rubato fails to
    /// initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(CryError::Decode(format!(
                "invalid sample rate conversion {source_rate} -> {target_rate}"
            )));
        }
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            params,
            chunk_size,
            1, // mono
        )
        .map_err(|e| CryError::Decode(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        debug!(
            source_rate,
            target_rate, chunk_size, max_out, "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for `finish`.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        let mut offset = 0;
        while self.input_buf.len() - offset >= self.chunk_size {
            let input_slice = &self.input_buf[offset..offset + self.chunk_size];
            let (_consumed, produced) = resampler
                .process_into_buffer(&[input_slice], &mut self.output_buf, None)
                .map_err(|e| CryError::Decode(format!("resampler process: {e}")))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            offset += self.chunk_size;
        }
        self.input_buf.drain(..offset);

        Ok(result)
    }

    /// Flush the held remainder plus the resampler's internal delay line.
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        if !self.input_buf.is_empty() {
            let (_, produced) = resampler
                .process_partial_into_buffer(
                    Some(&[self.input_buf.as_slice()][..]),
                    &mut self.output_buf,
                    None,
                )
                .map_err(|e| CryError::Decode(format!("resampler flush: {e}")))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.clear();
        }

        let (_, produced) = resampler
            .process_partial_into_buffer(None::<&[Vec<f32>]>, &mut self.output_buf, None)
            .map_err(|e| CryError::Decode(format!("resampler flush: {e}")))?;
        result.extend_from_slice(&self.output_buf[0][..produced]);

        Ok(result)
    }

    /// Leading output frames that are filter warm-up rather than signal.
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Resample a complete mono clip, compensating for the filter delay so the
/// output has `round(len * target / source)` samples.
pub fn resample_mono(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(source_rate, target_rate, RESAMPLE_CHUNK)?;
    if rc.is_passthrough() {
        return Ok(samples.to_vec());
    }

    let expected =
        (samples.len() as f64 * target_rate as f64 / source_rate as f64).round() as usize;
    let delay = rc.output_delay();

    let mut out = rc.process(samples)?;
    out.extend(rc.finish()?);

    let mut out: Vec<f32> = out.into_iter().skip(delay).take(expected).collect();
    out.resize(expected, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(22_050, 22_050, 1024).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples).unwrap();
        assert_eq!(out, samples);
        assert!(rc.finish().unwrap().is_empty());
    }

    #[test]
    fn input_is_held_until_a_full_chunk_arrives() {
        let mut rc = RateConverter::new(44_100, 22_050, 1024).unwrap();
        assert!(rc.process(&[0.0f32; 600]).unwrap().is_empty());
        assert!(!rc.process(&[0.0f32; 600]).unwrap().is_empty());
        assert!(!rc.finish().unwrap().is_empty());
    }

    #[test]
    fn whole_clip_44k_to_22k_has_exact_length() {
        let samples = vec![0.1f32; 44_100];
        let out = resample_mono(&samples, 44_100, 22_050).unwrap();
        assert_eq!(out.len(), 22_050);
    }

    #[test]
    fn whole_clip_16k_to_22k_has_exact_length() {
        let samples = vec![0.0f32; 16_000];
        let out = resample_mono(&samples, 16_000, 22_050).unwrap();
        assert_eq!(out.len(), 22_050);
    }

    #[test]
    fn dc_level_survives_resampling() {
        let samples = vec![0.25f32; 48_000];
        let out = resample_mono(&samples, 48_000, 22_050).unwrap();
        let mid = &out[out.len() / 4..out.len() * 3 / 4];
        for &v in mid {
            assert!((v - 0.25).abs() < 1e-2, "v={v}");
        }
    }

    #[test]
    fn tone_above_target_nyquist_is_removed() {
        // 15 kHz is representable at 44.1 kHz but not at 22.05 kHz.
        let samples: Vec<f32> = (0..44_100)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 15_000.0 * i as f32 / 44_100.0).sin())
            .collect();
        let out = resample_mono(&samples, 44_100, 22_050).unwrap();
        let mid = &out[out.len() / 4..out.len() * 3 / 4];
        let rms = (mid.iter().map(|v| v * v).sum::<f32>() / mid.len() as f32).sqrt();
        assert!(rms < 0.01, "aliased energy left: rms={rms}");
    }

    #[test]
    fn tone_below_target_nyquist_is_kept() {
        let samples: Vec<f32> = (0..44_100)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / 44_100.0).sin())
            .collect();
        let out = resample_mono(&samples, 44_100, 22_050).unwrap();
        let mid = &out[out.len() / 4..out.len() * 3 / 4];
        let rms = (mid.iter().map(|v| v * v).sum::<f32>() / mid.len() as f32).sqrt();
        assert!((rms - 0.3536).abs() < 0.01, "rms={rms}");
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateConverter::new(0, 22_050, 1024),
            Err(CryError::Decode(_))
        ));
    }
}
