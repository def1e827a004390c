//! Audio decode: WAV file → mono f32 clip at the frontend sample rate.
//!
//! # Contract
//!
//! `decode_file` accepts any PCM or IEEE-float WAV (8/16/24/32-bit, any
//! channel count, any rate). Multichannel audio is averaged to mono and the
//! result is resampled to the requested rate. A missing, zero-byte, corrupt
//! or sample-less file is a `CryError::Decode`; nothing downstream runs.

pub mod clip;
pub mod resample;

pub use clip::AudioClip;

use std::io::{BufReader, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader};
use tracing::debug;

use crate::error::{CryError, Result};

/// Sample rate the feature frontend is calibrated for.
pub const TARGET_SAMPLE_RATE: u32 = 22_050;

/// Decode `path` to a mono clip at `target_rate` Hz.
pub fn decode_file(path: impl AsRef<Path>, target_rate: u32) -> Result<AudioClip> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)
        .map_err(|e| CryError::Decode(format!("cannot open {}: {e}", path.display())))?;
    if metadata.len() == 0 {
        return Err(CryError::Decode(format!(
            "{} is an empty file",
            path.display()
        )));
    }

    let file = std::fs::File::open(path)
        .map_err(|e| CryError::Decode(format!("cannot open {}: {e}", path.display())))?;
    let (samples, source_rate, channels) = read_wav(BufReader::new(file))?;
    let mono = downmix(&samples, channels);
    if mono.is_empty() {
        return Err(CryError::Decode(format!(
            "{} contains no audio samples",
            path.display()
        )));
    }

    debug!(
        path = %path.display(),
        source_rate,
        channels,
        frames = mono.len(),
        "decoded WAV"
    );

    let samples = resample::resample_mono(&mono, source_rate, target_rate)?;
    Ok(AudioClip::new(samples, target_rate))
}

/// Read interleaved f32 samples from any WAV stream.
///
/// Returns `(interleaved_samples, sample_rate, channels)`.
pub fn read_wav<R: Read>(reader: R) -> Result<(Vec<f32>, u32, u16)> {
    let reader =
        WavReader::new(reader).map_err(|e| CryError::Decode(format!("invalid WAV: {e}")))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(CryError::Decode("WAV header declares zero channels".into()));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CryError::Decode(format!("failed to read samples: {e}")))?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if bits == 0 || bits > 32 {
                return Err(CryError::Decode(format!(
                    "unsupported bits per sample: {bits}"
                )));
            }
            let max_val = (1u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CryError::Decode(format!("failed to read samples: {e}")))?
        }
    };

    Ok((samples, spec.sample_rate, spec.channels))
}

/// Average interleaved channels down to mono.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_wav(path: &Path, samples: &[i16], rate: u32, channels: u16) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            w.write_sample(s).unwrap();
        }
        w.finalize().unwrap();
    }

    fn write_wav_as<S: hound::Sample + Copy>(
        path: &Path,
        samples: &[S],
        bits_per_sample: u16,
        sample_format: SampleFormat,
    ) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: TARGET_SAMPLE_RATE,
            bits_per_sample,
            sample_format,
        };
        let mut w = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            w.write_sample(s).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn eight_bit_full_scale_maps_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u8.wav");
        write_wav_as(&path, &[i8::MIN, 0, i8::MAX, 64], 8, SampleFormat::Int);

        let clip = decode_file(&path, TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(clip.samples.len(), 4);
        assert!((clip.samples[0] + 1.0).abs() < 1e-6);
        assert!(clip.samples[1].abs() < 1e-6);
        assert!((clip.samples[2] - 127.0 / 128.0).abs() < 1e-6);
        assert!((clip.samples[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn twenty_four_bit_full_scale_maps_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s24.wav");
        let max = (1i32 << 23) - 1;
        write_wav_as(&path, &[-(1i32 << 23), max, 1 << 22], 24, SampleFormat::Int);

        let clip = decode_file(&path, TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(clip.samples.len(), 3);
        assert!((clip.samples[0] + 1.0).abs() < 1e-6);
        assert!((clip.samples[1] - 1.0).abs() < 1e-6);
        assert!((clip.samples[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn thirty_two_bit_int_full_scale_maps_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s32.wav");
        write_wav_as(&path, &[i32::MIN, i32::MAX, 1 << 30], 32, SampleFormat::Int);

        let clip = decode_file(&path, TARGET_SAMPLE_RATE).unwrap();
        assert!((clip.samples[0] + 1.0).abs() < 1e-6);
        assert!((clip.samples[1] - 1.0).abs() < 1e-6);
        assert!((clip.samples[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn float_samples_pass_through_unscaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f32.wav");
        write_wav_as(&path, &[-1.0f32, 1.0, 0.25, -0.75], 32, SampleFormat::Float);

        let clip = decode_file(&path, TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(clip.samples, vec![-1.0, 1.0, 0.25, -0.75]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        // L=1.0, R=0.0, L=0.5, R=0.5
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.5).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mono_at_target_rate_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, &[16_384; 2_205], TARGET_SAMPLE_RATE, 1);

        let clip = decode_file(&path, TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(clip.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(clip.samples.len(), 2_205);
        assert!((clip.samples[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn stereo_44k_file_is_downmixed_and_resampled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let interleaved: Vec<i16> = (0..44_100).flat_map(|_| [8_192i16, -8_192]).collect();
        write_wav(&path, &interleaved, 44_100, 2);

        let clip = decode_file(&path, TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(clip.samples.len(), 22_050);
        assert!(clip.rms() < 1e-3, "L and R cancel, rms={}", clip.rms());
    }

    #[test]
    fn zero_byte_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, b"").unwrap();
        let err = decode_file(&path, TARGET_SAMPLE_RATE).unwrap_err();
        assert!(err.is_decode(), "got {err:?}");
    }

    #[test]
    fn header_only_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.wav");
        write_wav(&path, &[], TARGET_SAMPLE_RATE, 1);
        let err = decode_file(&path, TARGET_SAMPLE_RATE).unwrap_err();
        assert!(err.is_decode(), "got {err:?}");
    }

    #[test]
    fn garbage_bytes_are_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();
        assert!(decode_file(&path, TARGET_SAMPLE_RATE).unwrap_err().is_decode());
    }

    #[test]
    fn missing_file_is_decode_error() {
        let err = decode_file("/nonexistent/clip.wav", TARGET_SAMPLE_RATE).unwrap_err();
        assert!(err.is_decode());
    }
}
