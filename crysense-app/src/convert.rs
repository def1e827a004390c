//! Upload conversion: any supported audio file → mono 22.05 kHz WAV.
//!
//! Three strategies are tried in order, and each output is re-read before it
//! is accepted:
//!
//! 1. external `ffmpeg` (when `ffmpeg -version` runs),
//! 2. in-process WAV rewrite (hound + resampler) for `.wav` input,
//! 3. in-process generic decode through symphonia.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crysense_core::audio::{self, resample, TARGET_SAMPLE_RATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMethod {
    Ffmpeg,
    WavRewrite,
    GenericDecode,
}

impl std::fmt::Display for ConversionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ffmpeg => "ffmpeg",
            Self::WavRewrite => "wav-rewrite",
            Self::GenericDecode => "generic-decode",
        })
    }
}

/// Converted WAV. The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct ConvertedAudio {
    file: NamedTempFile,
    pub method: ConversionMethod,
}

impl ConvertedAudio {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[derive(Debug, Clone)]
pub struct Converter {
    ffmpeg: PathBuf,
}

impl Converter {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    pub fn ffmpeg_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn convert(&self, input: &Path) -> Result<ConvertedAudio> {
        let meta = std::fs::metadata(input)
            .with_context(|| format!("cannot read upload {}", input.display()))?;
        if meta.len() == 0 {
            bail!("{} is an empty file", input.display());
        }

        let mut failures: Vec<String> = Vec::new();

        if self.ffmpeg_available() {
            match self.attempt(input, ConversionMethod::Ffmpeg) {
                Ok(done) => return Ok(done),
                Err(e) => failures.push(format!("ffmpeg: {e:#}")),
            }
        } else {
            debug!(ffmpeg = %self.ffmpeg.display(), "ffmpeg not available");
        }

        if has_extension(input, "wav") {
            match self.attempt(input, ConversionMethod::WavRewrite) {
                Ok(done) => return Ok(done),
                Err(e) => failures.push(format!("wav rewrite: {e:#}")),
            }
        }

        match self.attempt(input, ConversionMethod::GenericDecode) {
            Ok(done) => Ok(done),
            Err(e) => {
                failures.push(format!("generic decode: {e:#}"));
                Err(anyhow!(
                    "could not convert {}: {}",
                    input.display(),
                    failures.join("; ")
                ))
            }
        }
    }

    fn attempt(&self, input: &Path, method: ConversionMethod) -> Result<ConvertedAudio> {
        let file = tempfile::Builder::new()
            .prefix("crysense-")
            .suffix(".wav")
            .tempfile()
            .context("create temporary WAV")?;
        let out = file.path();

        let result = match method {
            ConversionMethod::Ffmpeg => self.run_ffmpeg(input, out),
            ConversionMethod::WavRewrite => rewrite_wav(input, out),
            ConversionMethod::GenericDecode => decode_generic(input, out),
        }
        .and_then(|()| validate_wav(out));

        match result {
            Ok(()) => {
                info!(input = %input.display(), %method, "audio converted");
                Ok(ConvertedAudio { file, method })
            }
            Err(e) => {
                warn!(input = %input.display(), %method, error = %e, "conversion attempt failed");
                Err(e)
            }
        }
    }

    fn run_ffmpeg(&self, input: &Path, out: &Path) -> Result<()> {
        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-i"])
            .arg(input)
            .args(["-vn", "-ac", "1", "-ar"])
            .arg(TARGET_SAMPLE_RATE.to_string())
            .args(["-f", "wav"])
            .arg(out)
            .stdin(Stdio::null())
            .output()
            .context("spawn ffmpeg")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            bail!("ffmpeg exited with {}: {tail}", output.status);
        }
        Ok(())
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Mono, target rate, 16-bit PCM.
pub fn write_wav(path: &Path, samples: &[f32]) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).context("open WAV writer")?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize().context("finalize WAV")?;
    Ok(())
}

fn to_target_mono(interleaved: &[f32], rate: u32, channels: u16) -> Result<Vec<f32>> {
    let mono = audio::downmix(interleaved, channels);
    if mono.is_empty() {
        bail!("no audio samples");
    }
    Ok(resample::resample_mono(&mono, rate, TARGET_SAMPLE_RATE)?)
}

fn rewrite_wav(input: &Path, out: &Path) -> Result<()> {
    let file = File::open(input).context("open WAV")?;
    let (samples, rate, channels) = audio::read_wav(BufReader::new(file))?;
    write_wav(out, &to_target_mono(&samples, rate, channels)?)
}

fn decode_generic(input: &Path, out: &Path) -> Result<()> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = File::open(input).context("open input")?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = input.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("unrecognised container")?;
    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no audio track"))?;
    let track_id = track.id;
    let rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("unsupported codec")?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                warn!(error = %e, "stopping at unreadable packet");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = %e, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(anyhow!("decode failed: {e}")),
        };
        if sample_buf.is_none() {
            let spec = *decoded.spec();
            channels = spec.channels.count() as u16;
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if channels == 0 {
        bail!("no decodable audio");
    }
    write_wav(out, &to_target_mono(&samples, rate, channels)?)
}

/// Output must be a readable WAV with at least one sample.
fn validate_wav(path: &Path) -> Result<()> {
    let reader = WavReader::open(path).context("converted file is not a readable WAV")?;
    if reader.duration() == 0 {
        bail!("converted file holds no samples");
    }
    Ok(())
}
