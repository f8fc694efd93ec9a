//! Synthetic and recorded frame sources for the CLI harness and tests.
//!
//! Synthetic frames carry hand-shaped spectra on the analyser level scale so
//! classifier expectations hold exactly, plus a time-domain buffer at a
//! realistic room level for the decibel meter and calibration. Recorded WAV
//! input is windowed and run through the real FFT path.

use std::f32::consts::PI;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::analysis::features::{AudioFrame, FftProcessor};

/// Sample rate of synthetic frames
pub const FIXTURE_SAMPLE_RATE: u32 = 44_100;

/// Time-domain window length of synthetic frames
pub const FIXTURE_WINDOW: usize = 2048;

/// Magnitude bins per synthetic frame
pub const FIXTURE_BINS: usize = FIXTURE_WINDOW / 2;

/// Deterministic sound shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureSound {
    /// Harmonic series on 1 kHz with strong upper partials (~77 dB)
    Piano,
    /// Formant-shaped energy in 100-2000 Hz, weak highs (~73 dB)
    Voice,
    /// Broadband noise with no tonal peaks (~75 dB)
    Noise,
    /// Short flat-spectrum metronome click bleed (~59 dB)
    Click,
    /// Quiet room tone (~25 dB)
    Ambient,
    /// Digital silence
    Zero,
}

impl fmt::Display for FixtureSound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FixtureSound::Piano => "piano",
            FixtureSound::Voice => "voice",
            FixtureSound::Noise => "noise",
            FixtureSound::Click => "click",
            FixtureSound::Ambient => "ambient",
            FixtureSound::Zero => "zero",
        };
        f.write_str(name)
    }
}

impl FromStr for FixtureSound {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piano" => Ok(FixtureSound::Piano),
            "voice" => Ok(FixtureSound::Voice),
            "noise" => Ok(FixtureSound::Noise),
            "click" => Ok(FixtureSound::Click),
            "ambient" | "silence" => Ok(FixtureSound::Ambient),
            "zero" => Ok(FixtureSound::Zero),
            other => Err(anyhow!("unknown fixture sound '{}'", other)),
        }
    }
}

/// One segment of a scripted session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSegment {
    pub sound: FixtureSound,
    pub duration_ms: u64,
}

/// Parse a script such as `ambient:2000,piano:5000,ambient:3000`
pub fn parse_script(script: &str) -> Result<Vec<ScriptSegment>> {
    let mut segments = Vec::new();
    for part in script.split(',').filter(|p| !p.trim().is_empty()) {
        let (sound, duration) = part
            .split_once(':')
            .ok_or_else(|| anyhow!("segment '{}' must look like sound:millis", part))?;
        let duration_ms: u64 = duration
            .trim()
            .parse()
            .with_context(|| format!("invalid duration in segment '{}'", part))?;
        segments.push(ScriptSegment {
            sound: sound.parse()?,
            duration_ms,
        });
    }
    if segments.is_empty() {
        bail!("script is empty");
    }
    Ok(segments)
}

/// Sound playing at `offset_ms` into a script, if any
pub fn sound_at(segments: &[ScriptSegment], offset_ms: u64) -> Option<FixtureSound> {
    let mut start = 0;
    for segment in segments {
        if offset_ms < start + segment.duration_ms {
            return Some(segment.sound);
        }
        start += segment.duration_ms;
    }
    None
}

/// Build a synthetic frame captured at `captured_at_ms`
///
/// Noise components are seeded from the capture time, so identical inputs
/// give identical frames.
pub fn frame(sound: FixtureSound, captured_at_ms: u64) -> AudioFrame {
    let mut rng = StdRng::seed_from_u64(captured_at_ms ^ 0x5eed);
    let (samples, magnitudes) = match sound {
        FixtureSound::Piano => (sine(1000.0, 0.28), piano_spectrum()),
        FixtureSound::Voice => (sine(300.0, 0.2), voice_spectrum()),
        FixtureSound::Noise => (uniform_noise(&mut rng, 0.3), noise_spectrum(&mut rng)),
        FixtureSound::Click => (uniform_noise(&mut rng, 0.05), vec![25.0; FIXTURE_BINS]),
        FixtureSound::Ambient => (uniform_noise(&mut rng, 0.001), vec![10.0; FIXTURE_BINS]),
        FixtureSound::Zero => (vec![0.0; FIXTURE_WINDOW], vec![0.0; FIXTURE_BINS]),
    };

    AudioFrame {
        samples,
        magnitudes,
        sample_rate: FIXTURE_SAMPLE_RATE,
        captured_at_ms,
    }
}

fn sine(freq: f32, amplitude: f32) -> Vec<f32> {
    (0..FIXTURE_WINDOW)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / FIXTURE_SAMPLE_RATE as f32).sin())
        .collect()
}

fn uniform_noise(rng: &mut StdRng, amplitude: f32) -> Vec<f32> {
    (0..FIXTURE_WINDOW)
        .map(|_| rng.gen_range(-amplitude..amplitude))
        .collect()
}

fn bin_for(freq: f32) -> usize {
    let bin_width = FIXTURE_SAMPLE_RATE as f32 / 2.0 / FIXTURE_BINS as f32;
    (freq / bin_width).round() as usize
}

/// Partials at 1-7 kHz over a 40-level floor from 2 kHz up, nothing below 500 Hz
fn piano_spectrum() -> Vec<f32> {
    let mut spectrum = vec![0.0; FIXTURE_BINS];
    let floor_start = bin_for(2000.0);
    let floor_end = bin_for(8000.0);
    for level in &mut spectrum[floor_start..floor_end] {
        *level = 40.0;
    }
    for k in 1..=7 {
        let peak = bin_for(1000.0 * k as f32);
        spectrum[peak - 1] = 150.0;
        spectrum[peak] = 200.0;
        spectrum[peak + 1] = 150.0;
    }
    spectrum
}

/// Flat 100-2000 Hz body with formant peaks every seventh bin, faint 2-4 kHz
fn voice_spectrum() -> Vec<f32> {
    let mut spectrum = vec![0.0; FIXTURE_BINS];
    let body = bin_for(100.0)..bin_for(2000.0);
    for bin in body {
        spectrum[bin] = if bin % 7 == 0 { 120.0 } else { 60.0 };
    }
    for level in &mut spectrum[bin_for(2000.0)..bin_for(4000.0)] {
        *level = 10.0;
    }
    spectrum
}

fn noise_spectrum(rng: &mut StdRng) -> Vec<f32> {
    (0..FIXTURE_BINS)
        .map(|_| 120.0 + rng.gen_range(-10.0..10.0))
        .collect()
}

/// Decode a WAV file into mono f32 samples
///
/// Multi-channel files keep the first channel.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("decoding {}", path.display()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("decoding {}", path.display()))?
        }
    };

    let mono = interleaved.chunks(channels).map(|frame| frame[0]).collect();
    Ok((mono, spec.sample_rate))
}

/// Slice a recording into analysis frames every `hop_ms`
pub fn frames_from_samples(
    samples: &[f32],
    sample_rate: u32,
    fft: &FftProcessor,
    hop_ms: u64,
    start_ms: u64,
) -> Vec<AudioFrame> {
    let window = fft.fft_size();
    let hop = ((sample_rate as u64 * hop_ms.max(1)) / 1000).max(1) as usize;
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset + window <= samples.len() {
        let captured_at_ms = start_ms + (offset as u64 * 1000) / sample_rate as u64;
        frames.push(fft.frame(
            samples[offset..offset + window].to_vec(),
            sample_rate,
            captured_at_ms,
        ));
        offset += hop;
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;

    #[test]
    fn test_parse_script() {
        let segments = parse_script("ambient:2000, piano:5000,silence:3000").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].sound, FixtureSound::Piano);
        assert_eq!(segments[2].sound, FixtureSound::Ambient);
        assert_eq!(sound_at(&segments, 1_999), Some(FixtureSound::Ambient));
        assert_eq!(sound_at(&segments, 2_000), Some(FixtureSound::Piano));
        assert_eq!(sound_at(&segments, 10_000), None);
    }

    #[test]
    fn test_parse_script_rejects_garbage() {
        assert!(parse_script("").is_err());
        assert!(parse_script("piano").is_err());
        assert!(parse_script("trumpet:100").is_err());
        assert!(parse_script("piano:abc").is_err());
    }

    #[test]
    fn test_frames_are_deterministic() {
        let a = frame(FixtureSound::Noise, 1_234);
        let b = frame(FixtureSound::Noise, 1_234);
        assert_eq!(a.samples, b.samples);
        assert_eq!(a.magnitudes, b.magnitudes);
        assert_eq!(a.magnitudes.len(), FIXTURE_BINS);
    }

    #[test]
    fn test_frames_from_samples_hops() {
        let fft = FftProcessor::new(1024, &FeatureConfig::default());
        let samples = vec![0.0; 44_100];
        let frames = frames_from_samples(&samples, 44_100, &fft, 100, 5_000);
        assert_eq!(frames[0].captured_at_ms, 5_000);
        assert_eq!(frames[1].captured_at_ms, 5_100);
        assert_eq!(frames.len(), (44_100 - 1024) / 4_410 + 1);
    }

    #[test]
    fn test_load_wav_roundtrip() {
        let path = std::env::temp_dir().join("practice_detector_fixture_test.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(16_384_i16).unwrap();
            writer.write_sample(-16_384_i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, rate) = load_wav(&path).unwrap();
        assert_eq!(rate, 22_050);
        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|&s| (s - 0.5).abs() < 1e-4));
        let _ = std::fs::remove_file(path);
    }
}
