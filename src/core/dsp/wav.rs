//! WAV capture and mixing.
//!
//! Capture files are mono 16-bit PCM. The outbound and inbound captures of a
//! call are written independently and mixed into a single recording when the
//! stream is removed.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use super::g711::alaw_to_pcm;
use super::resample::{ResampleMethod, resample_samples};
use super::{DspError, DspResult};

/// Sample rate of the RTP path.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Decoded WAV contents.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved 16-bit samples
    pub samples: Vec<i16>,
}

impl WavAudio {
    /// Average interleaved channels down to one.
    pub fn into_mono(self) -> Vec<i16> {
        if self.channels <= 1 {
            return self.samples;
        }
        let channels = self.channels as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
            .collect()
    }
}

/// Streaming mono capture writer for one direction of a call.
pub struct CaptureWriter {
    writer: WavWriter<BufWriter<File>>,
    frames: u64,
}

impl CaptureWriter {
    /// Create (truncating) a mono 16-bit capture file.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> DspResult<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { writer, frames: 0 })
    }

    /// Decode an A-law payload and append it.
    pub fn write_alaw(&mut self, payload: &[u8]) -> DspResult<()> {
        self.write_pcm(&alaw_to_pcm(payload))
    }

    /// Append linear samples.
    pub fn write_pcm(&mut self, samples: &[i16]) -> DspResult<()> {
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        self.frames += samples.len() as u64;
        Ok(())
    }

    /// Samples written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush and patch the header lengths.
    pub fn finalize(self) -> DspResult<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

/// Read a WAV file into 16-bit samples.
///
/// Integer formats wider than 16 bits are truncated to their top 16 bits;
/// float formats are scaled from [-1.0, 1.0].
pub fn read_wav(path: impl AsRef<Path>) -> DspResult<WavAudio> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, bits) if bits <= 16 => {
            reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?
        }
        (SampleFormat::Int, bits) if bits <= 32 => reader
            .samples::<i32>()
            .map(|s| s.map(|v| (v >> (bits - 16)) as i16))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<Vec<_>, _>>()?,
        (format, bits) => {
            return Err(DspError::UnsupportedFormat(format!(
                "{bits}-bit {format:?} WAV"
            )));
        }
    };

    Ok(WavAudio {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

/// Write interleaved 16-bit samples to a WAV file.
pub fn write_wav(
    path: impl AsRef<Path>,
    sample_rate: u32,
    channels: u16,
    samples: &[i16],
) -> DspResult<()> {
    if channels == 0 {
        return Err(DspError::InvalidInput("channel count must be positive".to_string()));
    }
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Mix two recordings into one mono file.
///
/// Multi-channel inputs are averaged to mono first. When the sample rates
/// differ the lower-rate input is upsampled with the cubic resampler. The
/// shorter input is padded with silence and the sum saturates at the 16-bit
/// range.
pub fn mix_files(
    first: impl AsRef<Path>,
    second: impl AsRef<Path>,
    destination: impl AsRef<Path>,
) -> DspResult<()> {
    let a = read_wav(first)?;
    let b = read_wav(second)?;

    let rate = a.sample_rate.max(b.sample_rate);
    let a = to_rate(a, rate);
    let b = to_rate(b, rate);

    let len = a.len().max(b.len());
    let mixed: Vec<i16> = (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0) as i32;
            let y = b.get(i).copied().unwrap_or(0) as i32;
            (x + y).clamp(i16::MIN as i32, i16::MAX as i32) as i16
        })
        .collect();

    debug!(samples = mixed.len(), sample_rate = rate, "Mixed recordings");
    write_wav(destination, rate, 1, &mixed)
}

fn to_rate(audio: WavAudio, rate: u32) -> Vec<i16> {
    let from = audio.sample_rate;
    let mono = audio.into_mono();
    if from == rate {
        return mono;
    }
    let samples: Vec<f64> = mono.iter().map(|&s| s as f64).collect();
    resample_samples(&samples, from, rate, ResampleMethod::Cubic)
        .into_iter()
        .map(|v| v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dsp::g711::pcm_to_alaw;
    use tempfile::tempdir;

    #[test]
    fn test_capture_writer_decodes_alaw() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("call_out.wav");

        let pcm = vec![0i16, 4000, -4000, 12000];
        let mut writer = CaptureWriter::create(&path, TELEPHONY_SAMPLE_RATE).unwrap();
        writer.write_alaw(&pcm_to_alaw(&pcm)).unwrap();
        assert_eq!(writer.frames(), 4);
        writer.finalize().unwrap();

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.samples.len(), 4);
        for (decoded, original) in audio.samples.iter().zip(&pcm) {
            assert!((*decoded as i32 - *original as i32).abs() <= 256);
        }
    }

    #[test]
    fn test_mix_sums_and_pads() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        let out = dir.path().join("mixed.wav");

        write_wav(&a, 8000, 1, &[100, 200, 300, 30000]).unwrap();
        write_wav(&b, 8000, 1, &[1, 2, 3, 30000, 5]).unwrap();
        mix_files(&a, &b, &out).unwrap();

        let mixed = read_wav(&out).unwrap();
        assert_eq!(mixed.samples, vec![101, 202, 303, i16::MAX, 5]);
    }

    #[test]
    fn test_mix_resamples_mismatched_rates() {
        let dir = tempdir().unwrap();
        let narrow = dir.path().join("narrow.wav");
        let wide = dir.path().join("wide.wav");
        let out = dir.path().join("mixed.wav");

        write_wav(&narrow, 8000, 1, &[1000; 80]).unwrap();
        write_wav(&wide, 16000, 1, &[0; 100]).unwrap();
        mix_files(&narrow, &wide, &out).unwrap();

        let mixed = read_wav(&out).unwrap();
        assert_eq!(mixed.sample_rate, 16000);
        assert_eq!(mixed.samples.len(), 160);
        assert!(mixed.samples.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_stereo_input_is_downmixed() {
        let dir = tempdir().unwrap();
        let stereo = dir.path().join("stereo.wav");
        write_wav(&stereo, 8000, 2, &[100, 300, -100, -300]).unwrap();

        let audio = read_wav(&stereo).unwrap();
        assert_eq!(audio.into_mono(), vec![200, -200]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = read_wav(dir.path().join("absent.wav"));
        assert!(result.is_err());
    }
}
