//! Sample-rate conversion.
//!
//! Two interpolators are provided:
//! - [`ResampleMethod::Linear`]: two-point linear interpolation, cheap and
//!   adequate for integer-ratio conversions between telephony rates
//! - [`ResampleMethod::Cubic`]: four-tap Catmull-Rom interpolation for general
//!   ratios where the linear method's high-frequency droop is audible
//!
//! Byte-level input is little-endian signed PCM of 8, 16 or 32 bits with
//! interleaved channels. Channels are split, converted independently and
//! interleaved again.

use super::{DspError, DspResult};

/// Width of one signed PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    /// Signed 8-bit
    Bits8,
    /// Signed 16-bit little-endian
    Bits16,
    /// Signed 32-bit little-endian
    Bits32,
}

impl SampleWidth {
    /// Bytes per sample.
    #[inline]
    pub fn bytes(&self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::Bits32 => 4,
        }
    }

    /// Parse from a bit count.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(Self::Bits8),
            16 => Some(Self::Bits16),
            32 => Some(Self::Bits32),
            _ => None,
        }
    }

    fn range(&self) -> (f64, f64) {
        match self {
            Self::Bits8 => (i8::MIN as f64, i8::MAX as f64),
            Self::Bits16 => (i16::MIN as f64, i16::MAX as f64),
            Self::Bits32 => (i32::MIN as f64, i32::MAX as f64),
        }
    }

    fn decode(&self, bytes: &[u8]) -> f64 {
        match self {
            Self::Bits8 => bytes[0] as i8 as f64,
            Self::Bits16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::Bits32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        }
    }

    fn encode(&self, value: f64, out: &mut Vec<u8>) {
        let (min, max) = self.range();
        let clamped = value.round().clamp(min, max);
        match self {
            Self::Bits8 => out.push(clamped as i8 as u8),
            Self::Bits16 => out.extend_from_slice(&(clamped as i16).to_le_bytes()),
            Self::Bits32 => out.extend_from_slice(&(clamped as i32).to_le_bytes()),
        }
    }
}

/// Interpolation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMethod {
    /// Two-point linear interpolation
    #[default]
    Linear,
    /// Four-tap Catmull-Rom cubic interpolation
    Cubic,
}

/// Resample interleaved little-endian PCM bytes.
///
/// Returns the input unchanged when `from_rate == to_rate`.
pub fn resample(
    input: &[u8],
    width: SampleWidth,
    channels: u16,
    from_rate: u32,
    to_rate: u32,
    method: ResampleMethod,
) -> DspResult<Vec<u8>> {
    if channels == 0 {
        return Err(DspError::InvalidInput("channel count must be positive".to_string()));
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(DspError::InvalidInput("sample rates must be positive".to_string()));
    }
    let frame_bytes = width.bytes() * channels as usize;
    if input.len() % frame_bytes != 0 {
        return Err(DspError::InvalidInput(format!(
            "buffer of {} bytes is not a whole number of {}-byte frames",
            input.len(),
            frame_bytes
        )));
    }
    if from_rate == to_rate {
        return Ok(input.to_vec());
    }

    let samples: Vec<f64> = input
        .chunks_exact(width.bytes())
        .map(|chunk| width.decode(chunk))
        .collect();

    let planes = deinterleave(&samples, channels as usize);
    let converted: Vec<Vec<f64>> = planes
        .iter()
        .map(|plane| resample_samples(plane, from_rate, to_rate, method))
        .collect();
    let interleaved = interleave(&converted);

    let mut out = Vec::with_capacity(interleaved.len() * width.bytes());
    for value in interleaved {
        width.encode(value, &mut out);
    }
    Ok(out)
}

/// Resample one channel of samples.
pub fn resample_samples(
    samples: &[f64],
    from_rate: u32,
    to_rate: u32,
    method: ResampleMethod,
) -> Vec<f64> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * step;
            match method {
                ResampleMethod::Linear => linear_at(samples, position),
                ResampleMethod::Cubic => cubic_at(samples, position),
            }
        })
        .collect()
}

/// Split interleaved samples into one vector per channel.
pub fn deinterleave(samples: &[f64], channels: usize) -> Vec<Vec<f64>> {
    let frames = samples.len() / channels.max(1);
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (plane, &value) in planes.iter_mut().zip(frame) {
            plane.push(value);
        }
    }
    planes
}

/// Interleave per-channel vectors. Shorter channels are padded with silence.
pub fn interleave(planes: &[Vec<f64>]) -> Vec<f64> {
    let frames = planes.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            out.push(plane.get(i).copied().unwrap_or(0.0));
        }
    }
    out
}

#[inline]
fn sample_clamped(samples: &[f64], index: isize) -> f64 {
    let last = samples.len() as isize - 1;
    samples[index.clamp(0, last) as usize]
}

fn linear_at(samples: &[f64], position: f64) -> f64 {
    let index = position.floor() as isize;
    let frac = position - index as f64;
    let a = sample_clamped(samples, index);
    let b = sample_clamped(samples, index + 1);
    a + (b - a) * frac
}

fn cubic_at(samples: &[f64], position: f64) -> f64 {
    let index = position.floor() as isize;
    let t = position - index as f64;
    let p0 = sample_clamped(samples, index - 1);
    let p1 = sample_clamped(samples, index);
    let p2 = sample_clamped(samples, index + 1);
    let p3 = sample_clamped(samples, index + 2);

    p1 + 0.5
        * t
        * (p2 - p0 + t * (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3 + t * (3.0 * (p1 - p2) + p3 - p0)))
}
