//! Stateless audio primitives used by the RTP path and the recorders.
//!
//! # Modules
//! - `g711`: A-law / μ-law companding to and from 16-bit linear PCM
//! - `resample`: linear and 4-tap cubic sample-rate conversion
//! - `rtp`: 12-byte RTP header build and strip
//! - `wav`: capture writers, WAV read/write and two-file mixing
//!
//! Everything here is a pure function or a thin wrapper around a file handle;
//! no module keeps global state.

pub mod g711;
pub mod resample;
pub mod rtp;
pub mod wav;

use thiserror::Error;

pub use g711::{alaw_to_pcm, pcm_to_alaw, pcm_to_ulaw, ulaw_to_pcm};
pub use resample::{ResampleMethod, SampleWidth, resample, resample_samples};
pub use rtp::{RTP_HEADER_LEN, RtpHeader, build_packet, strip_header};
pub use wav::{CaptureWriter, mix_files, read_wav, write_wav};

/// Errors produced by DSP routines.
#[derive(Debug, Error)]
pub enum DspError {
    /// Input buffer is malformed (wrong length, bad header)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sample format or container variant not supported
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// WAV container error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for DSP operations.
pub type DspResult<T> = Result<T, DspError>;
