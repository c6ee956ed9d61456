//! Paced outbound RTP.
//!
//! One stream per call, keyed by channel id. Audio from the realtime model is
//! queued per stream and sent by a drain task in 160-byte / 20 ms frames,
//! anchored to the drain start so scheduler jitter does not accumulate.
//!
//! # Locking
//!
//! The id → stream map is a `DashMap`; each stream's queue, flags and
//! counters sit behind their own `parking_lot::Mutex`, held only for the
//! synchronous bookkeeping around each frame and never across an await.
//!
//! # Cancellation
//!
//! An interrupt cancels the stream's token and bumps its generation. A drain
//! task re-checks both under the lock before every frame, so a frame whose
//! slot had not yet arrived is never sent after the interrupt.
//!
//! # Capture
//!
//! Both captures of a call start at the moment the stream is added. Before
//! each write a capture that has fallen behind the call clock is padded with
//! A-law silence, so the assistant's turns line up with the caller's audio
//! when the two files are mixed.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::core::dsp::wav::TELEPHONY_SAMPLE_RATE;
use crate::core::dsp::{CaptureWriter, RtpHeader, build_packet, mix_files};

/// Payload bytes per frame: 20 ms of 8 kHz G.711.
pub const FRAME_BYTES: usize = 160;

/// Wall-clock length of one frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// RTP timestamp increment per frame.
pub const TIMESTAMP_STEP: u32 = FRAME_BYTES as u32;

/// A-law digital silence, used to pad a trailing partial frame.
pub const ALAW_SILENCE: u8 = 0xD5;

/// Default lag, in frames, after which the schedule is re-anchored.
pub const DEFAULT_MAX_CATCHUP_FRAMES: u32 = 5;

/// Gap, in samples, a capture may fall behind the call clock before it is
/// padded with silence. Absorbs ordinary network and scheduler jitter.
const CAPTURE_SLACK_SAMPLES: u64 = 5 * FRAME_BYTES as u64;

// =============================================================================
// Packet sender
// =============================================================================

/// Datagram sink used by the drain loop.
#[async_trait]
pub trait PacketSender: Send + Sync {
    async fn send_to(&self, packet: &[u8], destination: SocketAddr) -> std::io::Result<usize>;
}

/// UDP socket sender.
///
/// Shares the ingress socket so the PBX sees symmetric RTP.
pub struct UdpPacketSender {
    socket: Arc<UdpSocket>,
}

impl UdpPacketSender {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl PacketSender for UdpPacketSender {
    async fn send_to(&self, packet: &[u8], destination: SocketAddr) -> std::io::Result<usize> {
        self.socket.send_to(packet, destination).await
    }
}

// =============================================================================
// Stream state
// =============================================================================

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Directory for `<id>_in.wav`, `<id>_out.wav` and the mixed `<id>.wav`;
    /// `None` disables capture.
    pub recordings_dir: Option<PathBuf>,
    /// Lag beyond which the drain schedule is re-anchored instead of bursting
    /// the backlog.
    pub max_catchup_frames: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recordings_dir: None,
            max_catchup_frames: DEFAULT_MAX_CATCHUP_FRAMES,
        }
    }
}

struct StreamState {
    queue: VecDeque<Bytes>,
    draining: bool,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    cancel: CancellationToken,
    generation: u64,
    destination: Option<SocketAddr>,
    outbound_recorder: Option<CaptureWriter>,
    inbound_recorder: Option<CaptureWriter>,
    /// Sample 0 of both captures
    capture_start: Instant,
}

impl StreamState {
    /// Position both captures should have reached: wall-clock time since the
    /// stream was added, or the other side's length if that is further on.
    fn capture_position(&self) -> u64 {
        let elapsed = Instant::now().saturating_duration_since(self.capture_start);
        let clock = elapsed.as_micros() as u64 * TELEPHONY_SAMPLE_RATE as u64 / 1_000_000;
        let written = |recorder: &Option<CaptureWriter>| recorder.as_ref().map_or(0, |r| r.frames());
        clock
            .max(written(&self.outbound_recorder))
            .max(written(&self.inbound_recorder))
    }
}

/// Write `payload` to `recorder`, first filling any gap beyond
/// [`CAPTURE_SLACK_SAMPLES`] up to `position` with A-law silence so both
/// sides of the call stay aligned for mixing.
fn write_aligned(
    recorder: &mut CaptureWriter,
    position: u64,
    payload: &[u8],
) -> crate::core::dsp::DspResult<()> {
    let behind = position.saturating_sub(recorder.frames());
    if behind > CAPTURE_SLACK_SAMPLES {
        recorder.write_alaw(&vec![ALAW_SILENCE; behind as usize])?;
    }
    recorder.write_alaw(payload)
}

type SharedStream = Arc<Mutex<StreamState>>;

/// Point-in-time view of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSnapshot {
    /// Sequence number of the next frame
    pub sequence: u16,
    /// Timestamp of the next frame
    pub timestamp: u32,
    pub ssrc: u32,
    pub queued_chunks: usize,
    pub draining: bool,
    pub destination: Option<SocketAddr>,
}

// =============================================================================
// RTP Transport
// =============================================================================

/// Per-call paced RTP sender.
pub struct RtpTransport {
    streams: DashMap<String, SharedStream>,
    sender: Arc<dyn PacketSender>,
    config: TransportConfig,
}

impl RtpTransport {
    pub fn new(sender: Arc<dyn PacketSender>, config: TransportConfig) -> Self {
        Self {
            streams: DashMap::new(),
            sender,
            config,
        }
    }

    /// Register a stream. Idempotent: an existing stream keeps its counters
    /// and recorders, only a newly supplied destination is applied.
    pub fn add_stream(&self, id: &str, destination: Option<SocketAddr>) {
        match self.streams.entry(id.to_string()) {
            Entry::Occupied(existing) => {
                let mut state = existing.get().lock();
                if destination.is_some() {
                    state.destination = destination;
                }
                if state.outbound_recorder.is_none() {
                    state.outbound_recorder = self.open_recorder(id, "out");
                }
                debug!(channel_id = %id, "RTP stream already registered");
            }
            Entry::Vacant(slot) => {
                let state = StreamState {
                    queue: VecDeque::new(),
                    draining: false,
                    sequence: rand::random::<u16>(),
                    timestamp: rand::random::<u32>(),
                    ssrc: rand::random::<u32>(),
                    cancel: CancellationToken::new(),
                    generation: 0,
                    destination,
                    outbound_recorder: self.open_recorder(id, "out"),
                    inbound_recorder: self.open_recorder(id, "in"),
                    capture_start: Instant::now(),
                };
                slot.insert(Arc::new(Mutex::new(state)));
                info!(channel_id = %id, destination = ?destination, "RTP stream added");
            }
        }
    }

    /// Set or replace the stream's destination.
    pub fn update_destination(&self, id: &str, destination: SocketAddr) -> bool {
        match self.streams.get(id) {
            Some(stream) => {
                stream.lock().destination = Some(destination);
                debug!(channel_id = %id, %destination, "RTP destination updated");
                true
            }
            None => false,
        }
    }

    /// Remove a stream, stop its drain, close its recorders and start the
    /// background mix. Returns the mix task, if one was started.
    pub fn remove_stream(&self, id: &str) -> Option<JoinHandle<()>> {
        let (_, stream) = self.streams.remove(id)?;

        let (outbound, inbound) = {
            let mut state = stream.lock();
            state.cancel.cancel();
            state.queue.clear();
            state.draining = false;
            state.generation = state.generation.wrapping_add(1);
            (state.outbound_recorder.take(), state.inbound_recorder.take())
        };

        let mut recorded = false;
        for (direction, recorder) in [("out", outbound), ("in", inbound)] {
            if let Some(recorder) = recorder {
                recorded |= recorder.frames() > 0;
                if let Err(e) = recorder.finalize() {
                    warn!(channel_id = %id, "Failed to finalize {} capture: {}", direction, e);
                }
            }
        }
        info!(channel_id = %id, "RTP stream removed");

        let dir = self.config.recordings_dir.clone()?;
        if !recorded {
            return None;
        }
        let id = id.to_string();
        Some(tokio::task::spawn_blocking(move || {
            mix_recordings(&dir, &id);
        }))
    }

    /// Drop queued audio and cancel the in-flight drain (barge-in).
    ///
    /// Counters are left untouched so the next burst continues the sequence.
    pub fn interrupt_stream(&self, id: &str) {
        let Some(stream) = self.stream(id) else {
            return;
        };
        let mut state = stream.lock();
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.queue.clear();
        state.draining = false;
        state.generation = state.generation.wrapping_add(1);
        debug!(channel_id = %id, "RTP stream interrupted");
    }

    /// Queue audio for transmission, starting a drain if none is running.
    pub fn stream_audio(&self, id: &str, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let Some(stream) = self.stream(id) else {
            trace!(channel_id = %id, "Dropping audio for unknown RTP stream");
            return;
        };

        let mut state = stream.lock();
        state.queue.push_back(chunk);
        if state.draining {
            return;
        }
        state.draining = true;

        let drain = Drain {
            id: id.to_string(),
            stream: stream.clone(),
            sender: self.sender.clone(),
            generation: state.generation,
            token: state.cancel.clone(),
            max_catchup_frames: self.config.max_catchup_frames,
        };
        drop(state);
        tokio::spawn(drain.run());
    }

    /// Append caller audio to the inbound capture.
    pub fn record_inbound(&self, id: &str, payload: &[u8]) {
        let Some(stream) = self.stream(id) else {
            return;
        };
        let mut state = stream.lock();
        let position = state.capture_position();
        if let Some(recorder) = state.inbound_recorder.as_mut()
            && let Err(e) = write_aligned(recorder, position, payload)
        {
            warn!(channel_id = %id, "Failed to write inbound capture: {}", e);
        }
    }

    pub fn has_stream(&self, id: &str) -> bool {
        self.streams.contains_key(id)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn snapshot(&self, id: &str) -> Option<StreamSnapshot> {
        let stream = self.stream(id)?;
        let state = stream.lock();
        Some(StreamSnapshot {
            sequence: state.sequence,
            timestamp: state.timestamp,
            ssrc: state.ssrc,
            queued_chunks: state.queue.len(),
            draining: state.draining,
            destination: state.destination,
        })
    }

    fn stream(&self, id: &str) -> Option<SharedStream> {
        self.streams.get(id).map(|entry| entry.value().clone())
    }

    fn open_recorder(&self, id: &str, direction: &str) -> Option<CaptureWriter> {
        let dir = self.config.recordings_dir.as_ref()?;
        let path = dir.join(format!("{id}_{direction}.wav"));
        match CaptureWriter::create(&path, TELEPHONY_SAMPLE_RATE) {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(channel_id = %id, "Failed to open capture {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn mix_recordings(dir: &Path, id: &str) {
    let inbound = dir.join(format!("{id}_in.wav"));
    let outbound = dir.join(format!("{id}_out.wav"));
    let mixed = dir.join(format!("{id}.wav"));

    match mix_files(&inbound, &outbound, &mixed) {
        Ok(()) => info!(channel_id = %id, "Recording mixed to {}", mixed.display()),
        Err(e) => warn!(channel_id = %id, "Failed to mix recording: {}", e),
    }
}

// =============================================================================
// Drain loop
// =============================================================================

struct Drain {
    id: String,
    stream: SharedStream,
    sender: Arc<dyn PacketSender>,
    generation: u64,
    token: CancellationToken,
    max_catchup_frames: u32,
}

impl Drain {
    async fn run(self) {
        let mut start = Instant::now();
        let mut frame_index: u32 = 0;
        let mut pending = BytesMut::new();
        let max_lag = FRAME_DURATION * self.max_catchup_frames;

        loop {
            let mut target = start + FRAME_DURATION * frame_index;
            let now = Instant::now();
            if now.saturating_duration_since(target) > max_lag {
                debug!(
                    channel_id = %self.id,
                    lag_ms = now.saturating_duration_since(target).as_millis() as u64,
                    "RTP drain behind schedule, re-anchoring"
                );
                start = now;
                frame_index = 0;
                target = now;
            }

            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep_until(target) => {}
            }

            let (packet, destination) = {
                let mut state = self.stream.lock();
                if self.token.is_cancelled() || state.generation != self.generation {
                    return;
                }

                while pending.len() < FRAME_BYTES {
                    match state.queue.pop_front() {
                        Some(chunk) => pending.extend_from_slice(&chunk),
                        None => break,
                    }
                }
                if pending.is_empty() {
                    state.draining = false;
                    return;
                }

                let mut frame = pending.split_to(pending.len().min(FRAME_BYTES));
                if frame.len() < FRAME_BYTES {
                    frame.resize(FRAME_BYTES, ALAW_SILENCE);
                }

                let header = RtpHeader::pcma(state.sequence, state.timestamp, state.ssrc);
                state.sequence = state.sequence.wrapping_add(1);
                state.timestamp = state.timestamp.wrapping_add(TIMESTAMP_STEP);

                let position = state.capture_position();
                if let Some(recorder) = state.outbound_recorder.as_mut()
                    && let Err(e) = write_aligned(recorder, position, &frame)
                {
                    warn!(channel_id = %self.id, "Failed to write outbound capture: {}", e);
                }

                (build_packet(&header, &frame), state.destination)
            };

            match destination {
                Some(destination) => {
                    if let Err(e) = self.sender.send_to(&packet, destination).await {
                        warn!(channel_id = %self.id, %destination, "RTP send failed: {}", e);
                    }
                }
                None => trace!(channel_id = %self.id, "No RTP destination yet, frame dropped"),
            }

            frame_index += 1;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
