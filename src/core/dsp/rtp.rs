//! RTP fixed-header framing (RFC 3550 §5.1).
//!
//! Only the 12-byte fixed header is produced. Parsing tolerates CSRC lists,
//! header extensions and padding on inbound packets since the PBX may send
//! them even though it never receives them from us.

use bytes::{BufMut, Bytes, BytesMut};

use super::{DspError, DspResult};

/// Length of the fixed RTP header.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP version carried in the top two bits.
const RTP_VERSION: u8 = 2;

/// Payload type for G.711 A-law.
pub const PAYLOAD_TYPE_PCMA: u8 = 8;

/// Fixed RTP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header for one A-law frame.
    pub fn pcma(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            payload_type: PAYLOAD_TYPE_PCMA,
            marker: false,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Write the 12 header bytes.
    pub fn write_to(&self, buf: &mut BytesMut) {
        // V=2, P=0, X=0, CC=0
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// Parse the fixed header from the start of a packet.
    pub fn parse(packet: &[u8]) -> DspResult<Self> {
        if packet.len() < RTP_HEADER_LEN {
            return Err(DspError::InvalidInput(format!(
                "RTP packet too short: {} bytes",
                packet.len()
            )));
        }
        let version = packet[0] >> 6;
        if version != RTP_VERSION {
            return Err(DspError::InvalidInput(format!(
                "unsupported RTP version {version}"
            )));
        }
        Ok(Self {
            payload_type: packet[1] & 0x7F,
            marker: packet[1] & 0x80 != 0,
            sequence: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
        })
    }
}

/// Build a complete RTP packet: fixed header followed by the payload.
pub fn build_packet(header: &RtpHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + payload.len());
    header.write_to(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Strip the RTP header (CSRCs, extension and padding included) and return the
/// payload.
///
/// With `swap16` set, every byte pair of the payload is swapped, converting
/// network-order L16 audio to little-endian samples.
pub fn strip_header(packet: &[u8], swap16: bool) -> DspResult<Vec<u8>> {
    RtpHeader::parse(packet)?;

    let has_padding = packet[0] & 0x20 != 0;
    let has_extension = packet[0] & 0x10 != 0;
    let csrc_count = (packet[0] & 0x0F) as usize;

    let mut start = RTP_HEADER_LEN + csrc_count * 4;
    if has_extension {
        if packet.len() < start + 4 {
            return Err(DspError::InvalidInput(
                "RTP extension header truncated".to_string(),
            ));
        }
        let words = u16::from_be_bytes([packet[start + 2], packet[start + 3]]) as usize;
        start += 4 + words * 4;
    }

    let mut end = packet.len();
    if has_padding && end > start {
        let pad = packet[end - 1] as usize;
        end = end.saturating_sub(pad);
    }
    if start > end {
        return Err(DspError::InvalidInput(format!(
            "RTP header length {start} exceeds packet length {end}"
        )));
    }

    let mut payload = packet[start..end].to_vec();
    if swap16 {
        for pair in payload.chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
    }
    Ok(payload)
}
