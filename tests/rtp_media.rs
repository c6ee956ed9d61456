//! Symmetric RTP over one UDP socket: paced outbound frames, inbound
//! routing by source address and the per-call capture files.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::tempdir;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use voxbridge::core::dsp::{RTP_HEADER_LEN, RtpHeader, build_packet, read_wav};
use voxbridge::core::rtp::{
    FRAME_BYTES, InboundAudioSink, RtpIngress, RtpTransport, TransportConfig, UdpPacketSender,
};

struct Media {
    transport: Arc<RtpTransport>,
    ingress: Arc<RtpIngress>,
    shutdown: CancellationToken,
}

async fn media(config: TransportConfig) -> Media {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let transport = Arc::new(RtpTransport::new(
        Arc::new(UdpPacketSender::new(socket.clone())),
        config,
    ));
    let ingress = Arc::new(RtpIngress::new(socket, transport.clone()));
    let shutdown = CancellationToken::new();
    tokio::spawn(ingress.clone().run(shutdown.clone()));
    Media {
        transport,
        ingress,
        shutdown,
    }
}

fn collecting_sink() -> (InboundAudioSink, Arc<Mutex<Vec<Bytes>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink_received = received.clone();
    let sink: InboundAudioSink = Arc::new(move |payload| sink_received.lock().push(payload));
    (sink, received)
}

async fn recv_frame(socket: &UdpSocket) -> (RtpHeader, Vec<u8>) {
    let mut buf = [0u8; 512];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("RTP frame")
        .unwrap();
    let header = RtpHeader::parse(&buf[..n]).unwrap();
    (header, buf[RTP_HEADER_LEN..n].to_vec())
}

#[tokio::test]
async fn test_outbound_frames_come_from_the_ingress_socket() {
    let m = media(TransportConfig::default()).await;
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    m.transport.add_stream("c1", Some(peer_addr));
    m.transport
        .stream_audio("c1", Bytes::from(vec![0x2Au8; FRAME_BYTES * 3]));

    let mut buf = [0u8; 512];
    let (_, source) = peer.recv_from(&mut buf).await.unwrap();
    assert_eq!(source, m.ingress.local_addr().unwrap());

    let (second, _) = recv_frame(&peer).await;
    let (third, payload) = recv_frame(&peer).await;
    assert_eq!(third.sequence, second.sequence.wrapping_add(1));
    assert_eq!(third.timestamp, second.timestamp.wrapping_add(FRAME_BYTES as u32));
    assert_eq!(third.ssrc, second.ssrc);
    assert_eq!(payload.len(), FRAME_BYTES);

    m.transport.remove_stream("c1");
    m.shutdown.cancel();
}

#[tokio::test]
async fn test_inbound_routed_by_source_address() {
    let m = media(TransportConfig::default()).await;
    let caller_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let caller_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let ingress_addr = m.ingress.local_addr().unwrap();

    let (sink_a, received_a) = collecting_sink();
    let (sink_b, received_b) = collecting_sink();
    m.ingress
        .register(caller_a.local_addr().unwrap(), "a", sink_a);
    m.ingress
        .register(caller_b.local_addr().unwrap(), "b", sink_b);

    let packet = build_packet(&RtpHeader::pcma(7, 1120, 42), &[0x11u8; 160]);
    caller_a.send_to(&packet, ingress_addr).await.unwrap();
    let packet = build_packet(&RtpHeader::pcma(9, 1440, 43), &[0x22u8; 160]);
    caller_b.send_to(&packet, ingress_addr).await.unwrap();

    for _ in 0..200 {
        if !received_a.lock().is_empty() && !received_b.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received_a.lock().as_slice(), &[Bytes::from(vec![0x11u8; 160])]);
    assert_eq!(received_b.lock().as_slice(), &[Bytes::from(vec![0x22u8; 160])]);

    m.ingress.session_ended("a");
    assert_eq!(m.ingress.route_count(), 1);
    m.shutdown.cancel();
}

#[tokio::test]
async fn test_call_capture_is_mixed_on_removal() {
    let dir = tempdir().unwrap();
    let m = media(TransportConfig {
        recordings_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    })
    .await;
    let pbx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let pbx_addr = pbx.local_addr().unwrap();
    let ingress_addr = m.ingress.local_addr().unwrap();

    m.transport.add_stream("call-7", Some(pbx_addr));
    let (sink, received) = collecting_sink();
    m.ingress.register(pbx_addr, "call-7", sink);

    m.transport
        .stream_audio("call-7", Bytes::from(vec![0xD5u8; FRAME_BYTES * 2]));
    recv_frame(&pbx).await;
    recv_frame(&pbx).await;

    for seq in 0..3u16 {
        let packet = build_packet(
            &RtpHeader::pcma(seq, seq as u32 * 160, 99),
            &[0x55u8; FRAME_BYTES],
        );
        pbx.send_to(&packet, ingress_addr).await.unwrap();
    }
    for _ in 0..200 {
        if received.lock().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.lock().len(), 3);

    let mix = m.transport.remove_stream("call-7").expect("mix task");
    mix.await.unwrap();

    let inbound = read_wav(dir.path().join("call-7_in.wav")).unwrap();
    let outbound = read_wav(dir.path().join("call-7_out.wav")).unwrap();
    let mixed = read_wav(dir.path().join("call-7.wav")).unwrap();
    assert_eq!(inbound.samples.len(), FRAME_BYTES * 3);
    assert_eq!(outbound.samples.len(), FRAME_BYTES * 2);
    assert_eq!(mixed.sample_rate, 8000);
    assert_eq!(mixed.samples.len(), FRAME_BYTES * 3);
    m.shutdown.cancel();
}
