//! In-process stand-ins for the PBX and the realtime AI service.
//!
//! - [`MockPbx`]: one TCP listener serving both the control API (every
//!   request is recorded and answered) and the event WebSocket
//! - [`MockRealtime`]: a realtime AI WebSocket endpoint that records client
//!   frames and forwards scripted server frames

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_async, accept_hdr_async};

/// Poll `condition` every 10 ms for up to two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Mock PBX
// =============================================================================

/// PBX control API and event stream on one port.
pub struct MockPbx {
    pub port: u16,
    /// `METHOD /path?query` of every control request, in order
    pub requests: Arc<Mutex<Vec<String>>>,
    pub ws_connections: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<Message>,
}

impl MockPbx {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let ws_connections = Arc::new(AtomicUsize::new(0));
        let (events, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let recorded = requests.clone();
        let connections = ws_connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let connections = connections.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    let head = peek_head(&stream).await;
                    if head.to_ascii_lowercase().contains("upgrade: websocket") {
                        connections.fetch_add(1, Ordering::SeqCst);
                        serve_events(stream, rx).await;
                    } else {
                        serve_control(stream, recorded).await;
                    }
                });
            }
        });

        Self {
            port,
            requests,
            ws_connections,
            events,
        }
    }

    /// Control API base URL.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/ari", self.port)
    }

    /// Push one event to the connected event socket.
    pub fn send_event(&self, event: Value) {
        let _ = self.events.send(Message::Text(event.to_string().into()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.events.send(Message::Text(text.to_string().into()));
    }

    /// Close the event socket from the server side.
    pub fn close_events(&self) {
        let _ = self.events.send(Message::Close(None));
    }

    pub fn requests_matching(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }
}

async fn peek_head(stream: &TcpStream) -> String {
    let mut buf = vec![0u8; 4096];
    for _ in 0..100 {
        let n = stream.peek(&mut buf).await.unwrap_or(0);
        let text = String::from_utf8_lossy(&buf[..n]).to_string();
        if n == 0 || text.contains("\r\n\r\n") || n == buf.len() {
            return text;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    String::new()
}

async fn serve_control(mut stream: TcpStream, recorded: Arc<Mutex<Vec<String>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < head_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    recorded.lock().push(format!("{method} {target}"));

    let (status, body) = if target.starts_with("/ari/asterisk/info") {
        ("200 OK", json!({"system": {"version": "20.5.0"}}).to_string())
    } else {
        ("204 No Content", String::new())
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn serve_events(
    stream: TcpStream,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let mut rx = rx.lock().await;
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Message::Close(frame)) => {
                    let _ = write.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// =============================================================================
// Mock realtime AI service
// =============================================================================

/// Realtime AI endpoint accepting one session at a time.
pub struct MockRealtime {
    pub port: u16,
    /// Decoded client frames, in arrival order
    pub received: Arc<Mutex<Vec<Value>>>,
    /// `Authorization` header of the last handshake
    pub authorization: Arc<Mutex<Option<String>>>,
    frames: mpsc::UnboundedSender<Message>,
}

impl MockRealtime {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let authorization = Arc::new(Mutex::new(None));
        let (frames, rx) = mpsc::unbounded_channel::<Message>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let recorded = received.clone();
        let auth = authorization.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let auth = auth.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    let callback = |request: &Request,
                                    response: Response|
                     -> Result<Response, ErrorResponse> {
                        *auth.lock() = request
                            .headers()
                            .get("Authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Ok(response)
                    };
                    let Ok(ws) = accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    let mut rx = rx.lock().await;
                    let created = json!({
                        "type": "session.created",
                        "session": {"id": "sess_mock"}
                    });
                    let _ = write.send(Message::Text(created.to_string().into())).await;
                    loop {
                        tokio::select! {
                            outbound = rx.recv() => match outbound {
                                Some(Message::Close(frame)) => {
                                    let _ = write.send(Message::Close(frame)).await;
                                    break;
                                }
                                Some(message) => {
                                    if write.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            inbound = read.next() => match inbound {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                        recorded.lock().push(value);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        Self {
            port,
            received,
            authorization,
            frames,
        }
    }

    /// Base URL without the model parameter.
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/v1/realtime", self.port)
    }

    pub fn send(&self, frame: Value) {
        let _ = self.frames.send(Message::Text(frame.to_string().into()));
    }

    pub fn close(&self) {
        let _ = self.frames.send(Message::Close(None));
    }

    /// Types of the client frames received so far.
    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count(&self, frame_type: &str) -> usize {
        self.received_types()
            .iter()
            .filter(|t| t.as_str() == frame_type)
            .count()
    }
}
