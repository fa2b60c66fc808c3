//! Session bridging between WebSocket clients and sandbox processes.

pub mod pty;
pub mod run;
pub mod templates;
pub mod terminal;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::container::ContainerError;

/// Errors fatal to a single session attempt.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown project template: {0}")]
    UnknownTemplate(String),

    #[error("failed to attach process: {0}")]
    Attach(String),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// Context attached to a connection by the handshake boundary.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Verified identity owning the session.
    pub identity: String,
    /// Resolved project identifier.
    pub project: String,
    /// Host-side workspace directory bind-mounted into the sandbox.
    pub workspace: PathBuf,
    /// Run-command template key (run sessions only).
    pub template: Option<String>,
}

// ============================================================================
// Inbound message classification
// ============================================================================

/// What an inbound client message means.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Apply a new terminal size (debounced).
    Resize { cols: u16, rows: u16 },
    /// Terminate the attached process, keep the session open.
    Stop,
    /// Raw keystroke/input bytes for the process stdin.
    Input(String),
}

#[derive(Deserialize)]
struct ResizeMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    cols: u16,
    #[serde(default)]
    rows: u16,
}

/// Classify an inbound text payload.
///
/// A JSON object with `type: "resize"` and positive dimensions is a resize
/// request; the literal `STOP` token (trimmed, any case) terminates the
/// process; everything else, including malformed JSON, is raw input.
pub fn classify(payload: &str) -> Inbound {
    if payload.starts_with('{') {
        if let Ok(msg) = serde_json::from_str::<ResizeMessage>(payload) {
            if msg.kind == "resize" && msg.cols > 0 && msg.rows > 0 {
                return Inbound::Resize {
                    cols: msg.cols,
                    rows: msg.rows,
                };
            }
        }
    }

    if payload.trim().eq_ignore_ascii_case("STOP") {
        return Inbound::Stop;
    }

    Inbound::Input(payload.to_string())
}

// ============================================================================
// Output batching
// ============================================================================

/// Per-session output accumulator.
///
/// The pty reader thread appends; the flush timer drains the whole buffer as
/// one batch. Single producer plus single drainer preserves byte order.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().extend_from_slice(bytes);
    }

    /// Take everything accumulated so far. Empty vec when nothing is pending.
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }

    /// Take accumulated bytes up to the last complete UTF-8 boundary. A
    /// trailing incomplete sequence stays in the buffer until the bytes
    /// completing it arrive, so a character falling across two drains is
    /// never mangled. Bytes that nothing can complete are shipped as-is.
    pub fn drain_utf8(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        let split = inner.len() - incomplete_utf8_suffix(&inner);
        let tail = inner.split_off(split);
        std::mem::replace(&mut *inner, tail)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Length of an incomplete UTF-8 sequence at the end of `bytes`, 0 when the
/// slice ends on a character boundary. A multi-byte leading byte can sit at
/// most 3 positions from the end while still lacking continuation bytes;
/// anything else (ASCII tail, complete sequence, stray continuation bytes
/// no input can repair) counts as complete.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let b = bytes[len - back];
        if b < 0x80 {
            return 0;
        }
        if b >= 0xC0 {
            let need = if b >= 0xF0 {
                4
            } else if b >= 0xE0 {
                3
            } else {
                2
            };
            return if need > back { back } else { 0 };
        }
    }
    0
}

// ============================================================================
// Resize debouncing
// ============================================================================

/// Applies only the last of a burst of resize requests.
///
/// Each `schedule` call cancels the previously pending application and
/// re-arms the delay, so dragging a terminal border settles into a single
/// engine-visible resize.
pub struct ResizeDebouncer {
    delay: std::time::Duration,
    pending: Option<JoinHandle<()>>,
}

impl ResizeDebouncer {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn schedule<F>(&mut self, apply: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            apply();
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for ResizeDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Shared bridge plumbing
// ============================================================================

/// Outbound channel depth per connection; senders back off when the socket
/// cannot keep up.
pub(crate) const OUTBOUND_CAPACITY: usize = 64;

/// Forwards queued outbound frames to the socket until the channel closes or
/// the peer goes away, then closes the sink.
pub(crate) async fn forward_outbound(
    mut rx: mpsc::Receiver<Message>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Drains the session output buffer on a fixed cadence, shipping each batch
/// as a single text frame. Exits when the outbound channel is gone.
pub(crate) fn spawn_flush(
    buffer: OutputBuffer,
    tx: mpsc::Sender<Message>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let bytes = buffer.drain_utf8();
            if bytes.is_empty() {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn classify_resize() {
        assert_eq!(
            classify(r#"{"type":"resize","cols":80,"rows":24}"#),
            Inbound::Resize { cols: 80, rows: 24 }
        );
    }

    #[test]
    fn classify_rejects_nonpositive_resize() {
        // zero dimensions fall through to raw input, as the original does
        let payload = r#"{"type":"resize","cols":0,"rows":24}"#;
        assert_eq!(classify(payload), Inbound::Input(payload.to_string()));
    }

    #[test]
    fn classify_stop_token() {
        assert_eq!(classify("STOP"), Inbound::Stop);
        assert_eq!(classify("stop"), Inbound::Stop);
        assert_eq!(classify("  Stop \n"), Inbound::Stop);
    }

    #[test]
    fn classify_malformed_json_is_input() {
        let payload = r#"{"type":"resize""#;
        assert_eq!(classify(payload), Inbound::Input(payload.to_string()));
    }

    #[test]
    fn classify_keystrokes_are_input() {
        assert_eq!(classify("ls -la\r"), Inbound::Input("ls -la\r".to_string()));
        assert_eq!(classify("\u{3}"), Inbound::Input("\u{3}".to_string()));
    }

    #[test]
    fn output_buffer_preserves_order_and_coalesces() {
        let buffer = OutputBuffer::new();
        for chunk in [b"one ".as_slice(), b"two ", b"three"] {
            buffer.push(chunk);
        }

        // many pushes, one batch, exact byte sequence
        assert_eq!(buffer.drain(), b"one two three");
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn output_buffer_concurrent_pushes_lose_nothing() {
        let buffer = OutputBuffer::new();
        let writer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..1000u32 {
                    buffer.push(format!("{i};").as_bytes());
                }
            })
        };

        let mut collected = Vec::new();
        while collected.iter().filter(|&&b| b == b';').count() < 1000 {
            collected.extend(buffer.drain());
            std::thread::yield_now();
        }
        writer.join().unwrap();
        collected.extend(buffer.drain());

        let text = String::from_utf8(collected).unwrap();
        let numbers: Vec<u32> = text
            .split_terminator(';')
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(numbers, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn drain_utf8_holds_back_split_character() {
        let buffer = OutputBuffer::new();
        let hangul = "한".as_bytes();

        buffer.push(&hangul[..2]);
        assert!(buffer.drain_utf8().is_empty());
        assert!(!buffer.is_empty());

        buffer.push(&hangul[2..]);
        assert_eq!(buffer.drain_utf8(), hangul);
    }

    #[test]
    fn drain_utf8_passes_complete_text_through() {
        let buffer = OutputBuffer::new();
        buffer.push("ascii und höheres 한글".as_bytes());
        assert_eq!(buffer.drain_utf8(), "ascii und höheres 한글".as_bytes());
    }

    #[test]
    fn drain_utf8_ships_unrepairable_bytes() {
        // stray continuation bytes are not completable, so don't hold them
        let buffer = OutputBuffer::new();
        buffer.push(&[0x80, 0x80]);
        assert_eq!(buffer.drain_utf8(), vec![0x80, 0x80]);
    }

    #[tokio::test]
    async fn flush_reassembles_character_split_across_ticks() {
        let buffer = OutputBuffer::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let flusher = spawn_flush(buffer.clone(), tx, Duration::from_millis(10));

        let hangul = "한".as_bytes();
        buffer.push(&hangul[..2]);
        tokio::time::sleep(Duration::from_millis(40)).await;
        buffer.push(&hangul[2..]);
        tokio::time::sleep(Duration::from_millis(40)).await;
        flusher.abort();

        let mut text = String::new();
        while let Ok(Message::Text(chunk)) = rx.try_recv() {
            text.push_str(&chunk);
        }
        assert_eq!(text, "한");
    }

    #[tokio::test]
    async fn debounce_applies_only_final_resize() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut debouncer = ResizeDebouncer::new(Duration::from_millis(50));

        for (cols, rows) in [(10, 10), (20, 20), (30, 30), (40, 40), (80, 24)] {
            let applied = applied.clone();
            debouncer.schedule(move || {
                applied.lock().unwrap().push((cols, rows));
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*applied.lock().unwrap(), vec![(80, 24)]);
    }

    #[tokio::test]
    async fn debounce_cancel_discards_pending() {
        let applied = Arc::new(Mutex::new(Vec::<(u16, u16)>::new()));
        let mut debouncer = ResizeDebouncer::new(Duration::from_millis(30));

        {
            let applied = applied.clone();
            debouncer.schedule(move || applied.lock().unwrap().push((1, 1)));
        }
        debouncer.cancel();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(applied.lock().unwrap().is_empty());
    }
}
