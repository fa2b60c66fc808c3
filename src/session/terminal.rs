//! Interactive shell sessions.
//!
//! Bridges one WebSocket connection to a login shell running inside the
//! identity's sandbox. Output is batched on a short flush interval, resize
//! requests are debounced, and a `STOP` token kills the shell without
//! closing the connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::StreamExt;
use log::{debug, error, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::AppState;
use crate::container::container_name;

use super::pty::PtyProcess;
use super::{
    Inbound, OUTBOUND_CAPACITY, OutputBuffer, ResizeDebouncer, SessionContext, SessionError,
    classify, forward_outbound, spawn_flush,
};

/// Initial pty dimensions until the client reports its own.
pub(crate) const INITIAL_COLS: u16 = 120;
pub(crate) const INITIAL_ROWS: u16 = 30;

pub(crate) const TERM_ENV: (&str, &str) = ("TERM", "xterm-256color");

const CONNECTED_BANNER: &str = "\x1b[32m[Terminal Connected]\x1b[0m\r\n";

/// Drive a terminal session over an upgraded socket until the client leaves
/// or setup fails.
pub async fn serve(state: AppState, ctx: SessionContext, socket: WebSocket) {
    let session_id = Uuid::new_v4();
    info!(
        "terminal session {session_id} opened: identity={} project={}",
        ctx.identity, ctx.project
    );

    let (sink, stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(forward_outbound(out_rx, sink));

    if let Err(err) = bridge(&state, &ctx, out_tx.clone(), stream).await {
        error!("terminal session {session_id} failed: {err}");
        let _ = out_tx
            .send(Message::Text(
                format!("\x1b[31m[Session Error] {err}\x1b[0m\r\n").into(),
            ))
            .await;
        let _ = out_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: "session setup failed".into(),
            })))
            .await;
    }

    // Dropping the last sender lets the writer task drain and close the sink.
    drop(out_tx);
    let _ = writer.await;
    info!("terminal session {session_id} closed");
}

async fn bridge(
    state: &AppState,
    ctx: &SessionContext,
    out_tx: mpsc::Sender<Message>,
    mut stream: futures::stream::SplitStream<WebSocket>,
) -> Result<(), SessionError> {
    state
        .manager
        .ensure_running(&ctx.identity, &ctx.workspace)
        .await?;
    state.tracker.mark_active(&ctx.identity);

    let buffer = OutputBuffer::new();
    let container = container_name(&ctx.identity);
    let pty = PtyProcess::spawn(
        &state.engine_binary,
        &["exec", "-it", &container, "/bin/bash", "--login"],
        &[TERM_ENV],
        INITIAL_COLS,
        INITIAL_ROWS,
        buffer.clone(),
        &ctx.identity,
    )?;

    let _ = out_tx.send(Message::Text(CONNECTED_BANNER.into())).await;

    let flusher = spawn_flush(buffer, out_tx.clone(), state.bridge.flush_interval());
    let mut debouncer = ResizeDebouncer::new(state.bridge.resize_debounce());

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                debug!("terminal socket error for {}: {err}", ctx.identity);
                break;
            }
        };
        state.tracker.mark_active(&ctx.identity);

        match msg {
            Message::Text(text) => match classify(&text) {
                Inbound::Resize { cols, rows } => {
                    let pty = pty.clone();
                    debouncer.schedule(move || pty.resize(cols, rows));
                }
                Inbound::Stop => {
                    // Kill the shell only; the connection stays usable.
                    pty.terminate().await;
                }
                Inbound::Input(data) => {
                    if let Err(err) = pty.write(data.as_bytes()) {
                        debug!("input write for {} failed: {err}", ctx.identity);
                    }
                }
            },
            Message::Binary(data) => {
                if let Err(err) = pty.write(&data) {
                    debug!("input write for {} failed: {err}", ctx.identity);
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    debouncer.cancel();
    flusher.abort();
    pty.terminate().await;
    Ok(())
}
