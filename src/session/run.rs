//! Run sessions: non-interactive project execution.
//!
//! Resolves the project's template to a run command, executes it inside the
//! sandbox under a pty, and streams the output back. The client cannot type
//! into the process; the only meaningful inbound payload is the `STOP`
//! token. Shortly after start a one-shot probe looks for a listening port
//! and announces it so the client can open a preview.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::AppState;
use crate::container::{ContainerEngine, container_name};

use super::pty::PtyProcess;
use super::terminal::{INITIAL_COLS, INITIAL_ROWS, TERM_ENV};
use super::{
    Inbound, OUTBOUND_CAPACITY, OutputBuffer, SessionContext, SessionError, classify,
    forward_outbound, spawn_flush,
};

const STOPPING_NOTICE: &str = "\x1b[33m[Stopping...]\x1b[0m\r\n";
const EXITED_NOTICE: &str = "\x1b[90m[Process exited]\x1b[0m\r\n";

/// Shell snippet listing listening TCP sockets inside the sandbox.
const PORT_PROBE: &str = "ss -tln 2>/dev/null || netstat -tln 2>/dev/null";

pub async fn serve(state: AppState, ctx: SessionContext, socket: WebSocket) {
    let session_id = Uuid::new_v4();
    info!(
        "run session {session_id} opened: identity={} project={} template={:?}",
        ctx.identity, ctx.project, ctx.template
    );

    let (sink, stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(forward_outbound(out_rx, sink));

    if let Err(err) = bridge(&state, &ctx, out_tx.clone(), stream).await {
        error!("run session {session_id} failed: {err}");
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

    drop(out_tx);
    let _ = writer.await;
    info!("run session {session_id} closed");
}

async fn bridge(
    state: &AppState,
    ctx: &SessionContext,
    out_tx: mpsc::Sender<Message>,
    mut stream: futures::stream::SplitStream<WebSocket>,
) -> Result<(), SessionError> {
    let template = ctx.template.as_deref().unwrap_or_default();
    let command = state.templates.resolve(template)?.to_string();

    state
        .manager
        .ensure_running(&ctx.identity, &ctx.workspace)
        .await?;
    state.tracker.mark_active(&ctx.identity);

    let buffer = OutputBuffer::new();
    let container = container_name(&ctx.identity);
    let pty = PtyProcess::spawn(
        &state.engine_binary,
        &["exec", "-it", &container, "bash", "-lc", &command],
        &[TERM_ENV],
        INITIAL_COLS,
        INITIAL_ROWS,
        buffer.clone(),
        &ctx.identity,
    )?;

    let _ = out_tx
        .send(Message::Text(
            format!(
                "\x1b[36m[Run Started]\x1b[0m\r\n\x1b[90mCommand: {command}\x1b[0m\r\n"
            )
            .into(),
        ))
        .await;

    let flusher = spawn_flush(buffer, out_tx.clone(), state.bridge.flush_interval());
    let prober = tokio::spawn(detect_port(
        state.engine.clone(),
        container,
        out_tx.clone(),
        state.bridge.port_probe_delay(),
    ));

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(err)) => {
                        debug!("run socket error for {}: {err}", ctx.identity);
                        break;
                    }
                    None => break,
                };
                state.tracker.mark_active(&ctx.identity);

                match msg {
                    Message::Text(text) => {
                        if classify(&text) == Inbound::Stop && pty.is_alive() {
                            let _ = out_tx.send(Message::Text(STOPPING_NOTICE.into())).await;
                            pty.terminate().await;
                        }
                        // Run sessions are not interactive; other input is dropped.
                    }
                    Message::Close(_) => break,
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            _ = pty.wait_exited() => {
                // let the flusher ship the final output before the notice
                tokio::time::sleep(state.bridge.flush_interval() * 2).await;
                let _ = out_tx.send(Message::Text(EXITED_NOTICE.into())).await;
                break;
            }
        }
    }

    prober.abort();
    flusher.abort();
    pty.terminate().await;
    Ok(())
}

/// Best effort: wait for the process to come up, then announce the first
/// listening port found inside the sandbox. Silence on failure.
async fn detect_port(
    engine: Arc<dyn ContainerEngine>,
    container: String,
    tx: mpsc::Sender<Message>,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    match engine.exec_capture(&container, &["sh", "-lc", PORT_PROBE]).await {
        Ok(output) => {
            if let Some(port) = parse_listen_port(&output) {
                info!("detected listening port {port} in {container}");
                let _ = tx
                    .send(Message::Text(
                        format!("\x1b[32m[PORT DETECTED] {port}\x1b[0m\r\n").into(),
                    ))
                    .await;
            }
        }
        Err(err) => warn!("port probe in {container} failed: {err}"),
    }
}

/// Pull the first local listening port out of `ss -tln`/`netstat -tln`
/// output. Header lines and wildcard peer columns parse to nothing and are
/// skipped.
fn parse_listen_port(output: &str) -> Option<u16> {
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("State") || line.starts_with("Proto") {
            continue;
        }
        for token in line.split_whitespace() {
            if let Some(idx) = token.rfind(':') {
                if let Ok(port) = token[idx + 1..].parse::<u16>() {
                    if port > 0 {
                        return Some(port);
                    }
                }
            }
        }
    }
    None
}
