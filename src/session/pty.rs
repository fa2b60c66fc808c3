//! Pty-backed process attachment.
//!
//! Each session owns one process spawned under a native pty. A dedicated OS
//! thread blocks on the pty reader and appends combined stdout/stderr to the
//! session's output buffer; it unblocks on EOF when the process exits or is
//! killed.

use std::io::{Read, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::watch;

use super::{OutputBuffer, SessionError};

/// How long a terminated process is given to exit before SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// A process attached to a pty, plus its reader thread.
pub struct PtyProcess {
    pid: Option<u32>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    alive: Arc<AtomicBool>,
    exited: watch::Receiver<bool>,
}

impl PtyProcess {
    /// Spawn `program args...` under a fresh pty of the given size, draining
    /// its output into `buffer` from a named background thread.
    pub fn spawn(
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        cols: u16,
        rows: u16,
        buffer: OutputBuffer,
        thread_label: &str,
    ) -> Result<Arc<Self>, SessionError> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(size)
            .map_err(|err| SessionError::Attach(format!("openpty: {err}")))?;

        let mut cmd = CommandBuilder::new(program);
        for arg in args {
            cmd.arg(arg);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| SessionError::Attach(format!("spawn {program}: {err}")))?;
        let killer = child.clone_killer();
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| SessionError::Attach(format!("pty reader: {err}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| SessionError::Attach(format!("pty writer: {err}")))?;

        let alive = Arc::new(AtomicBool::new(true));
        let (exit_tx, exit_rx) = watch::channel(false);

        let thread_alive = alive.clone();
        let thread_name = format!("pty-reader-{thread_label}");
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut reader = reader;
                let mut child = child;
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.push(&buf[..n]),
                    }
                }
                match child.wait() {
                    Ok(status) => debug!("pty child exited: {status:?}"),
                    Err(err) => debug!("pty child wait failed: {err}"),
                }
                thread_alive.store(false, Ordering::SeqCst);
                let _ = exit_tx.send(true);
            })
            .map_err(|err| SessionError::Attach(format!("reader thread: {err}")))?;

        Ok(Arc::new(Self {
            pid,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            alive,
            exited: exit_rx,
        }))
    }

    /// Whether the process has not yet exited.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Resolves once the process has exited and its output is fully drained
    /// into the buffer. Returns immediately for an already-exited process.
    pub async fn wait_exited(&self) {
        let mut rx = self.exited.clone();
        // the sender living on the reader thread cannot drop before sending
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Write raw input bytes to the process's stdin.
    pub fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(bytes)?;
        writer.flush()
    }

    /// Apply a new terminal size.
    pub fn resize(&self, cols: u16, rows: u16) {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        if let Err(err) = self.master.lock().unwrap().resize(size) {
            warn!("pty resize to {cols}x{rows} failed: {err}");
        }
    }

    /// Terminate the process: SIGTERM first, SIGKILL if it has not exited
    /// within the grace period. No-op if the process already exited.
    pub async fn terminate(&self) {
        if !self.is_alive() {
            return;
        }

        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let deadline = tokio::time::Instant::now() + TERM_GRACE;
        while tokio::time::Instant::now() < deadline {
            if !self.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        warn!("pty child did not exit after SIGTERM, force killing");
        if let Err(err) = self.killer.lock().unwrap().kill() {
            debug!("force kill failed (process likely gone): {err}");
        }
    }
}
