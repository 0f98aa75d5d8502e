//! Keyboard and signal input mapped to playback commands.

use crate::events::{PlaybackCommand, SurfaceSize};
use anyhow::{Context, Result};
use std::io::{self, BufRead, IsTerminal};
use thiserror::Error;
use tokio::select;
use tokio::sync::mpsc::{self, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInput {
    Playback(PlaybackCommand),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlParseError {
    #[error("unknown command `{0}` (n = next, b = back, p = pause, r WxH = resize, q = quit)")]
    Unknown(String),
    #[error("invalid surface size `{0}`; expected WxH")]
    InvalidSize(String),
}

/// Parse one line typed on stdin. An empty line means "next".
pub fn parse_line(line: &str) -> Result<ControlInput, ControlParseError> {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        None | Some("n" | "next") => PlaybackCommand::Next,
        Some("b" | "back" | "previous") => PlaybackCommand::Previous,
        Some("p" | "pause") => PlaybackCommand::TogglePause,
        Some("q" | "quit") => return Ok(ControlInput::Quit),
        Some("r" | "resize") => {
            let raw = words.next().unwrap_or_default();
            let size = parse_size(raw).ok_or_else(|| ControlParseError::InvalidSize(raw.to_string()))?;
            PlaybackCommand::Resize(size)
        }
        Some(other) => return Err(ControlParseError::Unknown(other.to_string())),
    };
    Ok(ControlInput::Playback(command))
}

fn parse_size(raw: &str) -> Option<SurfaceSize> {
    let (w, h) = raw.split_once(['x', 'X'])?;
    let width: u32 = w.parse().ok()?;
    let height: u32 = h.parse().ok()?;
    (width > 0 && height > 0).then_some(SurfaceSize::new(width, height))
}

/// Forward stdin commands and SIGUSR1 until cancelled.
///
/// `q` and end of input cancel the whole pipeline. SIGUSR1 toggles pause.
/// Stdin is only read when it is a terminal.
pub async fn run(to_manager: Sender<PlaybackCommand>, cancel: CancellationToken) -> Result<()> {
    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    // Holding the sender keeps `recv` pending when there is no terminal.
    let _idle_tx = if io::stdin().is_terminal() {
        spawn_stdin_reader(line_tx).context("failed to start stdin reader")?;
        None
    } else {
        debug!("stdin is not a terminal; keyboard controls disabled");
        Some(line_tx)
    };
    let mut toggle = toggle_signal();

    loop {
        let input = select! {
            _ = cancel.cancelled() => break,

            Some(()) = toggle_requested(&mut toggle) => {
                info!("SIGUSR1 received; toggling pause");
                ControlInput::Playback(PlaybackCommand::TogglePause)
            }

            line = line_rx.recv() => match line {
                Some(line) => match parse_line(&line) {
                    Ok(input) => input,
                    Err(err) => {
                        warn!("{err}");
                        continue;
                    }
                },
                None => {
                    info!("stdin closed; initiating shutdown");
                    ControlInput::Quit
                }
            }
        };

        match input {
            ControlInput::Playback(command) => {
                if to_manager.send(command).await.is_err() {
                    warn!("manager channel closed");
                    break;
                }
            }
            ControlInput::Quit => {
                cancel.cancel();
                break;
            }
        }
    }
    Ok(())
}

/// Read stdin lines on a plain thread; a blocking read would otherwise hold
/// up runtime shutdown.
fn spawn_stdin_reader(line_tx: Sender<String>) -> io::Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.blocking_send(line).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("stdin read failed: {err}");
                        return;
                    }
                }
            }
        })
        .map(|_| ())
}

#[cfg(unix)]
fn toggle_signal() -> Option<Signal> {
    match signal(SignalKind::user_defined1()) {
        Ok(sig) => Some(sig),
        Err(err) => {
            warn!("failed to register SIGUSR1 handler: {err}");
            None
        }
    }
}

#[cfg(unix)]
async fn toggle_requested(sig: &mut Option<Signal>) -> Option<()> {
    match sig {
        Some(sig) => sig.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
fn toggle_signal() -> Option<()> {
    None
}

#[cfg(not(unix))]
async fn toggle_requested(_sig: &mut Option<()>) -> Option<()> {
    std::future::pending().await
}
