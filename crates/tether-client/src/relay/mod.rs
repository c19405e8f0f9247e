//! Session relay
//!
//! The top-level orchestrator for one connection attempt: owns the
//! transport, drives the terminal controller, wires the demultiplexer,
//! codec, and sync-back writer together, watches connection health, and
//! reports exactly one [`ConnectionOutcome`].
//!
//! # Event loop
//!
//! Everything runs cooperatively on one `tokio::select!` loop: stdin
//! chunks, inbound transport events, resize events, user signals, the
//! health tick, and the sync-back ack grace timer. Input bytes forward
//! in the order received; inbound frames dispatch in arrival order.
//!
//! # Exactly-once outcome
//!
//! Close, error, and timeout events can race (a transport error and the
//! close it causes, or Ctrl+C against an in-flight `exit` message), so
//! outcome delivery is guarded: the first recorded outcome wins and all
//! later signals are discarded.

pub mod demux;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tether_core::config::ClientConfig;
use tether_core::error::ConnectionError;
use tether_protocol::{self as protocol, ControlMessage, CLOSE_CODE_REPLACED};

use crate::output;
use crate::relay::demux::{DemuxEvent, PasteDemux};
use crate::session::SessionHandle;
use crate::sync::SyncBackWriter;
use crate::terminal::{self, TerminalController};
use crate::transport::{self, TransportEvent, TransportSender};
use crate::upload::{self, PasteOutcome};

/// Capacity for stdin chunks queued toward the relay loop
const STDIN_CHANNEL_CAPACITY: usize = 256;

/// Read size for one stdin chunk
const STDIN_READ_BUF: usize = 4096;

/// Two interrupt bytes inside this window count as a deliberate quit
const DOUBLE_INTERRUPT_WINDOW: Duration = Duration::from_secs(1);

/// How long to wait for `sync_back_ack` before warning that the remote
/// side may not support sync-back
const SYNC_BACK_ACK_GRACE: Duration = Duration::from_secs(10);

/// Time given to the writer task to flush the close frame
const CLOSE_DRAIN: Duration = Duration::from_millis(100);

/// ETX, what Ctrl+C produces in a raw terminal
const INTERRUPT_BYTE: u8 = 0x03;

/// Terminal result of one connection attempt.
///
/// Exactly one outcome is produced per attempt; it is the sole signal
/// the reconnect supervisor acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The remote process ended with this exit code
    ProcessExited(i32),
    /// The user asked to leave (interrupt or force quit)
    UserInterrupted,
    /// Another client took over the session
    ReplacedByPeer,
    /// The connection dropped for the given reason
    Disconnected(String),
}

/// Per-attempt options resolved by the connect command
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Request remote-to-local file replication
    pub sync_back: bool,
    /// Local root sync-back writes into
    pub workspace: PathBuf,
}

/// Detects a double interrupt byte within a bounded window.
///
/// A single interrupt byte is ordinary input for the remote process and
/// must be forwarded; two in quick succession are the user insisting on
/// getting out.
#[derive(Debug)]
struct DoubleTap {
    window: Duration,
    last: Option<std::time::Instant>,
}

impl DoubleTap {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Record one interrupt byte; true when it completes a double tap
    fn observe(&mut self, now: std::time::Instant) -> bool {
        if let Some(prev) = self.last {
            if now.duration_since(prev) <= self.window {
                self.last = None;
                return true;
            }
        }
        self.last = Some(now);
        false
    }
}

/// Dispatch state for one connection attempt
struct RelayCore {
    outcome: Option<ConnectionOutcome>,
    sync_back: SyncBackWriter,
    ack_pending: bool,
    exit_notice: Option<String>,
}

impl RelayCore {
    fn new(sync_back: SyncBackWriter, ack_pending: bool) -> Self {
        Self {
            outcome: None,
            sync_back,
            ack_pending,
            exit_notice: None,
        }
    }

    /// Record the attempt's outcome. First writer wins; later signals
    /// are discarded.
    fn finish(&mut self, outcome: ConnectionOutcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        } else {
            tracing::debug!(?outcome, "outcome already recorded, discarding");
        }
    }

    fn closed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Dispatch one inbound control message, returning any replies to
    /// send.
    fn handle_control(&mut self, message: ControlMessage) -> Vec<ControlMessage> {
        match message {
            ControlMessage::Ping => vec![ControlMessage::Pong],

            ControlMessage::Exit { code, signal } => {
                self.exit_notice = Some(match &signal {
                    Some(sig) => format!("Remote process exited with code {} ({})", code, sig),
                    None => format!("Remote process exited with code {}", code),
                });
                self.finish(ConnectionOutcome::ProcessExited(code));
                vec![]
            }

            ControlMessage::Error { message } => {
                // Non-fatal protocol-level report; the session continues.
                output::session_notice(&format!("tether: remote error: {}", message));
                vec![]
            }

            ControlMessage::SyncBackAck {
                enabled,
                workspace_dir,
                interval_ms,
            } => {
                self.ack_pending = false;
                tracing::debug!(
                    enabled,
                    workspace_dir = workspace_dir.as_deref().unwrap_or("-"),
                    interval_ms,
                    "sync-back acknowledged"
                );
                vec![]
            }

            ControlMessage::FileChange {
                action,
                path,
                content,
                mode,
            } => {
                self.sync_back.apply(action, &path, content.as_deref(), mode);
                vec![]
            }

            ControlMessage::Ready => {
                tracing::debug!("remote session ready");
                vec![]
            }

            ControlMessage::Unrecognized => vec![],

            other => {
                tracing::debug!(kind = other.kind(), "ignoring unexpected control message");
                vec![]
            }
        }
    }
}

/// Run one connection attempt end to end.
///
/// Transport failures never escape as errors; every ending normalizes
/// into a [`ConnectionOutcome`] for the reconnect supervisor.
pub async fn run(
    handle: &SessionHandle,
    config: &ClientConfig,
    options: &RelayOptions,
) -> ConnectionOutcome {
    let (sender, mut events) = match transport::connect(handle, config.connect_timeout).await {
        Ok(parts) => parts,
        Err(ConnectionError::Timeout) => {
            return ConnectionOutcome::Disconnected("timeout".to_string());
        }
        Err(e) => return ConnectionOutcome::Disconnected(e.to_string()),
    };

    let term = TerminalController::new();
    if let Err(e) = term.enter_raw_mode() {
        tracing::warn!("could not enter raw mode: {}", e);
    }
    term.enable_bracketed_paste();

    let size = term.size();
    send_control(
        &sender,
        ControlMessage::Resize {
            cols: size.cols,
            rows: size.rows,
        },
    )
    .await;

    let mut ack_deadline: Option<Instant> = None;
    if options.sync_back {
        send_control(&sender, ControlMessage::SyncBack { enabled: true }).await;
        ack_deadline = Some(Instant::now() + SYNC_BACK_ACK_GRACE);
    }

    let mut core = RelayCore::new(
        SyncBackWriter::new(options.workspace.clone()),
        options.sync_back,
    );
    let mut demux = PasteDemux::new();
    let mut interrupts = DoubleTap::new(DOUBLE_INTERRUPT_WINDOW);

    let cancel = CancellationToken::new();
    let mut stdin_rx = spawn_stdin_reader(cancel.clone());
    let mut resize_rx = term.resize_events();
    let mut signals = terminal::listen_user_signals();

    let mut health = tokio::time::interval(config.health.check_interval);
    health.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let silence_threshold = config.health.silence_threshold();
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            Some(chunk) = stdin_rx.recv() => {
                if relay_input(&sender, &mut demux, &mut interrupts, &chunk).await {
                    // Double interrupt inside the raw stream: tell the
                    // remote, then leave deliberately.
                    send_control(&sender, ControlMessage::Signal {
                        name: "SIGINT".to_string(),
                    })
                    .await;
                    core.finish(ConnectionOutcome::UserInterrupted);
                }
            }

            event = events.recv() => {
                match event {
                    Some(TransportEvent::Binary(data)) => {
                        last_inbound = Instant::now();
                        write_stdout(&data);
                    }
                    Some(TransportEvent::Text(text)) => {
                        last_inbound = Instant::now();
                        match protocol::decode(&text) {
                            Ok(message) => {
                                for reply in core.handle_control(message) {
                                    send_control(&sender, reply).await;
                                }
                            }
                            Err(e) => {
                                tracing::debug!("dropping malformed control frame: {}", e);
                            }
                        }
                    }
                    Some(TransportEvent::Activity) => {
                        last_inbound = Instant::now();
                    }
                    Some(TransportEvent::Closed { code, reason }) => {
                        if code == Some(CLOSE_CODE_REPLACED) {
                            core.finish(ConnectionOutcome::ReplacedByPeer);
                        } else {
                            core.finish(ConnectionOutcome::Disconnected(reason));
                        }
                    }
                    Some(TransportEvent::Failed(reason)) => {
                        core.finish(ConnectionOutcome::Disconnected(reason));
                    }
                    None => {
                        core.finish(ConnectionOutcome::Disconnected(
                            "connection closed".to_string(),
                        ));
                    }
                }
            }

            Some(size) = resize_rx.recv() => {
                send_control(&sender, ControlMessage::Resize {
                    cols: size.cols,
                    rows: size.rows,
                })
                .await;
            }

            Some(_) = signals.interrupt.recv() => {
                send_control(&sender, ControlMessage::Signal {
                    name: "SIGINT".to_string(),
                })
                .await;
                core.finish(ConnectionOutcome::UserInterrupted);
            }

            Some(_) = signals.force_quit.recv() => {
                core.finish(ConnectionOutcome::UserInterrupted);
            }

            _ = health.tick() => {
                if last_inbound.elapsed() > silence_threshold {
                    tracing::warn!(
                        silent_for = ?last_inbound.elapsed(),
                        "connection presumed dead, closing"
                    );
                    sender.force_terminate();
                    core.finish(ConnectionOutcome::Disconnected(
                        "no data received".to_string(),
                    ));
                }
            }

            _ = sleep_until_opt(ack_deadline), if core.ack_pending && ack_deadline.is_some() => {
                output::session_notice(
                    "tether: no sync-back acknowledgment; remote-side support may be missing",
                );
                ack_deadline = None;
            }
        }

        if core.closed() {
            break;
        }
    }

    // Deterministic teardown: timers and helper tasks first, then the
    // terminal, then a best-effort clean close of the transport.
    cancel.cancel();
    term.disable_bracketed_paste();
    term.restore();
    sender.close().await;
    tokio::time::sleep(CLOSE_DRAIN).await;
    sender.force_terminate();

    if let Some(notice) = core.exit_notice.take() {
        output::print_info(&notice);
    }

    core.outcome
        .unwrap_or_else(|| ConnectionOutcome::Disconnected("connection closed".to_string()))
}

/// Route one stdin chunk through the demultiplexer.
///
/// Returns true when a double interrupt ended the session; bytes before
/// the terminating interrupt are still forwarded.
async fn relay_input(
    sender: &TransportSender,
    demux: &mut PasteDemux,
    interrupts: &mut DoubleTap,
    chunk: &[u8],
) -> bool {
    for event in demux.feed(chunk) {
        match event {
            DemuxEvent::Forward(bytes) => {
                if let Some(cut) = scan_interrupts(interrupts, &bytes) {
                    if cut > 0 {
                        sender.send_binary(bytes[..cut].to_vec()).await;
                    }
                    return true;
                }
                sender.send_binary(bytes).await;
            }
            DemuxEvent::Paste(text) => {
                handle_paste(sender, &text).await;
            }
        }
    }
    false
}

/// Find the byte index of a window-completing second interrupt, if any.
/// Single interrupt bytes pass through; they are ordinary input.
fn scan_interrupts(tracker: &mut DoubleTap, bytes: &[u8]) -> Option<usize> {
    for (index, byte) in bytes.iter().enumerate() {
        if *byte == INTERRUPT_BYTE && tracker.observe(std::time::Instant::now()) {
            return Some(index);
        }
    }
    None
}

/// Hand a completed paste to the upload detector and send the result
async fn handle_paste(sender: &TransportSender, text: &str) {
    match upload::process_paste(text) {
        PasteOutcome::Forward(text) => {
            sender.send_binary(text.into_bytes()).await;
        }
        PasteOutcome::Upload {
            messages,
            replacement,
        } => {
            let total = messages.len();
            tracing::debug!(messages = total, "uploading pasted files");
            for (index, message) in messages.into_iter().enumerate() {
                send_control(sender, message).await;
                if index + 1 < total {
                    tokio::time::sleep(upload::INTER_CHUNK_DELAY).await;
                }
            }
            sender.send_binary(replacement.into_bytes()).await;
        }
    }
}

async fn send_control(sender: &TransportSender, message: ControlMessage) {
    match protocol::encode(&message) {
        Ok(text) => sender.send_text(text).await,
        Err(e) => {
            tracing::warn!(kind = message.kind(), "failed to encode control message: {}", e);
        }
    }
}

fn write_stdout(data: &[u8]) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(data);
    let _ = stdout.flush();
}

fn spawn_stdin_reader(cancel: CancellationToken) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; STDIN_READ_BUF];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = stdin.read(&mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!("stdin read error: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    });
    rx
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;
    use tempfile::TempDir;
    use tether_protocol::FileChangeAction;

    fn core_with_workspace() -> (TempDir, RelayCore) {
        let dir = TempDir::new().unwrap();
        let core = RelayCore::new(SyncBackWriter::new(dir.path().to_path_buf()), true);
        (dir, core)
    }

    #[test]
    fn test_double_tap_within_window() {
        let mut tap = DoubleTap::new(Duration::from_secs(1));
        let start = StdInstant::now();
        assert!(!tap.observe(start));
        assert!(tap.observe(start + Duration::from_millis(400)));
    }

    #[test]
    fn test_slow_taps_do_not_trigger() {
        let mut tap = DoubleTap::new(Duration::from_secs(1));
        let start = StdInstant::now();
        assert!(!tap.observe(start));
        assert!(!tap.observe(start + Duration::from_secs(2)));
        // The second tap re-arms the window.
        assert!(tap.observe(start + Duration::from_millis(2400)));
    }

    #[test]
    fn test_ping_gets_pong() {
        let (_dir, mut core) = core_with_workspace();
        let replies = core.handle_control(ControlMessage::Ping);
        assert_eq!(replies, vec![ControlMessage::Pong]);
        assert!(!core.closed());
    }

    #[test]
    fn test_exit_records_outcome_once() {
        let (_dir, mut core) = core_with_workspace();
        core.handle_control(ControlMessage::Exit {
            code: 3,
            signal: None,
        });
        assert_eq!(core.outcome, Some(ConnectionOutcome::ProcessExited(3)));

        // A racing failure path must not overwrite the recorded outcome.
        core.finish(ConnectionOutcome::Disconnected("late".to_string()));
        assert_eq!(core.outcome, Some(ConnectionOutcome::ProcessExited(3)));
    }

    #[test]
    fn test_error_message_does_not_end_session() {
        let (_dir, mut core) = core_with_workspace();
        core.handle_control(ControlMessage::Error {
            message: "transient".to_string(),
        });
        assert!(!core.closed());
    }

    #[test]
    fn test_sync_back_ack_clears_grace() {
        let (_dir, mut core) = core_with_workspace();
        assert!(core.ack_pending);
        core.handle_control(ControlMessage::SyncBackAck {
            enabled: true,
            workspace_dir: None,
            interval_ms: None,
        });
        assert!(!core.ack_pending);
    }

    #[test]
    fn test_file_change_reaches_writer() {
        let (dir, mut core) = core_with_workspace();
        core.handle_control(ControlMessage::FileChange {
            action: FileChangeAction::Write,
            path: "out.txt".to_string(),
            content: Some("aGk=".to_string()),
            mode: None,
        });
        assert_eq!(std::fs::read(dir.path().join("out.txt")).unwrap(), b"hi");
    }

    #[test]
    fn test_unrecognized_is_silently_ignored() {
        let (_dir, mut core) = core_with_workspace();
        let replies = core.handle_control(ControlMessage::Unrecognized);
        assert!(replies.is_empty());
        assert!(!core.closed());
    }

    #[test]
    fn test_unexpected_direction_is_ignored() {
        let (_dir, mut core) = core_with_workspace();
        let replies = core.handle_control(ControlMessage::Resize { cols: 1, rows: 1 });
        assert!(replies.is_empty());
        assert!(!core.closed());
    }
}
