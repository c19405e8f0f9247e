//! Local terminal device control
//!
//! Owns the interactive terminal: raw-mode enter/exit, process-exit
//! cleanup, dimension queries, resize events, and the bracketed-paste
//! escape sequences. At most one raw-mode owner exists per process, so
//! the active flag is process-wide and restore is idempotent — every
//! exit path (normal, signal, panic, suspend) can call it safely.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use tokio::sync::mpsc;

use tether_protocol::TerminalSize;

/// Process-wide raw-mode flag. Set on first raw-mode entry, cleared by
/// restore. First-writer-wins; no locking needed on the single-threaded
/// relay loop.
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Guards one-time registration of exit hooks (panic hook + signal
/// handlers).
static CLEANUP_HOOKS: Once = Once::new();

/// Set while a suspend initiated by SIGTSTP is in flight, so a resume
/// only re-enters raw mode when this process actually suspended out of
/// it.
static SUSPEND_PENDING: AtomicBool = AtomicBool::new(false);

const SHOW_CURSOR: &str = "\x1b[?25h";
const BRACKETED_PASTE_ON: &str = "\x1b[?2004h";
const BRACKETED_PASTE_OFF: &str = "\x1b[?2004l";
const FULL_RESET: &str = "\x1bc";

/// Controller for the local interactive terminal
#[derive(Debug, Default)]
pub struct TerminalController;

impl TerminalController {
    /// Create a controller. State lives process-wide; the instance only
    /// scopes the API.
    pub fn new() -> Self {
        Self
    }

    /// Whether stdin and stdout are both attached to a terminal
    pub fn is_interactive(&self) -> bool {
        io::stdin().is_terminal() && io::stdout().is_terminal()
    }

    /// Whether raw mode is currently held
    pub fn is_raw(&self) -> bool {
        RAW_MODE_ACTIVE.load(Ordering::SeqCst)
    }

    /// Enter raw mode.
    ///
    /// No-op when the stream is not a terminal or raw mode is already
    /// held. First activation registers the process-exit hooks so the
    /// user's shell is never left broken.
    pub fn enter_raw_mode(&self) -> io::Result<()> {
        if !self.is_interactive() || self.is_raw() {
            return Ok(());
        }

        enable_raw_mode()?;
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        register_cleanup_hooks();
        Ok(())
    }

    /// Restore the terminal. Idempotent; safe from any exit path.
    pub fn restore(&self) {
        restore_now();
    }

    /// Current terminal dimensions, falling back to 80x24 when the
    /// query fails (e.g. not a terminal).
    pub fn size(&self) -> TerminalSize {
        match size() {
            Ok((cols, rows)) => TerminalSize::new(cols, rows),
            Err(_) => TerminalSize::default_size(),
        }
    }

    /// Stream of dimension changes. Each terminal resize event yields
    /// exactly one message with the new size.
    pub fn resize_events(&self) -> mpsc::UnboundedReceiver<TerminalSize> {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_resize_listener(tx);
        rx
    }

    /// Ask the terminal to wrap pasted text in start/end markers
    pub fn enable_bracketed_paste(&self) {
        write_escape(BRACKETED_PASTE_ON);
    }

    /// Turn bracketed-paste wrapping off
    pub fn disable_bracketed_paste(&self) {
        write_escape(BRACKETED_PASTE_OFF);
    }

    /// Manual recovery for a terminal left in a bad state: raw mode off,
    /// paste mode off, cursor shown, full reset sequence. Independent of
    /// any controller's internal state.
    pub fn force_reset() {
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
        let _ = disable_raw_mode();

        let mut stdout = io::stdout();
        let _ = stdout.write_all(BRACKETED_PASTE_OFF.as_bytes());
        let _ = stdout.write_all(SHOW_CURSOR.as_bytes());
        let _ = stdout.write_all(FULL_RESET.as_bytes());
        let _ = stdout.flush();
    }
}

/// Restore the terminal if this process holds raw mode.
///
/// Also re-shows the cursor and turns paste mode off so a killed session
/// cannot leave the cursor hidden or paste mode stuck on.
pub fn restore_now() {
    if RAW_MODE_ACTIVE.swap(false, Ordering::SeqCst) {
        let _ = disable_raw_mode();

        let mut stdout = io::stdout();
        let _ = stdout.write_all(BRACKETED_PASTE_OFF.as_bytes());
        let _ = stdout.write_all(SHOW_CURSOR.as_bytes());
        let _ = stdout.flush();
    }
}

fn write_escape(seq: &str) {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(seq.as_bytes());
    let _ = stdout.flush();
}

/// Register the panic hook and fatal-signal handlers once per process.
///
/// Every handler restores the terminal *before* the process dies, on
/// normal exit, termination, hang-up, suspend, and panic.
fn register_cleanup_hooks() {
    CLEANUP_HOOKS.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore_now();
            previous(info);
        }));

        spawn_fatal_signal_listeners();
    });
}

#[cfg(unix)]
fn spawn_fatal_signal_listeners() {
    use tokio::signal::unix::{signal, SignalKind};

    // SIGTERM / SIGHUP: restore, then die with the conventional code.
    for (kind, name, code) in [
        (SignalKind::terminate(), "SIGTERM", 143),
        (SignalKind::hangup(), "SIGHUP", 129),
    ] {
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    restore_now();
                    tracing::debug!(signal = name, "terminating on fatal signal");
                    std::process::exit(code);
                });
            }
            Err(e) => tracing::warn!(signal = name, "failed to install handler: {}", e),
        }
    }

    // SIGTSTP: restore, then genuinely stop the process with SIGSTOP
    // (uncatchable, so the tokio handler registration stays intact).
    // Execution continues here after SIGCONT; try to pick raw mode back
    // up, or tell the user the session needs a reattach.
    match signal(SignalKind::from_raw(libc::SIGTSTP)) {
        Ok(mut stream) => {
            tokio::spawn(async move {
                loop {
                    if stream.recv().await.is_none() {
                        break;
                    }
                    let was_raw = RAW_MODE_ACTIVE.load(Ordering::SeqCst);
                    SUSPEND_PENDING.store(was_raw, Ordering::SeqCst);
                    restore_now();
                    unsafe {
                        libc::raise(libc::SIGSTOP);
                    }
                    if SUSPEND_PENDING.swap(false, Ordering::SeqCst) {
                        resume_raw_mode();
                    }
                }
            });
        }
        Err(e) => tracing::warn!("failed to install SIGTSTP handler: {}", e),
    }

    // SIGCONT: backstop for a resume that lands before the SIGTSTP task
    // gets to run again. Only acts on a suspend this process initiated.
    match signal(SignalKind::from_raw(libc::SIGCONT)) {
        Ok(mut stream) => {
            tokio::spawn(async move {
                loop {
                    if stream.recv().await.is_none() {
                        break;
                    }
                    if SUSPEND_PENDING.swap(false, Ordering::SeqCst)
                        && !RAW_MODE_ACTIVE.load(Ordering::SeqCst)
                    {
                        resume_raw_mode();
                    }
                }
            });
        }
        Err(e) => tracing::warn!("failed to install SIGCONT handler: {}", e),
    }
}

#[cfg(not(unix))]
fn spawn_fatal_signal_listeners() {}

/// Re-enter raw mode after a suspend/resume cycle.
///
/// Resuming into a half-raw terminal is the failure mode this guards
/// against: either raw mode fully comes back, or the user gets an
/// explicit notice.
fn resume_raw_mode() {
    match enable_raw_mode() {
        Ok(()) => {
            RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
            write_escape(BRACKETED_PASTE_ON);
        }
        Err(e) => {
            tracing::warn!("could not restore raw mode after resume: {}", e);
            crate::output::session_notice("tether: session suspended, reattach required");
        }
    }
}

#[cfg(unix)]
fn spawn_resize_listener(tx: mpsc::UnboundedSender<TerminalSize>) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::window_change()) {
        Ok(mut stream) => {
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    let size = match size() {
                        Ok((cols, rows)) => TerminalSize::new(cols, rows),
                        Err(_) => continue,
                    };
                    if tx.send(size).is_err() {
                        break;
                    }
                }
            });
        }
        Err(e) => tracing::warn!("failed to install SIGWINCH handler: {}", e),
    }
}

#[cfg(not(unix))]
fn spawn_resize_listener(_tx: mpsc::UnboundedSender<TerminalSize>) {}

/// Streams of user-directed termination signals.
///
/// `interrupt` is SIGINT; `force_quit` is SIGQUIT, the escape hatch that
/// still works while raw mode forwards ordinary interrupt bytes to the
/// remote side. Both are handled by the session relay so a user-requested
/// exit becomes an outcome instead of a bare process exit.
pub struct UserSignals {
    pub interrupt: mpsc::UnboundedReceiver<()>,
    pub force_quit: mpsc::UnboundedReceiver<()>,
}

#[cfg(unix)]
pub fn listen_user_signals() -> UserSignals {
    use tokio::signal::unix::{signal, SignalKind};

    let (int_tx, int_rx) = mpsc::unbounded_channel();
    let (quit_tx, quit_rx) = mpsc::unbounded_channel();

    for (kind, name, tx) in [
        (SignalKind::interrupt(), "SIGINT", int_tx),
        (SignalKind::quit(), "SIGQUIT", quit_tx),
    ] {
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    while stream.recv().await.is_some() {
                        if tx.send(()).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => tracing::warn!(signal = name, "failed to install handler: {}", e),
        }
    }

    UserSignals {
        interrupt: int_rx,
        force_quit: quit_rx,
    }
}

#[cfg(not(unix))]
pub fn listen_user_signals() -> UserSignals {
    let (int_tx, int_rx) = mpsc::unbounded_channel();
    let (_quit_tx, quit_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if int_tx.send(()).is_err() {
                break;
            }
        }
    });

    UserSignals {
        interrupt: int_rx,
        force_quit: quit_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_is_idempotent() {
        // Never entered raw mode in this process: restore must be a
        // no-op both times, not an error.
        restore_now();
        restore_now();
        assert!(!TerminalController::new().is_raw());
    }

    #[test]
    fn test_enter_raw_mode_noop_without_terminal() {
        let term = TerminalController::new();
        if !term.is_interactive() {
            term.enter_raw_mode().unwrap();
            assert!(!term.is_raw());
        }
    }

    #[test]
    fn test_size_has_fallback() {
        let size = TerminalController::new().size();
        assert!(size.cols > 0);
        assert!(size.rows > 0);
    }
}
