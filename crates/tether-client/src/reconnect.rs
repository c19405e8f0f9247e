//! Reconnect supervisor
//!
//! Wraps the session relay in a bounded retry loop. Only `Disconnected`
//! outcomes are retried: the session metadata is re-resolved between
//! attempts (catching a session that stopped in the meantime), a fixed
//! delay is applied, and the attempt count is capped. `ProcessExited`,
//! `UserInterrupted`, and `ReplacedByPeer` are deliberate, final states
//! and never retried.

use std::future::Future;

use anyhow::{bail, Context, Result};

use tether_core::config::ReconnectConfig;

use crate::output::{print_error, print_info, print_warning};
use crate::relay::ConnectionOutcome;
use crate::session::{SessionHandle, SessionLookup};

/// Drive connection attempts for `name` until a terminal outcome.
///
/// `dial` runs one relay attempt against resolved session metadata; it
/// is injected so tests can script outcomes without a transport.
pub async fn supervise<D, F>(
    name: &str,
    lookup: &dyn SessionLookup,
    config: &ReconnectConfig,
    mut dial: D,
) -> Result<ConnectionOutcome>
where
    D: FnMut(SessionHandle) -> F,
    F: Future<Output = ConnectionOutcome>,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let handle = lookup
            .resolve(name)
            .await
            .with_context(|| format!("failed to resolve session '{}'", name))?;

        if !handle.is_running() {
            if attempt == 1 {
                bail!("session '{}' is not running", name);
            }
            print_error(&format!(
                "Session '{}' has stopped; giving up on reconnection",
                name
            ));
            bail!("session '{}' stopped during reconnection", name);
        }

        let outcome = dial(handle).await;

        match outcome {
            ConnectionOutcome::ProcessExited(_) => return Ok(outcome),
            ConnectionOutcome::UserInterrupted => {
                print_info("Session ended");
                return Ok(outcome);
            }
            ConnectionOutcome::ReplacedByPeer => {
                print_warning("Session taken over by another client");
                return Ok(outcome);
            }
            ConnectionOutcome::Disconnected(ref reason) => {
                print_warning(&format!("Disconnected: {}", reason));

                if !config.auto {
                    return Ok(outcome);
                }
                if attempt == max_attempts {
                    print_error(&format!(
                        "Reconnect attempts exhausted ({}/{})",
                        attempt, max_attempts
                    ));
                    bail!(
                        "could not stay connected to '{}'; run `tether connect {}` to reconnect",
                        name,
                        name
                    );
                }

                tokio::time::sleep(config.delay).await;
                print_info(&format!(
                    "Reconnecting (attempt {}/{})...",
                    attempt + 1,
                    max_attempts
                ));
            }
        }
    }

    unreachable!("attempt loop always returns or bails");
}
