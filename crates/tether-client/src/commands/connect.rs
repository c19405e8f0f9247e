//! Connect command implementation

use anyhow::{Context, Result};

use tether_core::config::ClientConfig;

use crate::output::print_info;
use crate::reconnect::supervise;
use crate::relay::{self, ConnectionOutcome, RelayOptions};
use crate::session::HttpSessionLookup;

/// Execute the connect command: resolve the session, then hand the
/// terminal over to the relay under the reconnect supervisor.
///
/// Returns the process exit code to propagate (the remote exit code
/// when the session ended with `exit`, zero otherwise).
pub async fn connect_command(
    config: &ClientConfig,
    session: &str,
    api_token: &str,
) -> Result<i32> {
    let workspace = match &config.workspace_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };

    let options = RelayOptions {
        sync_back: config.sync_back,
        workspace,
    };

    let lookup = HttpSessionLookup::new(config.api_base_url.clone(), api_token);

    print_info(&format!("Connecting to session '{}'...", session));

    let outcome = supervise(session, &lookup, &config.reconnect, |handle| {
        let config = config.clone();
        let options = options.clone();
        async move { relay::run(&handle, &config, &options).await }
    })
    .await?;

    Ok(match outcome {
        ConnectionOutcome::ProcessExited(code) => code,
        _ => 0,
    })
}
