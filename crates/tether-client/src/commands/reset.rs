//! Terminal reset command implementation

use crate::output::print_success;
use crate::terminal::TerminalController;

/// Manual recovery for a terminal left broken by a killed session:
/// raw mode off, paste mode off, cursor shown, full reset.
pub fn reset_command() {
    TerminalController::force_reset();
    print_success("Terminal reset");
}
