//! Binary entrypoint that runs the sync layer against a helpdesk backend.

use std::process::ExitCode;

use helpdesk_sync::start;

/// Start the sync layer with configuration from `HELPDESK_*` variables.
fn main() -> ExitCode {
    start::run_watcher()
}
