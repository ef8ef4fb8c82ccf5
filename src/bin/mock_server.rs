//! In-memory helpdesk backend for local development.
//! Run with: cargo run --bin helpdesk-mock

use std::process::ExitCode;

use helpdesk_sync::start;

fn main() -> ExitCode {
    start::run_mock()
}
