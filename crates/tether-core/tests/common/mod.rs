//! Shared helpers for the integration tests.
//!
//! Every test debuggee is the `tether-stub` binary from this package: a
//! scripted agent that speaks the real channel protocol. Launching it under
//! a per-test temporary root keeps tests independent of each other and of
//! anything in `/tmp/tether`.

#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;
use tether_core::{create_process, wait_for_events, Event, EventKind, Process, ProcessConfig};

/// Thread id the stub reports for its initial thread.
pub const INITIAL_TID: u64 = 0x1000;

/// Launch the stub with the given scenario arguments.
///
/// The returned `TempDir` owns the channel root; keep it alive for the
/// lifetime of the process handle.
pub fn launch(args: &[&str]) -> (Process, TempDir)
{
    let root = TempDir::new().expect("create channel root");
    let config = ProcessConfig::new().with_root_dir(root.path());
    let argv: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
    let process = create_process(stub_path(), &argv, None, &config).expect("launch stub");
    (process, root)
}

pub fn stub_path() -> PathBuf
{
    PathBuf::from(env!("CARGO_BIN_EXE_tether-stub"))
}

/// Wait repeatedly until `PROCESS_CLEANUP` arrives, returning every event
/// seen along the way in delivery order.
pub fn collect_until_cleanup(process: &Process) -> Vec<Event>
{
    let mut seen = Vec::new();
    loop {
        let batch = wait_for_events(std::slice::from_ref(process)).expect("wait for events");
        let done = batch
            .iter()
            .any(|event| matches!(event.data(), EventKind::ProcessCleanup));
        seen.extend(batch);
        if done {
            return seen;
        }
    }
}
