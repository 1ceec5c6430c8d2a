//! Tests for the breakpoint lifecycle against a live agent

mod common;

use common::{collect_until_cleanup, launch};
use tether_core::{wait_for_events, BreakpointState, ErrorCategory, EventKind, TetherError};
use tether_protocol::{TRAP_INSTRUCTION, TRAP_LEN};

const BP_ADDR: u64 = 0x4000;

/// Byte the stub seeds at the scripted breakpoint address.
const SEEDED_BYTE: u8 = 0x55;

#[test]
fn test_full_breakpoint_cycle()
{
    let (process, _root) = launch(&["breakpoint", "0x4000"]);

    process.create_breakpoint(BP_ADDR).unwrap();
    assert_eq!(
        process.breakpoint_state(BP_ADDR).unwrap(),
        Some(BreakpointState::Created)
    );

    process.install_breakpoint(BP_ADDR).unwrap();
    assert_eq!(
        process.breakpoint_state(BP_ADDR).unwrap(),
        Some(BreakpointState::Installed)
    );
    // The trap is visible in debuggee memory once installed.
    assert_eq!(process.read_mem(BP_ADDR, 1).unwrap(), vec![TRAP_INSTRUCTION]);

    process.continue_process().unwrap();
    let events = wait_for_events(&[process.clone()]).unwrap();
    assert_eq!(*events[0].data(), EventKind::Breakpoint { addr: BP_ADDR });

    let thread = events[0].thread().expect("breakpoint reports a thread").clone();
    assert_eq!(thread.get_pc().unwrap(), BP_ADDR + TRAP_LEN);
    assert_eq!(thread.get_next_instruction().unwrap(), BP_ADDR);

    process.remove_breakpoint(BP_ADDR).unwrap();
    assert_eq!(
        process.breakpoint_state(BP_ADDR).unwrap(),
        Some(BreakpointState::Created)
    );
    // Removing restores the original instruction byte.
    assert_eq!(process.read_mem(BP_ADDR, 1).unwrap(), vec![SEEDED_BYTE]);

    // With the trap gone the next instruction is just the program counter.
    assert_eq!(thread.get_next_instruction().unwrap(), BP_ADDR + TRAP_LEN);

    process.delete_breakpoint(BP_ADDR).unwrap();
    assert_eq!(process.breakpoint_state(BP_ADDR).unwrap(), None);

    process.continue_process().unwrap();
    collect_until_cleanup(&process);
}

#[test]
fn test_uninstalled_breakpoint_never_fires()
{
    let (process, _root) = launch(&["breakpoint", "0x4000"]);

    process.create_breakpoint(BP_ADDR).unwrap();

    // Created but never installed: the debuggee runs straight to exit.
    process.continue_process().unwrap();
    let events = collect_until_cleanup(&process);
    assert!(events
        .iter()
        .all(|event| !matches!(event.data(), EventKind::Breakpoint { .. })));
    assert!(events
        .iter()
        .any(|event| matches!(event.data(), EventKind::ProcessExit { code: 0 })));
}

#[test]
fn test_breakpoint_transitions_are_validated_locally()
{
    let (process, _root) = launch(&["serve"]);

    let err = process.install_breakpoint(BP_ADDR).unwrap_err();
    match err {
        TetherError::Request(msg) => assert!(msg.contains("no breakpoint")),
        other => panic!("expected a request error, got {other:?}"),
    }

    process.create_breakpoint(BP_ADDR).unwrap();
    let err = process.create_breakpoint(BP_ADDR).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Request);

    let err = process.remove_breakpoint(BP_ADDR).unwrap_err();
    match err {
        TetherError::Request(msg) => assert!(msg.contains("not installed")),
        other => panic!("expected a request error, got {other:?}"),
    }

    process.install_breakpoint(BP_ADDR).unwrap();
    let err = process.install_breakpoint(BP_ADDR).unwrap_err();
    match err {
        TetherError::Request(msg) => assert!(msg.contains("already installed")),
        other => panic!("expected a request error, got {other:?}"),
    }

    let err = process.delete_breakpoint(BP_ADDR).unwrap_err();
    match err {
        TetherError::Request(msg) => assert!(msg.contains("remove it before deleting")),
        other => panic!("expected a request error, got {other:?}"),
    }

    // A failed transition leaves the breakpoint where it was.
    assert_eq!(
        process.breakpoint_state(BP_ADDR).unwrap(),
        Some(BreakpointState::Installed)
    );

    process.remove_breakpoint(BP_ADDR).unwrap();
    process.delete_breakpoint(BP_ADDR).unwrap();
    process.release().unwrap();
}

#[test]
fn test_breakpoints_at_distinct_addresses_are_independent()
{
    let (process, _root) = launch(&["serve"]);

    process.create_breakpoint(0x4000).unwrap();
    process.create_breakpoint(0x5000).unwrap();
    process.install_breakpoint(0x5000).unwrap();

    assert_eq!(
        process.breakpoint_state(0x4000).unwrap(),
        Some(BreakpointState::Created)
    );
    assert_eq!(
        process.breakpoint_state(0x5000).unwrap(),
        Some(BreakpointState::Installed)
    );

    process.delete_breakpoint(0x4000).unwrap();
    assert_eq!(
        process.breakpoint_state(0x5000).unwrap(),
        Some(BreakpointState::Installed)
    );

    process.release().unwrap();
}
