//! Breakpoint lifecycle bookkeeping.
//!
//! This module centralizes breakpoint state tracking so the process handle
//! can focus on the wire mechanics (asking the agent to patch and unpatch
//! the trap). Each process owns one table keyed by virtual address. A
//! breakpoint moves `CREATED -> INSTALLED -> CREATED` and may only be
//! deleted from `CREATED`; every transition is validated here before any
//! request touches the channel, so a rejected transition never leaves the
//! agent and the table disagreeing.
//!
//! The original instruction bytes ride the install response and are stored
//! with the `INSTALLED` entry; `remove` hands them back to the agent, which
//! keeps the agent stateless about saved memory.

use std::collections::HashMap;
use std::fmt;

use crate::error::{TetherError, TetherResult};

/// Lifecycle states for a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointState
{
    /// Known to the controller but not patched into the debuggee.
    Created,
    /// Patched into the debuggee and will trigger when hit.
    Installed,
}

impl fmt::Display for BreakpointState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Self::Created => "CREATED",
            Self::Installed => "INSTALLED",
        };
        write!(f, "{name}")
    }
}

/// Internal entry; `Installed` carries the bytes the trap replaced.
#[derive(Debug, Clone)]
enum Slot
{
    Created,
    Installed
    {
        original: Vec<u8>,
    },
}

impl Slot
{
    const fn state(&self) -> BreakpointState
    {
        match self {
            Self::Created => BreakpointState::Created,
            Self::Installed { .. } => BreakpointState::Installed,
        }
    }
}

/// Per-process breakpoint table (synchronized by the owning registry entry).
#[derive(Debug, Default)]
pub(crate) struct BreakpointTable
{
    by_addr: HashMap<u64, Slot>,
}

impl BreakpointTable
{
    /// Create a new empty table.
    pub(crate) fn new() -> Self
    {
        Self::default()
    }

    /// Current state of the breakpoint at `addr`, if one exists.
    pub(crate) fn state(&self, addr: u64) -> Option<BreakpointState>
    {
        self.by_addr.get(&addr).map(Slot::state)
    }

    /// Whether an installed breakpoint sits at `addr`.
    pub(crate) fn installed_at(&self, addr: u64) -> bool
    {
        matches!(self.by_addr.get(&addr), Some(Slot::Installed { .. }))
    }

    /// Register a new breakpoint at `addr` in `CREATED` state.
    ///
    /// Pure bookkeeping; nothing is sent to the agent until install.
    pub(crate) fn create(&mut self, addr: u64) -> TetherResult<()>
    {
        if let Some(slot) = self.by_addr.get(&addr) {
            return Err(TetherError::Request(format!(
                "breakpoint already exists at 0x{addr:016x} in state {}",
                slot.state()
            )));
        }
        self.by_addr.insert(addr, Slot::Created);
        Ok(())
    }

    /// Validate that the breakpoint at `addr` may be installed.
    ///
    /// Re-installing an `INSTALLED` breakpoint is refused rather than
    /// tolerated: the caller's view of what is patched into debuggee memory
    /// is wrong, and a silent no-op would hide that.
    pub(crate) fn ensure_installable(&self, addr: u64) -> TetherResult<()>
    {
        match self.by_addr.get(&addr) {
            None => Err(TetherError::Request(format!("no breakpoint at 0x{addr:016x}"))),
            Some(Slot::Installed { .. }) => Err(TetherError::Request(format!(
                "breakpoint at 0x{addr:016x} is already installed"
            ))),
            Some(Slot::Created) => Ok(()),
        }
    }

    /// Record a successful install, keeping the bytes the trap replaced.
    pub(crate) fn mark_installed(&mut self, addr: u64, original: Vec<u8>)
    {
        self.by_addr.insert(addr, Slot::Installed { original });
    }

    /// Validate removal of the breakpoint at `addr` and return the original
    /// bytes the remove request must carry back to the agent.
    pub(crate) fn original_for_remove(&self, addr: u64) -> TetherResult<Vec<u8>>
    {
        match self.by_addr.get(&addr) {
            None => Err(TetherError::Request(format!("no breakpoint at 0x{addr:016x}"))),
            Some(Slot::Created) => Err(TetherError::Request(format!(
                "breakpoint at 0x{addr:016x} is not installed"
            ))),
            Some(Slot::Installed { original }) => Ok(original.clone()),
        }
    }

    /// Record a successful remove; the breakpoint returns to `CREATED`.
    pub(crate) fn mark_removed(&mut self, addr: u64)
    {
        self.by_addr.insert(addr, Slot::Created);
    }

    /// Drop the breakpoint at `addr` entirely.
    ///
    /// Only legal from `CREATED`; an `INSTALLED` breakpoint still has a trap
    /// patched into the debuggee and must be removed first.
    pub(crate) fn delete(&mut self, addr: u64) -> TetherResult<()>
    {
        match self.by_addr.get(&addr) {
            None => Err(TetherError::Request(format!("no breakpoint at 0x{addr:016x}"))),
            Some(Slot::Installed { .. }) => Err(TetherError::Request(format!(
                "breakpoint at 0x{addr:016x} is installed; remove it before deleting"
            ))),
            Some(Slot::Created) => {
                self.by_addr.remove(&addr);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn create_then_delete_leaves_no_residue()
    {
        let mut table = BreakpointTable::new();
        table.create(0x1000).unwrap();
        assert_eq!(table.state(0x1000), Some(BreakpointState::Created));
        table.delete(0x1000).unwrap();
        assert_eq!(table.state(0x1000), None);
    }

    #[test]
    fn duplicate_create_is_a_request_error()
    {
        let mut table = BreakpointTable::new();
        table.create(0x1000).unwrap();
        let err = table.create(0x1000).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Request);
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn install_remove_cycle_round_trips_original_bytes()
    {
        let mut table = BreakpointTable::new();
        table.create(0x2000).unwrap();
        table.ensure_installable(0x2000).unwrap();
        table.mark_installed(0x2000, vec![0x55]);
        assert!(table.installed_at(0x2000));

        let original = table.original_for_remove(0x2000).unwrap();
        assert_eq!(original, vec![0x55]);
        table.mark_removed(0x2000);
        assert_eq!(table.state(0x2000), Some(BreakpointState::Created));
        assert!(!table.installed_at(0x2000));
    }

    #[test]
    fn double_install_is_refused_and_state_survives()
    {
        let mut table = BreakpointTable::new();
        table.create(0x2000).unwrap();
        table.mark_installed(0x2000, vec![0x90]);

        let err = table.ensure_installable(0x2000).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Request);
        assert_eq!(table.state(0x2000), Some(BreakpointState::Installed));
        assert_eq!(table.original_for_remove(0x2000).unwrap(), vec![0x90]);
    }

    #[test]
    fn remove_of_a_created_breakpoint_is_refused()
    {
        let mut table = BreakpointTable::new();
        table.create(0x3000).unwrap();
        let err = table.original_for_remove(0x3000).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Request);
        assert!(err.to_string().contains("not installed"));
    }

    #[test]
    fn delete_of_an_installed_breakpoint_is_refused()
    {
        let mut table = BreakpointTable::new();
        table.create(0x3000).unwrap();
        table.mark_installed(0x3000, vec![0xcc]);
        let err = table.delete(0x3000).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Request);
        assert_eq!(table.state(0x3000), Some(BreakpointState::Installed));
    }

    #[test]
    fn operations_on_an_absent_address_are_refused()
    {
        let mut table = BreakpointTable::new();
        assert!(table.ensure_installable(0x4000).is_err());
        assert!(table.original_for_remove(0x4000).is_err());
        assert!(table.delete(0x4000).is_err());
    }
}
