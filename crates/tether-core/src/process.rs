//! # Process Handle
//!
//! The `Process` handle and the registry entry behind it.
//!
//! A `Process` is a cheap clone over one shared registry entry
//! (`Arc<Mutex<..>>`). The entry owns the channel transport, the thread
//! list, the breakpoint table, and the lifecycle flags; every control
//! operation locks it for the full request/response exchange, which is also
//! what guarantees only one request is outstanding on the control channel at
//! a time. Operations against different processes never contend.
//!
//! Identity (pid, architecture, multithread capability, protocol version) is
//! fixed at the handshake and copied into each handle, so identity queries
//! take no lock at all.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use tether_protocol::{Architecture, InitPayload, Payload, Request, RunState};
use tracing::debug;

use crate::breakpoints::{BreakpointState, BreakpointTable};
use crate::error::{TetherError, TetherResult};
use crate::thread::Thread;
use crate::transport::{unexpected_payload, Transport};

/// One thread tracked by its owning process's registry entry.
///
/// Thread handles do not own any state; they resolve through the process
/// entry to one of these.
pub(crate) struct ThreadEntry
{
    pub(crate) tid: u64,
    pub(crate) state: RunState,
    pub(crate) single_step: bool,
    pub(crate) alive: bool,
    pub(crate) user_data: Option<Box<dyn Any + Send>>,
}

impl ThreadEntry
{
    pub(crate) fn new(tid: u64) -> Self
    {
        Self {
            tid,
            state: RunState::Running,
            single_step: false,
            alive: true,
            user_data: None,
        }
    }
}

/// Shared state behind every `Process` and `Thread` handle for one debuggee.
pub(crate) struct ProcessInner
{
    pub(crate) pid: u32,
    pub(crate) running: bool,
    pub(crate) terminated: bool,
    pub(crate) transport: Option<Transport>,
    pub(crate) threads: Vec<ThreadEntry>,
    pub(crate) breakpoints: BreakpointTable,
    pub(crate) user_data: Option<Box<dyn Any + Send>>,
}

impl ProcessInner
{
    /// The transport, provided the process can still accept requests.
    ///
    /// A terminated or released process refuses control requests with a
    /// request error, matching how the agent itself would have answered.
    pub(crate) fn require_transport(&mut self) -> TetherResult<&mut Transport>
    {
        if self.terminated {
            return Err(TetherError::Request(format!("process {} has terminated", self.pid)));
        }
        let pid = self.pid;
        self.transport
            .as_mut()
            .ok_or_else(|| TetherError::Request(format!("process {pid} has been released")))
    }

    /// Look up a thread entry by id.
    pub(crate) fn entry_mut(&mut self, tid: u64) -> TetherResult<&mut ThreadEntry>
    {
        let pid = self.pid;
        self.threads
            .iter_mut()
            .find(|entry| entry.tid == tid)
            .ok_or_else(|| TetherError::Request(format!("thread 0x{tid:x} is not registered with process {pid}")))
    }

    /// Like [`ProcessInner::entry_mut`] but refuses threads that have died.
    pub(crate) fn live_entry_mut(&mut self, tid: u64) -> TetherResult<&mut ThreadEntry>
    {
        let entry = self.entry_mut(tid)?;
        if !entry.alive {
            return Err(TetherError::Request(format!("thread 0x{tid:x} has terminated")));
        }
        Ok(entry)
    }

    /// Number of live threads currently in `RUNNING`, excluding `except`.
    pub(crate) fn running_threads_excluding(&self, except: u64) -> usize
    {
        self.threads
            .iter()
            .filter(|entry| entry.alive && entry.tid != except && entry.state == RunState::Running)
            .count()
    }
}

/// Handle to a debuggee process under controller management
///
/// Handles are cheap to clone and may be used from multiple threads of
/// control; operations on the same process serialize on its registry entry.
/// Two handles are equal when they refer to the same pid.
///
/// ## Lifecycle
///
/// 1. Create: [`create_process`](crate::create_process) spawns the debuggee
///    and performs the agent handshake.
/// 2. Operate: breakpoints, memory, registers, continue, and
///    [`wait_for_events`](crate::wait_for_events).
/// 3. Terminate: a `PROCESS_EXIT`/`PROCESS_CLEANUP` event marks the process
///    terminated; [`Process::release`] frees controller-side state early.
#[derive(Clone)]
pub struct Process
{
    pid: u32,
    arch: Architecture,
    multithread: bool,
    protocol_version: u32,
    inner: Arc<Mutex<ProcessInner>>,
}

impl Process
{
    /// Register a freshly rendezvoused debuggee.
    ///
    /// The agent's `Init` payload supplies identity and the initial thread,
    /// which starts `RUNNING`; the process itself starts not running (the
    /// agent holds the debuggee at its entry until the first continue).
    pub(crate) fn register(pid: u32, init: &InitPayload, transport: Transport) -> Self
    {
        let inner = ProcessInner {
            pid,
            running: false,
            terminated: false,
            transport: Some(transport),
            threads: vec![ThreadEntry::new(init.initial_tid)],
            breakpoints: BreakpointTable::new(),
            user_data: None,
        };

        Self {
            pid,
            arch: init.arch,
            multithread: init.multithread,
            protocol_version: init.version,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<Mutex<ProcessInner>>
    {
        &self.inner
    }

    /// Process id of the debuggee.
    #[must_use]
    pub fn pid(&self) -> u32
    {
        self.pid
    }

    /// Architecture reported by the agent at handshake.
    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.arch
    }

    /// Whether the debuggee is linked against a thread library.
    #[must_use]
    pub fn is_multithread_capable(&self) -> bool
    {
        self.multithread
    }

    /// Protocol version negotiated with the agent.
    #[must_use]
    pub fn protocol_version(&self) -> u32
    {
        self.protocol_version
    }

    /// Whether the debuggee is currently executing.
    ///
    /// ## Errors
    ///
    /// Fails only if the registry entry lock is poisoned.
    pub fn is_running(&self) -> TetherResult<bool>
    {
        Ok(self.inner.lock()?.running)
    }

    /// Whether the debuggee has terminated (exit observed, event channel
    /// closed, or handle released).
    ///
    /// ## Errors
    ///
    /// Fails only if the registry entry lock is poisoned.
    pub fn is_terminated(&self) -> TetherResult<bool>
    {
        Ok(self.inner.lock()?.terminated)
    }

    /// Handle to the thread the debuggee started with.
    ///
    /// ## Errors
    ///
    /// Fails if controller-side state was already released.
    pub fn initial_thread(&self) -> TetherResult<Thread>
    {
        let inner = self.inner.lock()?;
        let first = inner
            .threads
            .first()
            .ok_or_else(|| TetherError::Request(format!("process {} has been released", self.pid)))?;
        Ok(Thread::new(first.tid, self.clone()))
    }

    /// Handles to every thread in creation order, including threads whose
    /// death has been observed.
    ///
    /// ## Errors
    ///
    /// Fails only if the registry entry lock is poisoned.
    pub fn threads(&self) -> TetherResult<Vec<Thread>>
    {
        let inner = self.inner.lock()?;
        Ok(inner
            .threads
            .iter()
            .map(|entry| Thread::new(entry.tid, self.clone()))
            .collect())
    }

    /// Resume execution of the debuggee.
    ///
    /// On success every live thread is marked `RUNNING` and the process is
    /// marked running.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the process has terminated or the agent
    /// refuses; with a library error if the channel is broken.
    pub fn continue_process(&self) -> TetherResult<()>
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;

        let payload = inner.require_transport()?.control.transact(&Request::Continue { sig: 0 })?;
        expect_empty(&payload, "Continue")?;

        for entry in inner.threads.iter_mut().filter(|entry| entry.alive) {
            entry.state = RunState::Running;
        }
        inner.running = true;
        debug!("Continued process {}", self.pid);
        Ok(())
    }

    /// Re-query the agent for every thread's run-state and update the cached
    /// states accordingly.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the process has terminated; with a
    /// library error on transport failure.
    pub fn refresh_state(&self) -> TetherResult<()>
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;

        let payload = inner.require_transport()?.control.transact(&Request::State)?;
        let states = match payload {
            Payload::States { threads } => threads,
            other => return Err(unexpected_payload("State", &other)),
        };

        for reported in &states {
            if let Ok(entry) = inner.entry_mut(reported.tid) {
                entry.state = reported.state;
            }
        }
        Ok(())
    }

    /// Register a breakpoint at `addr` in `CREATED` state.
    ///
    /// Pure bookkeeping: nothing is sent to the agent until
    /// [`Process::install_breakpoint`].
    ///
    /// ## Errors
    ///
    /// Fails with a request error if a breakpoint already exists at `addr`.
    pub fn create_breakpoint(&self, addr: u64) -> TetherResult<()>
    {
        self.inner.lock()?.breakpoints.create(addr)
    }

    /// Patch the trap instruction into the debuggee at `addr`.
    ///
    /// The agent answers with the original bytes it replaced; they are kept
    /// for [`Process::remove_breakpoint`].
    ///
    /// ## Errors
    ///
    /// Fails with a request error if no breakpoint exists at `addr`, if it
    /// is already installed, or if the process has terminated. The
    /// transition is validated before anything touches the channel.
    pub fn install_breakpoint(&self, addr: u64) -> TetherResult<()>
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;

        inner.breakpoints.ensure_installable(addr)?;

        let payload = inner
            .require_transport()?
            .control
            .transact(&Request::InstallBreakpoint { addr })?;
        let original = match payload {
            Payload::Installed { original } => original,
            other => return Err(unexpected_payload("InstallBreakpoint", &other)),
        };

        inner.breakpoints.mark_installed(addr, original);
        debug!("Installed breakpoint at 0x{:016x} for process {}", addr, self.pid);
        Ok(())
    }

    /// Restore the original bytes at `addr`, returning the breakpoint to
    /// `CREATED`.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the breakpoint is absent or not
    /// installed, or if the process has terminated. The transition is
    /// validated before anything touches the channel.
    pub fn remove_breakpoint(&self, addr: u64) -> TetherResult<()>
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;

        let original = inner.breakpoints.original_for_remove(addr)?;

        let payload = inner
            .require_transport()?
            .control
            .transact(&Request::RemoveBreakpoint { addr, original })?;
        expect_empty(&payload, "RemoveBreakpoint")?;

        inner.breakpoints.mark_removed(addr);
        debug!("Removed breakpoint at 0x{:016x} for process {}", addr, self.pid);
        Ok(())
    }

    /// Forget the breakpoint at `addr`.
    ///
    /// ## Errors
    ///
    /// Fails with a request error unless the breakpoint exists and is in
    /// `CREATED` state (an installed breakpoint must be removed first).
    pub fn delete_breakpoint(&self, addr: u64) -> TetherResult<()>
    {
        self.inner.lock()?.breakpoints.delete(addr)
    }

    /// Current state of the breakpoint at `addr`, if any.
    ///
    /// ## Errors
    ///
    /// Fails only if the registry entry lock is poisoned.
    pub fn breakpoint_state(&self, addr: u64) -> TetherResult<Option<BreakpointState>>
    {
        Ok(self.inner.lock()?.breakpoints.state(addr))
    }

    /// Read `len` bytes of debuggee memory at `addr`.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the process has terminated or the agent
    /// refuses the access (bad address, size above the agent's limit); with
    /// a library error on transport failure.
    pub fn read_mem(&self, addr: u64, len: u32) -> TetherResult<Vec<u8>>
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;

        let payload = inner
            .require_transport()?
            .control
            .transact(&Request::ReadMemory { addr, len })?;
        match payload {
            Payload::Memory { data } => Ok(data),
            other => Err(unexpected_payload("ReadMemory", &other)),
        }
    }

    /// Write `data` into debuggee memory at `addr`.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the process has terminated or the agent
    /// refuses the access; with a library error on transport failure.
    pub fn write_mem(&self, addr: u64, data: &[u8]) -> TetherResult<()>
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;

        let payload = inner.require_transport()?.control.transact(&Request::WriteMemory {
            addr,
            data: data.to_vec(),
        })?;
        expect_empty(&payload, "WriteMemory")
    }

    /// Attach opaque data to this process, replacing any previous value.
    ///
    /// ## Errors
    ///
    /// Fails only if the registry entry lock is poisoned.
    pub fn set_user_data(&self, data: Box<dyn Any + Send>) -> TetherResult<()>
    {
        self.inner.lock()?.user_data = Some(data);
        Ok(())
    }

    /// Run `f` against the attached user data, if any.
    ///
    /// The closure form keeps the borrow inside the registry entry lock;
    /// downcast inside the closure.
    ///
    /// ## Errors
    ///
    /// Fails only if the registry entry lock is poisoned.
    pub fn with_user_data<R>(&self, f: impl FnOnce(Option<&mut (dyn Any + Send)>) -> R) -> TetherResult<R>
    {
        let mut inner = self.inner.lock()?;
        Ok(f(inner.user_data.as_deref_mut()))
    }

    /// Release controller-side resources for this process.
    ///
    /// Closes the channels and drops thread, breakpoint, and user-data
    /// state. Idempotent, and safe to call after termination; subsequent
    /// control requests fail with a request error. The debuggee itself is
    /// not signalled in any way.
    ///
    /// ## Errors
    ///
    /// Fails only if the registry entry lock is poisoned.
    pub fn release(&self) -> TetherResult<()>
    {
        let mut inner = self.inner.lock()?;
        if inner.transport.take().is_some() {
            debug!("Released process {}", self.pid);
        }
        inner.running = false;
        inner.threads.clear();
        inner.breakpoints = BreakpointTable::new();
        inner.user_data = None;
        Ok(())
    }
}

impl PartialEq for Process
{
    fn eq(&self, other: &Self) -> bool
    {
        self.pid == other.pid
    }
}

impl Eq for Process {}

impl fmt::Debug for Process
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("architecture", &self.arch)
            .field("multithread", &self.multithread)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

/// Check for the empty payload that acknowledges side-effect-only requests.
pub(crate) fn expect_empty(payload: &Payload, op: &str) -> TetherResult<()>
{
    match payload {
        Payload::Empty => Ok(()),
        other => Err(unexpected_payload(op, other)),
    }
}
