//! # Thread Handle
//!
//! Per-thread operations on a debuggee.
//!
//! A `Thread` does not own any state of its own; it pairs a thread id with a
//! clone of the owning [`Process`] handle and resolves through the process's
//! registry entry for every operation. Thread-targeted requests carry the
//! thread id in the request body and travel on the owning process's control
//! channel.
//!
//! Once a `THREAD_DEATH` event for a thread has been observed, the entry
//! stays in the process's thread list but every operation on the handle
//! fails locally with a request error.

use std::any::Any;
use std::fmt;

use tether_protocol::{Payload, Register, Request, RunState, TRAP_LEN};
use tracing::debug;

use crate::error::{TetherError, TetherResult};
use crate::process::{expect_empty, Process};
use crate::transport::unexpected_payload;

/// Handle to a single thread of a debuggee process.
///
/// Handles are cheap to clone. Two handles are equal when they refer to the
/// same thread id.
#[derive(Clone)]
pub struct Thread
{
    tid: u64,
    process: Process,
}

impl Thread
{
    pub(crate) fn new(tid: u64, process: Process) -> Self
    {
        Self { tid, process }
    }

    /// Thread id assigned by the agent.
    #[must_use]
    pub fn tid(&self) -> u64
    {
        self.tid
    }

    /// Handle to the owning process.
    #[must_use]
    pub fn process(&self) -> Process
    {
        self.process.clone()
    }

    /// Cached run-state of this thread.
    ///
    /// Reflects completed operations and delivered events; call
    /// [`Process::refresh_state`] to re-query the agent.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the thread is no longer registered.
    pub fn state(&self) -> TetherResult<RunState>
    {
        let mut inner = self.process.inner().lock()?;
        Ok(inner.entry_mut(self.tid)?.state)
    }

    /// The thread created after this one, in creation order.
    ///
    /// Returns `Ok(None)` for the most recently created thread.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if this thread is no longer registered.
    pub fn next_thread(&self) -> TetherResult<Option<Thread>>
    {
        let inner = self.process.inner().lock()?;
        let position = inner
            .threads
            .iter()
            .position(|entry| entry.tid == self.tid)
            .ok_or_else(|| {
                TetherError::Request(format!(
                    "thread 0x{:x} is not registered with process {}",
                    self.tid,
                    self.process.pid()
                ))
            })?;
        Ok(inner
            .threads
            .get(position + 1)
            .map(|entry| Thread::new(entry.tid, self.process.clone())))
    }

    /// Suspend this thread.
    ///
    /// Suspending an already suspended thread re-sends the request and is
    /// not an error.
    ///
    /// ## Errors
    ///
    /// Fails with a request error, before anything touches the channel, if
    /// the thread has died or if suspending it would leave the process with
    /// no running threads; with a request error if the agent refuses; with a
    /// library error on transport failure.
    pub fn suspend(&self) -> TetherResult<()>
    {
        let mut guard = self.process.inner().lock()?;
        let inner = &mut *guard;

        let state = inner.live_entry_mut(self.tid)?.state;
        if state == RunState::Running && inner.running_threads_excluding(self.tid) == 0 {
            return Err(TetherError::Request(format!(
                "suspending thread 0x{:x} would leave process {} with no running threads",
                self.tid,
                self.process.pid()
            )));
        }

        let payload = inner
            .require_transport()?
            .control
            .transact(&Request::ThreadSuspend { tid: self.tid })?;
        expect_empty(&payload, "ThreadSuspend")?;

        inner.entry_mut(self.tid)?.state = RunState::Suspended;
        debug!("Suspended thread 0x{:x} in process {}", self.tid, self.process.pid());
        Ok(())
    }

    /// Resume this thread.
    ///
    /// Resuming an already running thread re-sends the request and is not an
    /// error.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the thread has died or the agent
    /// refuses; with a library error on transport failure.
    pub fn resume(&self) -> TetherResult<()>
    {
        let mut guard = self.process.inner().lock()?;
        let inner = &mut *guard;

        inner.live_entry_mut(self.tid)?;

        let payload = inner
            .require_transport()?
            .control
            .transact(&Request::ThreadResume { tid: self.tid })?;
        expect_empty(&payload, "ThreadResume")?;

        inner.entry_mut(self.tid)?.state = RunState::Running;
        debug!("Resumed thread 0x{:x} in process {}", self.tid, self.process.pid());
        Ok(())
    }

    /// Enable or disable single stepping for this thread.
    ///
    /// While enabled, the thread reports a `SINGLE_STEP` event after each
    /// instruction once the process is continued.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the thread has died or the agent
    /// refuses; with a library error on transport failure.
    pub fn set_single_step(&self, enable: bool) -> TetherResult<()>
    {
        let mut guard = self.process.inner().lock()?;
        let inner = &mut *guard;

        inner.live_entry_mut(self.tid)?;

        let payload = inner
            .require_transport()?
            .control
            .transact(&Request::SingleStep { tid: self.tid, enable })?;
        let prior = match payload {
            Payload::StepSetting { prior } => prior,
            other => return Err(unexpected_payload("SingleStep", &other)),
        };

        inner.entry_mut(self.tid)?.single_step = enable;
        debug!(
            "Single step for thread 0x{:x} set to {} (was {})",
            self.tid, enable, prior
        );
        Ok(())
    }

    /// Cached single-step setting for this thread.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the thread is no longer registered.
    pub fn single_step(&self) -> TetherResult<bool>
    {
        let mut inner = self.process.inner().lock()?;
        Ok(inner.entry_mut(self.tid)?.single_step)
    }

    /// Read `reg` from this thread's register context.
    ///
    /// ## Errors
    ///
    /// Fails with a request error, before anything touches the channel, if
    /// `reg` does not belong to the process architecture or the thread has
    /// died; with a request error if the agent refuses; with a library error
    /// on transport failure.
    pub fn read_register(&self, reg: Register) -> TetherResult<u64>
    {
        self.check_register_family(reg)?;

        let mut guard = self.process.inner().lock()?;
        let inner = &mut *guard;

        inner.live_entry_mut(self.tid)?;

        let payload = inner
            .require_transport()?
            .control
            .transact(&Request::ReadRegister { tid: self.tid, reg })?;
        match payload {
            Payload::Register { value } => Ok(value),
            other => Err(unexpected_payload("ReadRegister", &other)),
        }
    }

    /// Write `value` into `reg` in this thread's register context.
    ///
    /// ## Errors
    ///
    /// Fails with a request error, before anything touches the channel, if
    /// `reg` does not belong to the process architecture or the thread has
    /// died; with a request error if the agent refuses; with a library error
    /// on transport failure.
    pub fn write_register(&self, reg: Register, value: u64) -> TetherResult<()>
    {
        self.check_register_family(reg)?;

        let mut guard = self.process.inner().lock()?;
        let inner = &mut *guard;

        inner.live_entry_mut(self.tid)?;

        let payload = inner.require_transport()?.control.transact(&Request::WriteRegister {
            tid: self.tid,
            reg,
            value,
        })?;
        expect_empty(&payload, "WriteRegister")
    }

    /// Read this thread's program counter.
    ///
    /// ## Errors
    ///
    /// Same failure modes as [`Thread::read_register`].
    pub fn get_pc(&self) -> TetherResult<u64>
    {
        self.read_register(Register::pc(self.process.architecture()))
    }

    /// Address of the next instruction this thread will execute.
    ///
    /// Usually the program counter, except when the thread is stopped just
    /// past an installed trap: then the pre-trap address is reported, since
    /// that is where execution resumes once the original bytes are restored.
    ///
    /// ## Errors
    ///
    /// Same failure modes as [`Thread::read_register`].
    pub fn get_next_instruction(&self) -> TetherResult<u64>
    {
        let pc = self.get_pc()?;

        if let Some(trap_addr) = pc.checked_sub(TRAP_LEN) {
            let inner = self.process.inner().lock()?;
            if inner.breakpoints.installed_at(trap_addr) {
                return Ok(trap_addr);
            }
        }
        Ok(pc)
    }

    /// Attach opaque data to this thread, replacing any previous value.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the thread is no longer registered.
    pub fn set_user_data(&self, data: Box<dyn Any + Send>) -> TetherResult<()>
    {
        let mut inner = self.process.inner().lock()?;
        inner.entry_mut(self.tid)?.user_data = Some(data);
        Ok(())
    }

    /// Run `f` against the attached user data, if any.
    ///
    /// ## Errors
    ///
    /// Fails with a request error if the thread is no longer registered.
    pub fn with_user_data<R>(
        &self,
        f: impl FnOnce(Option<&mut (dyn Any + Send)>) -> R,
    ) -> TetherResult<R>
    {
        let mut inner = self.process.inner().lock()?;
        let entry = inner.entry_mut(self.tid)?;
        Ok(f(entry.user_data.as_deref_mut()))
    }

    fn check_register_family(&self, reg: Register) -> TetherResult<()>
    {
        let arch = self.process.architecture();
        if reg.architecture() != arch {
            return Err(TetherError::Request(format!(
                "register {} is not part of the {arch} register family",
                reg.name()
            )));
        }
        Ok(())
    }
}

impl PartialEq for Thread
{
    fn eq(&self, other: &Self) -> bool
    {
        self.tid == other.tid
    }
}

impl Eq for Thread {}

impl fmt::Debug for Thread
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("pid", &self.process.pid())
            .finish()
    }
}
