//! # Event Delivery
//!
//! Multiplexed waiting on debuggee event channels.
//!
//! [`wait_for_events`] blocks across every supplied process at once and
//! returns as soon as at least one event is available, draining whatever
//! frames are already pending so a burst arrives as one batch. No registry
//! lock is held while blocked, so other controller threads can keep issuing
//! control requests during the wait.
//!
//! Delivery is where cached process state catches up with reality: every
//! event marks its process not running, `THREAD_CREATE` registers the new
//! thread, `THREAD_DEATH` marks the reporting thread dead, `PROCESS_EXIT`
//! marks the process terminated. When an event channel reaches end-of-file
//! the agent is gone; the channel is closed and a final `PROCESS_CLEANUP`
//! event is synthesized exactly once.

use std::collections::HashSet;
use std::fmt;
use std::os::fd::AsFd;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tether_protocol::{EventFrame, EventKind};
use tracing::debug;

use crate::error::{TetherError, TetherResult};
use crate::process::{Process, ProcessInner, ThreadEntry};
use crate::thread::Thread;

/// One debuggee state change delivered to the controller.
#[derive(Debug)]
pub struct Event
{
    process: Process,
    thread: Option<Thread>,
    data: EventKind,
}

impl Event
{
    /// Process this event originated from.
    #[must_use]
    pub fn process(&self) -> &Process
    {
        &self.process
    }

    /// Thread the agent attributes the event to.
    ///
    /// `None` only for `PROCESS_CLEANUP`, which reports the disappearance of
    /// the whole debuggee rather than anything a thread did.
    #[must_use]
    pub fn thread(&self) -> Option<&Thread>
    {
        self.thread.as_ref()
    }

    /// The event itself.
    #[must_use]
    pub fn data(&self) -> &EventKind
    {
        &self.data
    }
}

impl fmt::Display for Event
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.thread {
            Some(thread) => write!(
                f,
                "process {} thread 0x{:x}: {}",
                self.process.pid(),
                thread.tid(),
                self.data
            ),
            None => write!(f, "process {}: {}", self.process.pid(), self.data),
        }
    }
}

/// Block until at least one of `processes` delivers an event.
///
/// Pending frames on every ready channel are drained before returning, so
/// the result can carry several events, possibly from several processes.
/// Events for one process appear in arrival order.
///
/// ## Errors
///
/// Fails with a request error, before blocking, if `processes` is empty,
/// contains the same process twice, or contains a process whose event
/// channel is already closed (released, or terminated and fully drained).
/// Fails with a library error if polling fails or an agent violates the
/// protocol (undecodable frame, or an event for a thread it never
/// announced).
pub fn wait_for_events(processes: &[Process]) -> TetherResult<Vec<Event>>
{
    if processes.is_empty() {
        return Err(TetherError::Request("no processes to wait on".to_owned()));
    }

    let mut seen = HashSet::new();
    for process in processes {
        if !seen.insert(process.pid()) {
            return Err(TetherError::Request(format!(
                "process {} appears more than once in the wait set",
                process.pid()
            )));
        }
    }

    // Duplicated fds keep the poll set valid without holding any registry
    // lock while blocked.
    let mut files = Vec::with_capacity(processes.len());
    for process in processes {
        let inner = process.inner().lock()?;
        let transport = inner.transport.as_ref().ok_or_else(|| {
            TetherError::Request(format!("event channel for process {} is closed", process.pid()))
        })?;
        files.push(transport.events.dup_for_poll()?);
    }

    let ready_flags = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    let mut events = Vec::new();
    while events.is_empty() {
        let mut fds: Vec<PollFd<'_>> = files
            .iter()
            .map(|file| PollFd::new(file.as_fd(), PollFlags::POLLIN))
            .collect();
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(err) => {
                return Err(TetherError::Library(format!("polling event channels failed: {err}")));
            }
        }

        let ready: Vec<bool> = fds
            .iter()
            .map(|fd| fd.revents().is_some_and(|flags| flags.intersects(ready_flags)))
            .collect();
        drop(fds);

        for (process, ready) in processes.iter().zip(ready) {
            if ready {
                drain_channel(process, &mut events)?;
            }
        }
    }

    Ok(events)
}

/// Read every frame currently pending on one process's event channel.
fn drain_channel(process: &Process, events: &mut Vec<Event>) -> TetherResult<()>
{
    let mut guard = process.inner().lock()?;
    let inner = &mut *guard;

    loop {
        let Some(transport) = inner.transport.as_mut() else {
            return Ok(());
        };
        if !transport.events.has_pending()? {
            return Ok(());
        }

        match transport.events.read_event()? {
            Some(frame) => {
                let event = deliver(process, inner, frame)?;
                events.push(event);
            }
            None => {
                // End-of-file: the agent is gone. Close the channel and
                // report the disappearance exactly once.
                inner.transport = None;
                inner.terminated = true;
                inner.running = false;
                debug!("Event channel for process {} closed", process.pid());
                events.push(Event {
                    process: process.clone(),
                    thread: None,
                    data: EventKind::ProcessCleanup,
                });
                return Ok(());
            }
        }
    }
}

/// Apply one decoded frame to cached process state and wrap it for the user.
fn deliver(process: &Process, inner: &mut ProcessInner, frame: EventFrame) -> TetherResult<Event>
{
    // An event always means the debuggee stopped to report it.
    inner.running = false;

    let known = inner.threads.iter().any(|entry| entry.tid == frame.tid);
    if !known {
        return Err(TetherError::Library(format!(
            "agent for process {} reported an event for unknown thread 0x{:x}",
            process.pid(),
            frame.tid
        )));
    }

    match &frame.event {
        EventKind::ThreadCreate { tid } => {
            if inner.threads.iter().any(|entry| entry.tid == *tid) {
                return Err(TetherError::Library(format!(
                    "agent for process {} announced duplicate thread 0x{:x}",
                    process.pid(),
                    tid
                )));
            }
            inner.threads.push(ThreadEntry::new(*tid));
        }
        EventKind::ThreadDeath => {
            if let Ok(entry) = inner.entry_mut(frame.tid) {
                entry.alive = false;
            }
        }
        EventKind::ProcessExit { .. } => {
            inner.terminated = true;
        }
        _ => {}
    }

    debug!("Event from process {}: {}", process.pid(), frame.event);
    Ok(Event {
        process: process.clone(),
        thread: Some(Thread::new(frame.tid, process.clone())),
        data: frame.event,
    })
}
