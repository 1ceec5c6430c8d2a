//! Event-channel frames.
//!
//! The agent pushes these asynchronously whenever the debuggee changes
//! state; the controller drains them in `wait_for_events`. Every frame
//! names the reporting thread. `ProcessCleanup` is special: agents never
//! send it. The controller synthesizes it when the event channel reaches
//! end-of-file, which is how an agent signals that the debuggee is gone.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What happened in the debuggee, plus the payload fields meaningful to
/// that kind of event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind
{
    /// The agent hit an internal error; the process should be abandoned.
    Error
    {
        /// Agent-supplied diagnostic.
        msg: String,
    },
    /// The debuggee received a signal.
    Signal
    {
        /// Address at which the signal was delivered.
        addr: u64,
        /// Signal number.
        sig: u32,
    },
    /// A thread hit an installed breakpoint.
    Breakpoint
    {
        /// Breakpoint address.
        addr: u64,
    },
    /// The debuggee created a new thread.
    ThreadCreate
    {
        /// Thread id of the new thread.
        tid: u64,
    },
    /// The reporting thread exited.
    ThreadDeath,
    /// The debuggee called exit.
    ProcessExit
    {
        /// Exit code.
        code: i32,
    },
    /// The debuggee forked; the child is a new debuggee identity.
    ProcessFork
    {
        /// Process id of the child.
        pid: u32,
    },
    /// The debuggee exec'd a new image; a new identity now applies.
    ProcessExec
    {
        /// Path of the new image.
        path: String,
        /// Argument vector passed to exec.
        argv: Vec<String>,
        /// Environment passed to exec.
        envp: Vec<String>,
    },
    /// The reporting thread completed a single step.
    SingleStep,
    /// The event channel closed; the debuggee and its agent are gone.
    /// Synthesized by the controller, never sent by an agent.
    ProcessCleanup,
}

impl EventKind
{
    /// Stable diagnostic name for this kind of event.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str
    {
        match self {
            EventKind::Error { .. } => "ERROR",
            EventKind::Signal { .. } => "SIGNAL",
            EventKind::Breakpoint { .. } => "BREAKPOINT",
            EventKind::ThreadCreate { .. } => "THREAD_CREATE",
            EventKind::ThreadDeath => "THREAD_DEATH",
            EventKind::ProcessExit { .. } => "PROCESS_EXIT",
            EventKind::ProcessFork { .. } => "PROCESS_FORK",
            EventKind::ProcessExec { .. } => "PROCESS_EXEC",
            EventKind::SingleStep => "SINGLE_STEP",
            EventKind::ProcessCleanup => "PROCESS_CLEANUP",
        }
    }
}

impl fmt::Display for EventKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            EventKind::Error { msg } => write!(f, "ERROR: {msg}"),
            EventKind::Signal { addr, sig } => {
                write!(f, "SIGNAL {sig} at 0x{addr:x}")
            }
            EventKind::Breakpoint { addr } => write!(f, "BREAKPOINT at 0x{addr:x}"),
            EventKind::ThreadCreate { tid } => write!(f, "THREAD_CREATE tid 0x{tid:x}"),
            EventKind::ProcessExit { code } => write!(f, "PROCESS_EXIT with code {code}"),
            EventKind::ProcessFork { pid } => write!(f, "PROCESS_FORK child {pid}"),
            EventKind::ProcessExec { path, .. } => write!(f, "PROCESS_EXEC into {path}"),
            EventKind::ThreadDeath | EventKind::SingleStep | EventKind::ProcessCleanup => {
                f.write_str(self.kind_name())
            }
        }
    }
}

/// One frame on the event channel: the reporting thread plus the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame
{
    /// Thread the agent attributes the event to.
    pub tid: u64,
    /// The event itself.
    pub event: EventKind,
}
