//! Control-channel request and response messages.
//!
//! Requests are an externally tagged enum: the tag is the operation code and
//! the body carries the address/size/register/value fields the operation
//! needs. Thread-targeted operations carry the thread id explicitly because
//! every request for a process travels on that process's single control
//! channel.
//!
//! Breakpoint `create` and `delete` have no request here on purpose: they
//! are controller-local bookkeeping and only `install`/`remove` touch the
//! debuggee. The install response returns the instruction bytes the trap
//! overwrote; the remove request carries them back so the agent never has to
//! remember them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registers::Register;
use crate::Architecture;

/// Run-state of a thread as tracked by the controller and reported by the
/// agent in [`Payload::States`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState
{
    /// The thread is eligible to execute when the process is continued.
    Running,
    /// The thread stays parked while other threads execute.
    Suspended,
}

impl fmt::Display for RunState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            RunState::Running => write!(f, "RUNNING"),
            RunState::Suspended => write!(f, "SUSPENDED"),
        }
    }
}

/// A control operation sent from the controller to the agent.
///
/// One request is outstanding per control channel at a time; the agent
/// answers every request with exactly one [`Response`], in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request
{
    /// Handshake; must be the first request on a fresh control channel.
    Init,
    /// Resume execution of every running thread, delivering `sig` to the
    /// debuggee (0 for none).
    Continue
    {
        /// Signal to deliver on resume, 0 for none.
        sig: u32,
    },
    /// Read `len` bytes of debuggee memory at `addr`.
    ReadMemory
    {
        /// Virtual address to read from.
        addr: u64,
        /// Exact number of bytes to transfer.
        len: u32,
    },
    /// Write `data` into debuggee memory at `addr`.
    WriteMemory
    {
        /// Virtual address to write to.
        addr: u64,
        /// Bytes to write, transferred exactly.
        data: Vec<u8>,
    },
    /// Read one register of the named thread.
    ReadRegister
    {
        /// Target thread.
        tid: u64,
        /// Register to read; must belong to the debuggee's architecture.
        reg: Register,
    },
    /// Write one register of the named thread.
    WriteRegister
    {
        /// Target thread.
        tid: u64,
        /// Register to write; must belong to the debuggee's architecture.
        reg: Register,
        /// New register value.
        value: u64,
    },
    /// Report the run-state of every thread.
    State,
    /// Patch a trap over the instruction at `addr`; the response returns the
    /// original bytes.
    InstallBreakpoint
    {
        /// Breakpoint address.
        addr: u64,
    },
    /// Restore the original bytes previously returned by install.
    RemoveBreakpoint
    {
        /// Breakpoint address.
        addr: u64,
        /// Bytes the trap overwrote, as returned by the install response.
        original: Vec<u8>,
    },
    /// Park the named thread.
    ThreadSuspend
    {
        /// Target thread.
        tid: u64,
    },
    /// Unpark the named thread.
    ThreadResume
    {
        /// Target thread.
        tid: u64,
    },
    /// Toggle single-step delivery for the named thread.
    SingleStep
    {
        /// Target thread.
        tid: u64,
        /// New setting; the response reports the prior one.
        enable: bool,
    },
}

impl Request
{
    /// Operation name for diagnostics and logging.
    #[must_use]
    pub const fn name(&self) -> &'static str
    {
        match self {
            Request::Init => "init",
            Request::Continue { .. } => "continue",
            Request::ReadMemory { .. } => "read_memory",
            Request::WriteMemory { .. } => "write_memory",
            Request::ReadRegister { .. } => "read_register",
            Request::WriteRegister { .. } => "write_register",
            Request::State => "state",
            Request::InstallBreakpoint { .. } => "install_breakpoint",
            Request::RemoveBreakpoint { .. } => "remove_breakpoint",
            Request::ThreadSuspend { .. } => "thread_suspend",
            Request::ThreadResume { .. } => "thread_resume",
            Request::SingleStep { .. } => "single_step",
        }
    }
}

/// Error category carried by a refused request, mirroring the controller's
/// error model so agent-side failures land in the right variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode
{
    /// The request was invalid given the debuggee's current state.
    Request,
    /// The agent hit an internal failure; the channel should be abandoned.
    Library,
    /// The agent could not allocate memory for the operation.
    NoMem,
}

/// Data returned by the agent during the `Init` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPayload
{
    /// Protocol revision the agent speaks; see [`crate::PROTOCOL_VERSION`].
    pub version: u32,
    /// Architecture of the debuggee.
    pub arch: Architecture,
    /// Whether the debuggee links a thread library and may create threads.
    pub multithread: bool,
    /// Thread id of the debuggee's initial thread.
    pub initial_tid: u64,
}

/// Run-state of one thread inside a [`Payload::States`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRunState
{
    /// Thread id.
    pub tid: u64,
    /// Reported run-state.
    pub state: RunState,
}

/// Operation-specific body of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload
{
    /// The operation completed and returns nothing.
    Empty,
    /// Handshake data.
    Init(InitPayload),
    /// Bytes read from debuggee memory.
    Memory
    {
        /// The bytes, exactly as many as requested.
        data: Vec<u8>,
    },
    /// A register value.
    Register
    {
        /// The value.
        value: u64,
    },
    /// Run-states of all threads, in creation order.
    States
    {
        /// One entry per live thread.
        threads: Vec<ThreadRunState>,
    },
    /// Breakpoint installed; the bytes the trap overwrote.
    Installed
    {
        /// Original instruction bytes at the breakpoint address.
        original: Vec<u8>,
    },
    /// Single-step toggled; the setting that was previously in effect.
    StepSetting
    {
        /// Prior single-step setting.
        prior: bool,
    },
}

impl Payload
{
    /// Payload variant name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str
    {
        match self {
            Payload::Empty => "empty",
            Payload::Init(_) => "init",
            Payload::Memory { .. } => "memory",
            Payload::Register { .. } => "register",
            Payload::States { .. } => "states",
            Payload::Installed { .. } => "installed",
            Payload::StepSetting { .. } => "step_setting",
        }
    }
}

/// The agent's answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response
{
    /// The request succeeded.
    Valid(Payload),
    /// The request was refused or failed.
    Error
    {
        /// Failure category.
        code: ErrorCode,
        /// Agent-supplied diagnostic.
        msg: String,
    },
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::registers::X86_64Register;

    #[test]
    fn request_tag_is_the_operation_code()
    {
        let req = Request::ReadMemory { addr: 0x1000, len: 8 };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, serde_json::json!({ "ReadMemory": { "addr": 0x1000, "len": 8 } }));
    }

    #[test]
    fn thread_requests_carry_the_tid()
    {
        let req = Request::ReadRegister {
            tid: 42,
            reg: Register::X86_64(X86_64Register::Rip),
        };
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: Request = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn error_response_keeps_code_and_message()
    {
        let resp = Response::Error {
            code: ErrorCode::Request,
            msg: "no breakpoint at 0x4000".to_owned(),
        };
        let bytes = serde_json::to_vec(&resp).unwrap();
        let back: Response = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn states_report_round_trips()
    {
        let resp = Response::Valid(Payload::States {
            threads: vec![
                ThreadRunState { tid: 1, state: RunState::Running },
                ThreadRunState { tid: 2, state: RunState::Suspended },
            ],
        });
        let bytes = serde_json::to_vec(&resp).unwrap();
        let back: Response = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, resp);
    }
}
