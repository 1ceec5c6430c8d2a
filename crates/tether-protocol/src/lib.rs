//! # tether-protocol
//!
//! Wire protocol between the tether controller and its injected runtime
//! agents.
//!
//! Each debuggee carries an injected agent that the controller talks to over
//! a pair of per-process byte channels: a synchronous request/response
//! control channel and an asynchronous event channel. This crate defines
//! everything that crosses those channels:
//!
//! - [`Request`] / [`Response`] messages for the control channel
//! - [`EventFrame`] messages for the event channel
//! - [`Register`] and [`Architecture`] enumerations shared by both sides
//! - the length-prefixed frame codec in [`codec`]
//!
//! The crate is deliberately free of any I/O policy beyond framing: the
//! controller engine decides when to read and write, the agent decides when
//! to emit events. Both sides only agree on what the bytes mean.

pub mod codec;
pub mod event;
pub mod message;
pub mod registers;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use codec::{read_frame, write_frame, CodecError, MAX_FRAME_LEN};
pub use event::{EventFrame, EventKind};
pub use message::{ErrorCode, InitPayload, Payload, Request, Response, RunState, ThreadRunState};
pub use registers::{Register, X86Register, X86_64Register};

/// Protocol revision spoken by this crate.
///
/// The agent reports its own revision in the [`InitPayload`] handshake; a
/// controller must refuse to drive an agent speaking a different revision.
pub const PROTOCOL_VERSION: u32 = 1;

/// Trap instruction byte an agent patches over the original instruction when
/// a breakpoint is installed (`int3` on both supported architectures).
pub const TRAP_INSTRUCTION: u8 = 0xCC;

/// Width of the trap instruction in bytes, identical on both supported
/// architectures.
pub const TRAP_LEN: u64 = 1;

/// FIFO name for control requests inside a process's channel directory.
pub const REQUEST_FIFO: &str = "request";

/// FIFO name for control responses inside a process's channel directory.
pub const RESPONSE_FIFO: &str = "response";

/// FIFO name for asynchronous events inside a process's channel directory.
///
/// Agents create this FIFO last, so its existence marks the channel
/// directory as ready for the controller to connect.
pub const EVENTS_FIFO: &str = "events";

/// Instruction set architecture of a debuggee.
///
/// Reported by the agent during the `Init` handshake and fixed for the
/// lifetime of the process. Register identifiers are validated against it
/// before any request leaves the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture
{
    /// 32-bit x86.
    X86,
    /// 64-bit x86.
    X86_64,
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X86_64 => write!(f, "x86_64"),
        }
    }
}
