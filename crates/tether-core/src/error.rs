//! # Error Types
//!
//! General error handling for the controller.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Every failure a caller can see collapses into one of three recoverable
//! categories (see [`ErrorCategory`]):
//!
//! 1. **Library**: the transport or the agent is broken. The affected process
//!    should be treated as unusable and released.
//! 2. **Request**: the operation was rejected as invalid given current state,
//!    either by local validation or by the agent. State is unchanged and the
//!    process remains usable.
//! 3. **`NoMem`**: an allocation failed while building a request, response, or
//!    event payload. The operation did not take effect.
//!
//! Success is simply `Ok(..)`; there is no success category to match on.

use std::io;
use std::sync::PoisonError;

use tether_protocol::{CodecError, ErrorCode};
use thiserror::Error;

/// Main error type for controller operations
///
/// This enum represents all the ways an operation against a debuggee can
/// fail. Variants are finer-grained than [`ErrorCategory`] so that transport
/// and codec failures keep their source errors attached; use
/// [`TetherError::category`] when only the coarse classification matters.
#[derive(Error, Debug)]
pub enum TetherError
{
    /// Internal failure: the channel, the agent, or this library is in a
    /// state it cannot recover from
    ///
    /// Examples:
    /// - The agent closed a channel mid-request
    /// - The agent answered with a payload the operation does not produce
    /// - The agent speaks an incompatible protocol version
    /// - A state lock was poisoned by a panicking thread
    #[error("Library error: {0}")]
    Library(String),

    /// The operation was rejected as invalid given current state
    ///
    /// This covers both local validation (wrong register family for the
    /// architecture, suspending the last running thread, illegal breakpoint
    /// transitions, duplicate processes in a wait set, operations on a
    /// terminated process) and rejections reported by the agent. The message
    /// always says what was wrong; nothing about the process changed.
    #[error("Invalid request: {0}")]
    Request(String),

    /// An allocation failed while building a request, response, or event
    /// payload
    ///
    /// The operation did not take effect. Smaller requests may still succeed.
    #[error("Out of memory")]
    OutOfMemory,

    /// I/O error on a channel (for FIFO opens, reads, writes, etc.)
    ///
    /// This is a standard Rust `std::io::Error` converted to our error type.
    /// Categorized as a library error: a channel that fails I/O is unusable.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The wire codec could not frame or unframe a message
    ///
    /// Truncated or oversized frames and malformed bodies mean the channel
    /// state is unknown, so these categorize as library errors. The one
    /// exception is [`CodecError::OutOfMemory`], which categorizes as
    /// [`ErrorCategory::NoMem`].
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl TetherError
{
    /// Coarse classification of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory
    {
        match self {
            Self::Request(_) => ErrorCategory::Request,
            Self::OutOfMemory | Self::Codec(CodecError::OutOfMemory(_)) => ErrorCategory::NoMem,
            Self::Library(_) | Self::Io(_) | Self::Codec(_) => ErrorCategory::Library,
        }
    }

    /// Map an error reported by the agent into the matching variant.
    ///
    /// The agent's diagnostic message is kept verbatim so callers see what
    /// the agent actually complained about.
    pub(crate) fn from_agent(code: ErrorCode, msg: String) -> Self
    {
        match code {
            ErrorCode::Request => Self::Request(msg),
            ErrorCode::Library => Self::Library(msg),
            ErrorCode::NoMem => Self::OutOfMemory,
        }
    }
}

/// A poisoned lock means another thread panicked while holding process state.
/// There is no safe recovery, so it surfaces as a library error.
impl<T> From<PoisonError<T>> for TetherError
{
    fn from(err: PoisonError<T>) -> Self
    {
        Self::Library(format!("process state lock poisoned: {err}"))
    }
}

/// Coarse error classification
///
/// Every [`TetherError`] maps onto exactly one of these. The names mirror the
/// error codes the agent uses on the wire, so a remote rejection and its
/// local classification always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory
{
    /// Internal or transport failure; the process should be released
    Library,
    /// Invalid operation for the current state; the process is still usable
    Request,
    /// Allocation failure; the operation did not take effect
    NoMem,
}

impl std::fmt::Display for ErrorCategory
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        let name = match self {
            Self::Library => "LIBRARY",
            Self::Request => "REQUEST",
            Self::NoMem => "NOMEM",
        };
        write!(f, "{name}")
    }
}

/// Convenience type alias for `Result<T, TetherError>`
///
/// ```rust
/// use tether_core::error::TetherResult;
/// fn foo() -> TetherResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type TetherResult<T> = std::result::Result<T, TetherError>;
