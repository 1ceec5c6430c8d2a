//! # tether-core
//!
//! Controller engine for tether: user-mode debugging of processes that
//! carry an injected runtime agent.
//!
//! This crate provides the controller half of the system, including:
//! - Debuggee creation with agent injection ([`create_process`])
//! - Per-process and per-thread control handles ([`Process`], [`Thread`])
//! - Breakpoint lifecycle management on top of trap patching
//! - Memory and register access through the agent
//! - Multiplexed event delivery ([`wait_for_events`])
//!
//! ## How it works
//!
//! The controller never traces anything itself. Each debuggee is spawned
//! with the runtime agent preloaded into it; the agent intercepts execution
//! and serves requests over a per-process pair of FIFO channels, one
//! synchronous request/response channel and one asynchronous event channel.
//! Everything this crate does reduces to framed messages on those channels,
//! defined in `tether-protocol`.

pub mod breakpoints;
pub mod config;
pub mod error;
pub mod events;
pub mod launch;
pub mod process;
pub mod thread;

mod transport;

pub use breakpoints::BreakpointState;
pub use config::{ProcessConfig, DEFAULT_ROOT_DIR, DEFAULT_RT_LIB, ROOT_DIR_ENV};
// Re-export commonly used types
pub use error::{ErrorCategory, TetherError, TetherResult};
pub use events::{wait_for_events, Event};
pub use launch::create_process;
pub use process::Process;
pub use thread::Thread;
// Protocol vocabulary that appears in the public API.
pub use tether_protocol::{Architecture, EventKind, Register, RunState, X86Register, X86_64Register};
