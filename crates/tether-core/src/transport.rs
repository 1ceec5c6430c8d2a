//! # Channel Transport
//!
//! Per-process FIFO channels between the controller and the injected agent.
//!
//! The agent creates three FIFOs under `<root_dir>/<username>/<pid>/`:
//!
//! - `request`: controller to agent, control requests
//! - `response`: agent to controller, one response per request
//! - `events`: agent to controller, asynchronous event frames
//!
//! FIFO opens block until the other side opens too, so both sides follow the
//! same order: the controller opens `request` for writing, sends `Init`,
//! opens `response` for reading, reads the handshake, then opens `events`.
//! The agent mirrors this (open `request` read, read `Init`, open `response`
//! write, answer, open `events` write). Deviating from this order deadlocks
//! both sides on open, which is why the handshake lives here next to the
//! opens instead of in a layer above.

use std::fs::{File, OpenOptions};
use std::os::fd::AsFd;
use std::path::Path;
use std::process::Child;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tether_protocol::{
    read_frame, write_frame, EventFrame, InitPayload, Payload, Request, Response, EVENTS_FIFO,
    PROTOCOL_VERSION, REQUEST_FIFO, RESPONSE_FIFO,
};
use tracing::{debug, trace, warn};

use crate::error::{TetherError, TetherResult};

/// How long to wait for a freshly spawned agent to create its FIFOs.
pub(crate) const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay between checks while waiting for the agent's FIFOs.
const RENDEZVOUS_POLL: Duration = Duration::from_millis(10);

/// Both channels of one process, owned by its registry entry.
pub(crate) struct Transport
{
    pub(crate) control: ControlChannel,
    pub(crate) events: EventChannel,
}

impl Transport
{
    /// Connect to a rendezvoused agent: perform the `Init` handshake on the
    /// control pair, then open the event channel.
    pub(crate) fn connect(dir: &Path) -> TetherResult<(Self, InitPayload)>
    {
        let (control, init) = ControlChannel::connect(dir)?;
        let events = EventChannel::open(dir)?;
        Ok((Self { control, events }, init))
    }
}

/// The request/response FIFO pair.
///
/// One request may be outstanding at a time; the registry entry lock on the
/// owning process enforces that, so this type does no locking of its own.
pub(crate) struct ControlChannel
{
    request: File,
    response: File,
}

impl ControlChannel
{
    /// Open the control pair and perform the `Init` handshake.
    ///
    /// Fails with a library error if the agent answers with anything but a
    /// valid `Init` payload or speaks a protocol version we do not.
    fn connect(dir: &Path) -> TetherResult<(Self, InitPayload)>
    {
        let request_path = dir.join(REQUEST_FIFO);
        debug!("Opening control channel: {}", request_path.display());
        let mut request = OpenOptions::new().write(true).open(&request_path)?;

        // The agent reads Init before it opens the response FIFO for
        // writing, so the request must go out before we open our read side.
        write_frame(&mut request, &Request::Init)?;

        let response_path = dir.join(RESPONSE_FIFO);
        let mut response = File::open(&response_path)?;

        let init = match read_frame::<_, Response>(&mut response)? {
            None => {
                return Err(TetherError::Library(
                    "agent closed the control channel during the Init handshake".to_string(),
                ));
            }
            Some(Response::Error { code, msg }) => return Err(TetherError::from_agent(code, msg)),
            Some(Response::Valid(Payload::Init(init))) => init,
            Some(Response::Valid(other)) => {
                return Err(TetherError::Library(format!(
                    "Init answered with unexpected {} payload",
                    other.name()
                )));
            }
        };

        if init.version != PROTOCOL_VERSION {
            return Err(TetherError::Library(format!(
                "agent speaks protocol version {} but this controller speaks {}",
                init.version, PROTOCOL_VERSION
            )));
        }

        debug!(
            "Handshake complete: arch {}, multithread {}, initial thread 0x{:x}",
            init.arch, init.multithread, init.initial_tid
        );
        Ok((Self { request, response }, init))
    }

    /// Send one request and block until its response arrives.
    ///
    /// Agent-reported failures come back as the matching [`TetherError`]
    /// variant with the agent's diagnostic; a channel that closes mid-request
    /// is a library error.
    pub(crate) fn transact(&mut self, request: &Request) -> TetherResult<Payload>
    {
        trace!("Sending {} request", request.name());
        write_frame(&mut self.request, request)?;

        match read_frame::<_, Response>(&mut self.response)? {
            None => Err(TetherError::Library(format!(
                "agent closed the control channel during a {} request",
                request.name()
            ))),
            Some(Response::Error { code, msg }) => {
                warn!("Agent rejected {} request: {}", request.name(), msg);
                Err(TetherError::from_agent(code, msg))
            }
            Some(Response::Valid(payload)) => {
                trace!("Received {} payload", payload.name());
                Ok(payload)
            }
        }
    }
}

/// The read side of a process's event FIFO.
pub(crate) struct EventChannel
{
    // Deliberately unbuffered. Readiness is decided by polling the fd, and a
    // userspace buffer would hold frames the fd no longer reports.
    events: File,
}

impl EventChannel
{
    /// Open the event FIFO for reading.
    fn open(dir: &Path) -> TetherResult<Self>
    {
        let events = File::open(dir.join(EVENTS_FIFO))?;
        Ok(Self { events })
    }

    /// Duplicate the underlying descriptor so a caller can poll it without
    /// holding the owning process's registry entry lock.
    pub(crate) fn dup_for_poll(&self) -> TetherResult<File>
    {
        Ok(self.events.try_clone()?)
    }

    /// Whether at least one byte (or end-of-file) is ready right now.
    pub(crate) fn has_pending(&self) -> TetherResult<bool>
    {
        let mut fds = [PollFd::new(self.events.as_fd(), PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::ZERO)
            .map_err(|e| TetherError::Library(format!("poll on event channel failed: {e}")))?;
        if ready == 0 {
            return Ok(false);
        }
        Ok(fds[0]
            .revents()
            .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)))
    }

    /// Read one event frame, or `None` once the agent has closed its end.
    pub(crate) fn read_event(&mut self) -> TetherResult<Option<EventFrame>>
    {
        Ok(read_frame(&mut self.events)?)
    }
}

/// Wait for a freshly spawned debuggee's agent to create its FIFOs.
///
/// The agent creates `events` last, so its existence means the whole channel
/// directory is ready. A debuggee that dies first (bad executable, missing
/// runtime library, crash in early startup) is reported as a library error
/// with its exit status rather than leaving the caller to hit the timeout.
pub(crate) fn await_rendezvous(dir: &Path, child: &mut Child) -> TetherResult<()>
{
    let events_path = dir.join(EVENTS_FIFO);
    let deadline = Instant::now() + RENDEZVOUS_TIMEOUT;

    loop {
        if events_path.exists() {
            debug!("Agent channels ready under {}", dir.display());
            return Ok(());
        }
        if let Some(status) = child.try_wait()? {
            return Err(TetherError::Library(format!(
                "debuggee exited before the agent came up: {status}"
            )));
        }
        if Instant::now() >= deadline {
            return Err(TetherError::Library(format!(
                "timed out waiting for agent channels under {}",
                dir.display()
            )));
        }
        std::thread::sleep(RENDEZVOUS_POLL);
    }
}

/// Library error for a response payload the operation cannot produce.
pub(crate) fn unexpected_payload(op: &str, got: &Payload) -> TetherError
{
    TetherError::Library(format!("{op} answered with unexpected {} payload", got.name()))
}
