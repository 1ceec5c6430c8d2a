//! # tether-stub
//!
//! Scripted stand-in for the injected runtime agent.
//!
//! The integration tests launch this binary as their debuggee. It behaves
//! like a real agent at the channel level: it creates the per-process FIFO
//! directory under [`ROOT_DIR_ENV`], performs the `Init` handshake, serves
//! control requests against an in-memory image, and emits scripted events
//! whenever the controller continues the process. Its argument vector
//! selects the script:
//!
//! - `serve` (or no arguments): answer requests until the controller goes
//!   away; continues produce no events
//! - `exit <code>`: first continue reports `PROCESS_EXIT` and the stub
//!   exits with `<code>`
//! - `breakpoint <addr>`: first continue reports `BREAKPOINT` at `<addr>`
//!   if a trap is installed there, otherwise the process runs to exit;
//!   the next continue exits
//! - `threads <count>`: first continue spawns `<count>` worker threads in
//!   one `THREAD_CREATE` burst, the next kills the youngest with
//!   `THREAD_DEATH`, the next exits
//! - `signal <sig> <addr>`: first continue reports `SIGNAL`, the next exits
//! - `step`: each continue reports `SINGLE_STEP` while single stepping is
//!   enabled for the initial thread, and exits otherwise
//! - `bad-version`: the handshake reports an unsupported protocol revision

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::process;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tether_core::{TetherError, TetherResult, ROOT_DIR_ENV};
use tether_protocol::{
    read_frame, write_frame, Architecture, ErrorCode, EventFrame, EventKind, InitPayload, Payload,
    Register, Request, Response, RunState, ThreadRunState, EVENTS_FIFO, PROTOCOL_VERSION,
    REQUEST_FIFO, RESPONSE_FIFO, TRAP_INSTRUCTION, TRAP_LEN,
};
use tether_utils::{debug, info, init_file_logging};

/// Architecture every stub debuggee claims to be.
const ARCH: Architecture = Architecture::X86_64;

/// Thread id of the stub's initial thread.
const INITIAL_TID: u64 = 0x1000;

/// First worker thread id handed out by the `threads` scenario.
const SPAWNED_TID_BASE: u64 = 0x2000;

/// Largest memory read the stub is willing to answer.
const MAX_READ_LEN: u32 = 0x0010_0000;

/// Byte the stub seeds at a scripted breakpoint address.
const SEED_INSTRUCTION: u8 = 0x55;

fn main()
{
    if let Err(err) = run() {
        eprintln!("tether-stub: {err}");
        process::exit(1);
    }
}

fn run() -> TetherResult<()>
{
    let args: Vec<String> = env::args().skip(1).collect();
    let scenario = Scenario::from_args(&args).map_err(TetherError::Library)?;

    let base = env::var(ROOT_DIR_ENV)
        .map_err(|_| TetherError::Library(format!("{ROOT_DIR_ENV} is not set")))?;
    let dir = PathBuf::from(base).join(process::id().to_string());
    fs::create_dir_all(&dir)?;

    if let Err(err) = init_file_logging(&dir, "tether-stub", None) {
        eprintln!("tether-stub: logging unavailable: {err}");
    }
    info!("Agent stub starting in {}", dir.display());

    let mode = Mode::S_IRUSR | Mode::S_IWUSR;
    for fifo in [REQUEST_FIFO, RESPONSE_FIFO, EVENTS_FIFO] {
        mkfifo(dir.join(fifo).as_path(), mode)
            .map_err(|err| TetherError::Library(format!("mkfifo {fifo} failed: {err}")))?;
    }

    // Mirror of the controller's open order: request read, Init, response
    // write, answer, events write. Any other order deadlocks on open.
    let mut request = File::open(dir.join(REQUEST_FIFO))?;
    match read_frame::<_, Request>(&mut request)? {
        Some(Request::Init) => {}
        Some(other) => {
            return Err(TetherError::Library(format!(
                "expected Init, got {} request",
                other.name()
            )));
        }
        None => {
            return Err(TetherError::Library(
                "controller closed the request channel before Init".to_owned(),
            ));
        }
    }

    let mut response = OpenOptions::new().write(true).open(dir.join(RESPONSE_FIFO))?;
    let version = if matches!(scenario, Scenario::BadVersion) {
        PROTOCOL_VERSION + 1
    } else {
        PROTOCOL_VERSION
    };
    let init = InitPayload {
        version,
        arch: ARCH,
        multithread: matches!(scenario, Scenario::Threads { .. }),
        initial_tid: INITIAL_TID,
    };
    write_frame(&mut response, &Response::Valid(Payload::Init(init)))?;
    info!("Handshake complete (version {version})");

    if matches!(scenario, Scenario::BadVersion) {
        // The controller abandons the connect before opening the event
        // FIFO; opening it here would block on a reader that never comes.
        return Ok(());
    }
    let mut events = OpenOptions::new().write(true).open(dir.join(EVENTS_FIFO))?;

    let mut agent = Agent::new(scenario);
    loop {
        let Some(req) = read_frame::<_, Request>(&mut request)? else {
            info!("Controller closed the request channel; shutting down");
            return Ok(());
        };
        debug!("Serving {} request", req.name());

        let resp = agent.handle(&req);
        write_frame(&mut response, &resp)?;

        if matches!(req, Request::Continue { .. }) && matches!(resp, Response::Valid(_)) {
            match agent.on_continue(&mut events)? {
                Flow::KeepServing => {}
                Flow::Shutdown(code) => {
                    info!("Scenario complete; exiting with code {code}");
                    process::exit(code);
                }
            }
        }
    }
}

/// What the scripted debuggee should act out.
enum Scenario
{
    Serve,
    Exit
    {
        code: i32,
    },
    Breakpoint
    {
        addr: u64,
    },
    Threads
    {
        count: u64,
    },
    Signal
    {
        sig: u32,
        addr: u64,
    },
    Step,
    BadVersion,
}

impl Scenario
{
    fn from_args(args: &[String]) -> Result<Self, String>
    {
        match args.first().map(String::as_str) {
            None | Some("serve") => Ok(Self::Serve),
            Some("exit") => {
                let code = parse_num(args.get(1), "exit code")?;
                let code = i32::try_from(code).map_err(|_| "exit code out of range".to_owned())?;
                Ok(Self::Exit { code })
            }
            Some("breakpoint") => Ok(Self::Breakpoint {
                addr: parse_num(args.get(1), "breakpoint address")?,
            }),
            Some("threads") => {
                let count = parse_num(args.get(1), "thread count")?;
                if count == 0 {
                    return Err("thread count must be at least 1".to_owned());
                }
                Ok(Self::Threads { count })
            }
            Some("signal") => {
                let sig = parse_num(args.get(1), "signal number")?;
                let sig = u32::try_from(sig).map_err(|_| "signal number out of range".to_owned())?;
                Ok(Self::Signal {
                    sig,
                    addr: parse_num(args.get(2), "signal address")?,
                })
            }
            Some("step") => Ok(Self::Step),
            Some("bad-version") => Ok(Self::BadVersion),
            Some(other) => Err(format!("unknown scenario: {other}")),
        }
    }
}

fn parse_num(arg: Option<&String>, what: &str) -> Result<u64, String>
{
    let arg = arg.ok_or_else(|| format!("missing {what}"))?;
    let parsed = match arg.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => arg.parse(),
    };
    parsed.map_err(|_| format!("invalid {what}: {arg}"))
}

enum Flow
{
    KeepServing,
    Shutdown(i32),
}

struct StubThread
{
    tid: u64,
    state: RunState,
    single_step: bool,
}

impl StubThread
{
    fn new(tid: u64) -> Self
    {
        Self {
            tid,
            state: RunState::Running,
            single_step: false,
        }
    }
}

/// Agent-side state: the scripted scenario plus a fake process image.
struct Agent
{
    scenario: Scenario,
    stage: u32,
    threads: Vec<StubThread>,
    memory: BTreeMap<u64, u8>,
    registers: HashMap<(u64, Register), u64>,
    traps: HashMap<u64, Vec<u8>>,
}

impl Agent
{
    fn new(scenario: Scenario) -> Self
    {
        let mut memory = BTreeMap::new();
        if let Scenario::Breakpoint { addr } = &scenario {
            memory.insert(*addr, SEED_INSTRUCTION);
        }
        Self {
            scenario,
            stage: 0,
            threads: vec![StubThread::new(INITIAL_TID)],
            memory,
            registers: HashMap::new(),
            traps: HashMap::new(),
        }
    }

    fn handle(&mut self, request: &Request) -> Response
    {
        match request {
            Request::Init => err_request("Init is only valid as the first request"),
            Request::Continue { .. } => Response::Valid(Payload::Empty),
            Request::ReadMemory { addr, len } => self.read_memory(*addr, *len),
            Request::WriteMemory { addr, data } => self.write_memory(*addr, data),
            Request::ReadRegister { tid, reg } => self.read_register(*tid, *reg),
            Request::WriteRegister { tid, reg, value } => self.write_register(*tid, *reg, *value),
            Request::State => Response::Valid(Payload::States {
                threads: self
                    .threads
                    .iter()
                    .map(|thread| ThreadRunState { tid: thread.tid, state: thread.state })
                    .collect(),
            }),
            Request::InstallBreakpoint { addr } => self.install_trap(*addr),
            Request::RemoveBreakpoint { addr, original } => self.remove_trap(*addr, original),
            Request::ThreadSuspend { tid } => self.suspend_thread(*tid),
            Request::ThreadResume { tid } => self.resume_thread(*tid),
            Request::SingleStep { tid, enable } => self.set_single_step(*tid, *enable),
        }
    }

    /// Scripted events after a successful continue.
    fn on_continue(&mut self, events: &mut File) -> TetherResult<Flow>
    {
        self.stage += 1;
        match self.scenario {
            Scenario::Serve | Scenario::BadVersion => Ok(Flow::KeepServing),
            Scenario::Exit { code } => {
                self.emit(events, INITIAL_TID, EventKind::ProcessExit { code })?;
                Ok(Flow::Shutdown(code))
            }
            Scenario::Breakpoint { addr } => {
                if self.stage == 1 && self.traps.contains_key(&addr) {
                    // Stopped just past the trap, exactly as hardware would
                    // leave the program counter.
                    self.registers.insert((INITIAL_TID, Register::pc(ARCH)), addr + TRAP_LEN);
                    self.emit(events, INITIAL_TID, EventKind::Breakpoint { addr })?;
                    Ok(Flow::KeepServing)
                } else {
                    self.emit(events, INITIAL_TID, EventKind::ProcessExit { code: 0 })?;
                    Ok(Flow::Shutdown(0))
                }
            }
            Scenario::Threads { count } => match self.stage {
                1 => {
                    for tid in (0..count).map(|n| SPAWNED_TID_BASE + n) {
                        self.threads.push(StubThread::new(tid));
                        self.emit(events, INITIAL_TID, EventKind::ThreadCreate { tid })?;
                    }
                    Ok(Flow::KeepServing)
                }
                2 => {
                    let doomed = SPAWNED_TID_BASE + count - 1;
                    self.threads.retain(|thread| thread.tid != doomed);
                    self.emit(events, doomed, EventKind::ThreadDeath)?;
                    Ok(Flow::KeepServing)
                }
                _ => {
                    self.emit(events, INITIAL_TID, EventKind::ProcessExit { code: 0 })?;
                    Ok(Flow::Shutdown(0))
                }
            },
            Scenario::Signal { sig, addr } => {
                if self.stage == 1 {
                    self.emit(events, INITIAL_TID, EventKind::Signal { addr, sig })?;
                    Ok(Flow::KeepServing)
                } else {
                    self.emit(events, INITIAL_TID, EventKind::ProcessExit { code: 0 })?;
                    Ok(Flow::Shutdown(0))
                }
            }
            Scenario::Step => {
                let stepping = self
                    .threads
                    .iter()
                    .any(|thread| thread.tid == INITIAL_TID && thread.single_step);
                if stepping {
                    let pc = self.registers.entry((INITIAL_TID, Register::pc(ARCH))).or_insert(0);
                    *pc += TRAP_LEN;
                    self.emit(events, INITIAL_TID, EventKind::SingleStep)?;
                    Ok(Flow::KeepServing)
                } else {
                    self.emit(events, INITIAL_TID, EventKind::ProcessExit { code: 0 })?;
                    Ok(Flow::Shutdown(0))
                }
            }
        }
    }

    fn emit(&self, events: &mut File, tid: u64, event: EventKind) -> TetherResult<()>
    {
        info!("Emitting {} for thread 0x{tid:x}", event.kind_name());
        write_frame(events, &EventFrame { tid, event })?;
        Ok(())
    }

    fn read_memory(&self, addr: u64, len: u32) -> Response
    {
        if len > MAX_READ_LEN {
            return err_request(format!("read of {len} bytes exceeds the {MAX_READ_LEN} byte limit"));
        }
        let Some(end) = addr.checked_add(u64::from(len)) else {
            return err_request(format!("memory range at 0x{addr:x} overflows the address space"));
        };
        let data = (addr..end).map(|a| self.memory.get(&a).copied().unwrap_or(0)).collect();
        Response::Valid(Payload::Memory { data })
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Response
    {
        if addr.checked_add(data.len() as u64).is_none() {
            return err_request(format!("memory range at 0x{addr:x} overflows the address space"));
        }
        for (offset, byte) in data.iter().enumerate() {
            self.memory.insert(addr + offset as u64, *byte);
        }
        Response::Valid(Payload::Empty)
    }

    fn read_register(&self, tid: u64, reg: Register) -> Response
    {
        if !self.knows_thread(tid) {
            return err_request(format!("unknown thread 0x{tid:x}"));
        }
        let value = self.registers.get(&(tid, reg)).copied().unwrap_or(0);
        Response::Valid(Payload::Register { value })
    }

    fn write_register(&mut self, tid: u64, reg: Register, value: u64) -> Response
    {
        if !self.knows_thread(tid) {
            return err_request(format!("unknown thread 0x{tid:x}"));
        }
        self.registers.insert((tid, reg), value);
        Response::Valid(Payload::Empty)
    }

    fn install_trap(&mut self, addr: u64) -> Response
    {
        if self.traps.contains_key(&addr) {
            return err_request(format!("a trap is already installed at 0x{addr:x}"));
        }
        let original: Vec<u8> = (0..TRAP_LEN)
            .map(|offset| self.memory.get(&(addr + offset)).copied().unwrap_or(0))
            .collect();
        for offset in 0..TRAP_LEN {
            self.memory.insert(addr + offset, TRAP_INSTRUCTION);
        }
        self.traps.insert(addr, original.clone());
        Response::Valid(Payload::Installed { original })
    }

    fn remove_trap(&mut self, addr: u64, original: &[u8]) -> Response
    {
        match self.traps.get(&addr) {
            None => err_request(format!("no trap installed at 0x{addr:x}")),
            Some(saved) if saved != original => {
                err_request(format!("original bytes do not match the trap at 0x{addr:x}"))
            }
            Some(_) => {
                for (offset, byte) in original.iter().enumerate() {
                    self.memory.insert(addr + offset as u64, *byte);
                }
                self.traps.remove(&addr);
                Response::Valid(Payload::Empty)
            }
        }
    }

    fn suspend_thread(&mut self, tid: u64) -> Response
    {
        let running_others = self
            .threads
            .iter()
            .filter(|thread| thread.tid != tid && thread.state == RunState::Running)
            .count();
        match self.threads.iter_mut().find(|thread| thread.tid == tid) {
            None => err_request(format!("unknown thread 0x{tid:x}")),
            Some(thread) => {
                if thread.state == RunState::Running && running_others == 0 {
                    return err_request("cannot suspend the last running thread");
                }
                thread.state = RunState::Suspended;
                Response::Valid(Payload::Empty)
            }
        }
    }

    fn resume_thread(&mut self, tid: u64) -> Response
    {
        match self.threads.iter_mut().find(|thread| thread.tid == tid) {
            None => err_request(format!("unknown thread 0x{tid:x}")),
            Some(thread) => {
                thread.state = RunState::Running;
                Response::Valid(Payload::Empty)
            }
        }
    }

    fn set_single_step(&mut self, tid: u64, enable: bool) -> Response
    {
        match self.threads.iter_mut().find(|thread| thread.tid == tid) {
            None => err_request(format!("unknown thread 0x{tid:x}")),
            Some(thread) => {
                let prior = thread.single_step;
                thread.single_step = enable;
                Response::Valid(Payload::StepSetting { prior })
            }
        }
    }

    fn knows_thread(&self, tid: u64) -> bool
    {
        self.threads.iter().any(|thread| thread.tid == tid)
    }
}

fn err_request(msg: impl Into<String>) -> Response
{
    Response::Error {
        code: ErrorCode::Request,
        msg: msg.into(),
    }
}
