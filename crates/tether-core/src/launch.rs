//! # Process Creation
//!
//! Spawning a debuggee with the runtime agent injected.
//!
//! The controller never traces anything: it spawns the executable with the
//! platform's library-preload mechanism pointed at the runtime agent, then
//! waits for the agent to bring up the channel directory and performs the
//! `Init` handshake over it. From that point on the debuggee is just the
//! other end of two FIFOs.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs};

use nix::unistd::{getuid, User};
use tracing::{debug, info};

use crate::config::{ProcessConfig, ROOT_DIR_ENV};
use crate::error::{TetherError, TetherResult};
use crate::process::Process;
use crate::transport::{self, Transport};

#[cfg(target_os = "macos")]
const PRELOAD_ENV: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
const PRELOAD_ENV: &str = "LD_PRELOAD";

/// Spawn `executable` as a debuggee and connect to its injected agent.
///
/// `argv` is passed through as the argument vector (the executable name is
/// not repeated). When `envp` is `Some`, the debuggee starts from exactly
/// those variables; when `None` it inherits the controller's environment.
/// Either way the preload variable and [`ROOT_DIR_ENV`] are layered on top
/// so the agent is loaded and knows where to put its channels.
///
/// The call returns once the agent has reported its `Init` payload; the
/// debuggee is then held at its entry point, not running, until the first
/// [`Process::continue_process`].
///
/// ## Errors
///
/// Fails with a request error if `executable` is not an existing file; with
/// a library error if the debuggee dies before rendezvous, the rendezvous
/// times out, or the agent speaks an unsupported protocol revision; with an
/// IO error if spawning or channel-directory creation fails.
pub fn create_process(
    executable: impl AsRef<Path>,
    argv: &[String],
    envp: Option<&[(String, String)]>,
    config: &ProcessConfig,
) -> TetherResult<Process>
{
    let executable = executable.as_ref();
    if !executable.is_file() {
        return Err(TetherError::Request(format!(
            "executable {} does not exist",
            executable.display()
        )));
    }

    let user_dir = prepare_channel_base(config)?;

    info!("Launching process: {}", executable.display());
    debug!("Argument vector: {:?}", argv);

    let mut command = Command::new(executable);
    command.args(argv);
    if let Some(envp) = envp {
        command.env_clear();
        command.envs(envp.iter().map(|(key, value)| (key, value)));
    }
    command.env(PRELOAD_ENV, preload_value(envp, &config.rt_lib_path));
    #[cfg(target_os = "macos")]
    command.env("DYLD_FORCE_FLAT_NAMESPACE", "1");
    command.env(ROOT_DIR_ENV, &user_dir);

    let mut child = command.spawn()?;
    let pid = child.id();

    let channel_dir = user_dir.join(pid.to_string());
    transport::await_rendezvous(&channel_dir, &mut child)?;

    let (transport, init) = Transport::connect(&channel_dir)?;
    info!(
        "Launched process {} ({}, initial thread 0x{:x})",
        pid, init.arch, init.initial_tid
    );

    // The child handle is dropped here; termination is observed through the
    // event channel, not waitpid.
    Ok(Process::register(pid, &init, transport))
}

/// Create `<root_dir>/<username>/` and return it.
///
/// Both levels survive across sessions, so existing directories are fine.
fn prepare_channel_base(config: &ProcessConfig) -> TetherResult<PathBuf>
{
    fs::create_dir_all(&config.root_dir)?;
    let user_dir = config.root_dir.join(current_username()?);
    fs::create_dir_all(&user_dir)?;
    Ok(user_dir)
}

fn current_username() -> TetherResult<String>
{
    let uid = getuid();
    let user = User::from_uid(uid)
        .map_err(|err| TetherError::Library(format!("could not resolve user for uid {uid}: {err}")))?
        .ok_or_else(|| TetherError::Library(format!("no user database entry for uid {uid}")))?;
    Ok(user.name)
}

/// Preload value for the debuggee: the runtime library, appended to any
/// preload chain the debuggee environment already carries.
fn preload_value(envp: Option<&[(String, String)]>, rt_lib: &Path) -> String
{
    let existing = match envp {
        Some(pairs) => pairs
            .iter()
            .find(|(key, _)| key.as_str() == PRELOAD_ENV)
            .map(|(_, value)| value.clone()),
        None => env::var(PRELOAD_ENV).ok(),
    };

    let rt_lib = rt_lib.display().to_string();
    match existing {
        Some(existing) if !existing.is_empty() => format!("{existing}:{rt_lib}"),
        _ => rt_lib,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn preload_starts_a_chain_when_none_exists()
    {
        let value = preload_value(Some(&[]), Path::new("/opt/tether/libtether-rt.so"));
        assert_eq!(value, "/opt/tether/libtether-rt.so");
    }

    #[test]
    fn preload_appends_to_an_existing_chain()
    {
        let envp = vec![(PRELOAD_ENV.to_owned(), "/usr/lib/libother.so".to_owned())];
        let value = preload_value(Some(&envp), Path::new("libtether-rt.so"));
        assert_eq!(value, "/usr/lib/libother.so:libtether-rt.so");
    }

    #[test]
    fn missing_executable_is_a_request_error()
    {
        let config = ProcessConfig::new();
        let result = create_process("/nonexistent/definitely-not-here", &[], None, &config);
        match result {
            Err(TetherError::Request(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected a request error, got {other:?}"),
        }
    }
}
