//! # Process Configuration
//!
//! Options recognized when creating a debuggee process.
//!
//! The two knobs cover where the per-process channel directories live and
//! which runtime library gets injected into the debuggee. Everything else
//! about a spawn (executable, argv, environment) is passed directly to
//! [`create_process`](crate::create_process).

use std::path::{Path, PathBuf};

/// Default base directory for per-process channel directories.
pub const DEFAULT_ROOT_DIR: &str = "/tmp/tether";

/// Environment variable through which the controller hands the injected
/// agent its per-user channel base directory (`<root_dir>/<username>`).
/// The agent creates `<base>/<pid>/` and its three FIFOs underneath it.
pub const ROOT_DIR_ENV: &str = "TETHER_ROOT_DIR";

/// Default name of the runtime library injected into debuggees.
///
/// A bare file name is resolved by the dynamic linker's normal search path;
/// use [`ProcessConfig::with_rt_lib_path`] to pin an absolute path.
pub const DEFAULT_RT_LIB: &str = "libtether-rt.so";

/// Configuration for creating a debuggee process
///
/// ## Example
///
/// ```rust
/// use tether_core::ProcessConfig;
///
/// let config = ProcessConfig::new()
///     .with_root_dir("/tmp/tether-session")
///     .with_rt_lib_path("/opt/tether/lib/libtether-rt.so");
/// assert_eq!(config.root_dir.to_str(), Some("/tmp/tether-session"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig
{
    /// Base path under which the agent creates
    /// `<root_dir>/<username>/<pid>/` channel directories.
    pub root_dir: PathBuf,

    /// Location of the runtime agent library injected into the debuggee.
    pub rt_lib_path: PathBuf,
}

impl Default for ProcessConfig
{
    fn default() -> Self
    {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            rt_lib_path: PathBuf::from(DEFAULT_RT_LIB),
        }
    }
}

impl ProcessConfig
{
    /// Create a configuration with the default root directory and runtime
    /// library name.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Override the base directory for channel directories.
    #[must_use]
    pub fn with_root_dir(mut self, root_dir: impl AsRef<Path>) -> Self
    {
        self.root_dir = root_dir.as_ref().to_path_buf();
        self
    }

    /// Override the runtime library path injected into the debuggee.
    #[must_use]
    pub fn with_rt_lib_path(mut self, rt_lib_path: impl AsRef<Path>) -> Self
    {
        self.rt_lib_path = rt_lib_path.as_ref().to_path_buf();
        self
    }
}
