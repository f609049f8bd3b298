/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::{ProgramConfig, Properties};

/* -------------------------------------------------------------------------- */
/*                                   Module                                   */
/* -------------------------------------------------------------------------- */
mod child;
mod monitor;
mod program;
mod registry;

pub use monitor::spawn_monitor;
pub use registry::new_shared_registry;

/* -------------------------------------------------------------------------- */
/*                                   Struct                                   */
/* -------------------------------------------------------------------------- */
/// one OS process instance managed by the supervisor
#[derive(Debug)]
pub struct Child {
    /// the owning program's name, used in log records only
    name: String,

    /// the shell command line given in the configuration
    command: String,

    /// launch parameters captured from the program config before each spawn
    attrs: SpawnAttrs,

    /// the OS handle, absent before the first spawn and after a failed one
    handle: Option<std::process::Child>,

    /// whether this child has ever been spawned successfully
    launched: bool,

    /// monotonic spawn timestamp
    start_ts: Option<Instant>,

    /// monotonic timestamp of the first observation of the exit (or of the
    /// stop signal), cleared on every new spawn
    end_ts: Option<Instant>,

    /// start attempts since the last user initiated stop or reload
    retries: u32,

    /// set when a user (or a program level stop) asked for termination,
    /// cleared on the next spawn
    killed_by_user: bool,
}

/// everything the OS needs to know about a launch besides the command line
#[derive(Debug, Default, Clone)]
pub struct SpawnAttrs {
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub umask: libc::mode_t,
    pub uid: Option<libc::uid_t>,
    pub gid: Option<libc::gid_t>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// a named group of identically configured children
#[derive(Debug)]
pub struct Program {
    name: String,

    /// the validated launch parameters
    config: ProgramConfig,

    /// the parsed mapping kept verbatim for reload diffs
    properties: Properties,

    /// always `config.count` long at quiescent points
    children: Vec<Child>,
}

/// the full set of supervised programs, keyed by name
#[derive(Debug)]
pub struct Registry {
    programs: HashMap<String, Program>,

    /// the configuration files given on the command line, re-read on reload
    config_paths: Vec<PathBuf>,
}

/// the single coarse lock shared by the monitor, the signal thread and every
/// command handler; nothing observes a program in the middle of a handler
pub type SharedRegistry = Arc<Mutex<Registry>>;
