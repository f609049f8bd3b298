/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::ops::Deref;
use std::str::FromStr;
use std::{env, fs, path::Path};

use crate::error::ConfigError;

/* -------------------------------------------------------------------------- */
/*                                   Struct                                   */
/* -------------------------------------------------------------------------- */
/// one parsed program entry, kept verbatim so reloads can diff it against
/// future configurations
pub type Properties = HashMap<String, Value>;

/// the top level of the parsed configuration: program name -> raw properties
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ConfigFile(#[serde(default)] HashMap<String, Properties>);

/// validated launch parameters of one program group
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramConfig {
    /// the command to use to launch the program, interpreted through a shell
    pub command: String,

    /// the number of processes to start and keep running
    pub count: usize,

    /// whether to start this program at launch or not
    pub auto_start: bool,

    /// whether the program should be restarted always, never, or on
    /// unexpected exits only
    pub auto_restart: AutoRestart,

    /// which return codes represent an "expected" exit status
    pub exit_codes: Vec<i32>,

    /// how long the program should run after a start for it to be
    /// considered successfully started, in seconds
    pub start_time: u64,

    /// how many restarts should be attempted before aborting
    pub retries: u32,

    /// which signal should be used to stop the program gracefully
    pub stop_signal: StopSignal,

    /// how long to wait after a graceful stop before killing the program,
    /// in seconds
    pub stop_time: u64,

    pub working_dir: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub umask: libc::mode_t,
    pub uid: Option<libc::uid_t>,
    pub gid: Option<libc::gid_t>,

    /// the child environment, already expanded: the supervisor's own
    /// environment with the configured variables layered on top
    pub env: HashMap<String, String>,
}

/// whenever a program should be restarted once its termination is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoRestart {
    Never,

    /// restart only when the exit code is not part of the expected list
    #[default]
    Unexpected,

    Always,
}

/// the signals a program may be stopped with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopSignal {
    #[default]
    Term,
    Hup,
    Int,
    Quit,
    Kill,
    Usr1,
    Usr2,
}

/* -------------------------------------------------------------------------- */
/*                            Struct Implementation                           */
/* -------------------------------------------------------------------------- */
impl ConfigFile {
    /// load and union every given file; each yaml document contributes its
    /// top level mapping and later documents win on name collision
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut merged = HashMap::new();
        for path in paths {
            let display = path.as_ref().display().to_string();
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: display.clone(),
                source,
            })?;
            for document in serde_yaml::Deserializer::from_str(&contents) {
                let parsed = Option::<ConfigFile>::deserialize(document).map_err(|source| {
                    ConfigError::Parse {
                        path: display.clone(),
                        source,
                    }
                })?;
                merged.extend(parsed.unwrap_or_default().0);
            }
        }
        Ok(Self(merged))
    }

    pub fn into_inner(self) -> HashMap<String, Properties> {
        self.0
    }
}

impl ProgramConfig {
    /// build a validated config from one raw program entry, walking the
    /// recognised keys only; `_`-prefixed keys and null values are skipped
    /// so forward compatible configs keep loading
    pub fn from_properties(program: &str, properties: &Properties) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut overlay = HashMap::new();
        for (key, value) in properties {
            if key.starts_with('_') || value.is_null() {
                continue;
            }
            match key.as_str() {
                "cmd" => config.command = expect_str(program, "cmd", value)?.to_owned(),
                "count" => config.count = validate_count(program, value)?,
                "auto_start" => config.auto_start = expect_bool(program, "auto_start", value)?,
                "auto_restart" => {
                    config.auto_restart = expect_str(program, "auto_restart", value)?.parse()?
                }
                "exit_codes" => config.exit_codes = validate_exit_codes(program, value)?,
                "start_time" => config.start_time = expect_uint(program, "start_time", value)?,
                "retries" => {
                    config.retries =
                        expect_ranged(program, "retries", value, 0, u32::MAX as i64)? as u32
                }
                "stop_signal" => {
                    config.stop_signal = expect_str(program, "stop_signal", value)?.parse()?
                }
                "stop_time" => config.stop_time = expect_uint(program, "stop_time", value)?,
                "working_dir" => {
                    config.working_dir = Some(expect_str(program, "working_dir", value)?.to_owned())
                }
                "stdout" => config.stdout = Some(expect_str(program, "stdout", value)?.to_owned()),
                "stderr" => config.stderr = Some(expect_str(program, "stderr", value)?.to_owned()),
                "umask" => {
                    config.umask =
                        expect_ranged(program, "umask", value, 0, 0o777)? as libc::mode_t
                }
                "uid" => {
                    let uid = expect_ranged(program, "uid", value, 0, u32::MAX as i64)?;
                    config.uid = Some(resolve_uid(uid as libc::uid_t)?);
                }
                "gid" => {
                    let gid = expect_ranged(program, "gid", value, 0, u32::MAX as i64)?;
                    config.gid = Some(resolve_gid(gid as libc::gid_t)?);
                }
                "env" => overlay = validate_env(program, value)?,
                // unknown keys are tolerated so newer configs load on older builds
                _ => {}
            }
        }
        if config.command.is_empty() {
            return Err(ConfigError::MissingCommand(program.to_owned()));
        }
        config.env = expanded_env(&overlay);
        Ok(config)
    }
}

impl AutoRestart {
    const KIND: &'static str = "auto_restart";
}

impl StopSignal {
    const KIND: &'static str = "stop_signal";

    /// the raw signal number handed to kill(2)
    pub fn number(self) -> libc::c_int {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Hup => libc::SIGHUP,
            Self::Int => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Kill => libc::SIGKILL,
            Self::Usr1 => libc::SIGUSR1,
            Self::Usr2 => libc::SIGUSR2,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                              Schema Validators                             */
/* -------------------------------------------------------------------------- */
fn expect_str<'a>(
    program: &str,
    field: &'static str,
    value: &'a Value,
) -> Result<&'a str, ConfigError> {
    value.as_str().ok_or_else(|| ConfigError::WrongType {
        program: program.to_owned(),
        field,
        expected: "string",
    })
}

fn expect_bool(program: &str, field: &'static str, value: &Value) -> Result<bool, ConfigError> {
    value.as_bool().ok_or_else(|| ConfigError::WrongType {
        program: program.to_owned(),
        field,
        expected: "boolean",
    })
}

fn expect_uint(program: &str, field: &'static str, value: &Value) -> Result<u64, ConfigError> {
    value.as_u64().ok_or_else(|| ConfigError::WrongType {
        program: program.to_owned(),
        field,
        expected: "non-negative integer",
    })
}

fn expect_ranged(
    program: &str,
    field: &'static str,
    value: &Value,
    min: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    let number = value.as_i64().ok_or_else(|| ConfigError::WrongType {
        program: program.to_owned(),
        field,
        expected: "integer",
    })?;
    if number < min || number > max {
        return Err(ConfigError::OutOfRange {
            program: program.to_owned(),
            field,
            detail: format!("{number} not in {min}..={max}"),
        });
    }
    Ok(number)
}

/// the replica count, shared with `assign_count` on reload
pub(crate) fn validate_count(program: &str, value: &Value) -> Result<usize, ConfigError> {
    Ok(expect_ranged(program, "count", value, 1, 100)? as usize)
}

/// every configured code must be a real wait status byte
fn validate_exit_codes(program: &str, value: &Value) -> Result<Vec<i32>, ConfigError> {
    let entries = value.as_sequence().ok_or_else(|| ConfigError::WrongType {
        program: program.to_owned(),
        field: "exit_codes",
        expected: "list of integers",
    })?;
    let mut codes = Vec::with_capacity(entries.len());
    for entry in entries {
        let code = expect_ranged(program, "exit_codes", entry, 0, 255)?;
        codes.push(code as i32);
    }
    Ok(codes)
}

fn validate_env(program: &str, value: &Value) -> Result<HashMap<String, String>, ConfigError> {
    let mapping = value.as_mapping().ok_or_else(|| ConfigError::WrongType {
        program: program.to_owned(),
        field: "env",
        expected: "mapping",
    })?;
    let mut env = HashMap::with_capacity(mapping.len());
    for (key, entry) in mapping {
        let key = expect_str(program, "env", key)?;
        env.insert(key.to_owned(), stringify(program, entry)?);
    }
    Ok(env)
}

/// configured values of any scalar type end up as environment strings
fn stringify(program: &str, value: &Value) -> Result<String, ConfigError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        _ => Err(ConfigError::WrongType {
            program: program.to_owned(),
            field: "env",
            expected: "scalar values",
        }),
    }
}

fn expanded_env(overlay: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = env::vars().collect();
    env.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn resolve_uid(uid: libc::uid_t) -> Result<libc::uid_t, ConfigError> {
    let entry = unsafe { libc::getpwuid(uid) };
    if entry.is_null() {
        return Err(ConfigError::UnknownUid(uid));
    }
    Ok(uid)
}

fn resolve_gid(gid: libc::gid_t) -> Result<libc::gid_t, ConfigError> {
    let entry = unsafe { libc::getgrgid(gid) };
    if entry.is_null() {
        return Err(ConfigError::UnknownGid(gid));
    }
    Ok(gid)
}

/* -------------------------------------------------------------------------- */
/*                            Trait Implementation                            */
/* -------------------------------------------------------------------------- */
impl Deref for ConfigFile {
    type Target = HashMap<String, Properties>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            count: 1,
            auto_start: true,
            auto_restart: AutoRestart::default(),
            exit_codes: vec![0],
            start_time: 0,
            retries: 0,
            stop_signal: StopSignal::default(),
            stop_time: 0,
            working_dir: None,
            stdout: None,
            stderr: None,
            umask: 0o022,
            uid: None,
            gid: None,
            env: HashMap::new(),
        }
    }
}

impl FromStr for AutoRestart {
    type Err = ConfigError;

    /// case insensitive decode from the canonical configuration names
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_uppercase().as_str() {
            "NEVER" => Ok(Self::Never),
            "UNEXPECTED" => Ok(Self::Unexpected),
            "ALWAYS" => Ok(Self::Always),
            _ => Err(ConfigError::UnknownEnum {
                kind: Self::KIND,
                value: value.to_owned(),
            }),
        }
    }
}

impl FromStr for StopSignal {
    type Err = ConfigError;

    /// case insensitive decode from the canonical configuration names
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_uppercase().as_str() {
            "TERM" => Ok(Self::Term),
            "HUP" => Ok(Self::Hup),
            "INT" => Ok(Self::Int),
            "QUIT" => Ok(Self::Quit),
            "KILL" => Ok(Self::Kill),
            "USR1" => Ok(Self::Usr1),
            "USR2" => Ok(Self::Usr2),
            _ => Err(ConfigError::UnknownEnum {
                kind: Self::KIND,
                value: value.to_owned(),
            }),
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Tests                                   */
/* -------------------------------------------------------------------------- */
