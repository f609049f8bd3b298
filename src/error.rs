/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use thiserror::Error;

/* -------------------------------------------------------------------------- */
/*                              Struct Definition                             */
/* -------------------------------------------------------------------------- */
/// everything that can be wrong with a configuration entry, raised while a
/// program is being constructed and handled per name by the registry
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("program {0} has no cmd attribute")]
    MissingCommand(String),

    #[error("invalid type for {field} in {program}: expected {expected}")]
    WrongType {
        program: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("{field} in {program} is out of range: {detail}")]
    OutOfRange {
        program: String,
        field: &'static str,
        detail: String,
    },

    /// an enum-valued key did not decode to one of the canonical names
    #[error("no {kind} value matches '{value}'")]
    UnknownEnum { kind: &'static str, value: String },

    #[error("uid {0} does not exist on this host")]
    UnknownUid(libc::uid_t),

    #[error("gid {0} does not exist on this host")]
    UnknownGid(libc::gid_t),

    #[error("can't parse configuration file ({path}): {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("can't read configuration file ({path}): {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// top level error of the binary, printed to stderr before exiting
#[derive(Debug, Error)]
pub enum TaskmasterError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
