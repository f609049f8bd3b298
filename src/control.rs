/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use signal_hook::consts::{SIGHUP, SIGINT};
use signal_hook::iterator::Signals;
use std::collections::HashSet;
use std::io;
use std::sync::PoisonError;
use std::thread::{self, JoinHandle};

use crate::log_info;
use crate::logger::{Logger, SharedLogger};
use crate::supervisor::{Program, Registry, SharedRegistry};

/* -------------------------------------------------------------------------- */
/*                                  Constants                                 */
/* -------------------------------------------------------------------------- */
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/* -------------------------------------------------------------------------- */
/*                                   Struct                                   */
/* -------------------------------------------------------------------------- */
/// the typed command surface the interactive front end drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(Vec<String>),
    Stop(Vec<String>),
    Restart(Vec<String>),
    Status(Vec<String>),
    FullStatus(Vec<String>),
    /// arguments are kept so the arity error can be reported
    FullRestart(Vec<String>),
    Reload,
    Log,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

/* -------------------------------------------------------------------------- */
/*                            Struct Implementation                           */
/* -------------------------------------------------------------------------- */
impl Command {
    /// tokenize a command line on whitespace; the first token selects the
    /// command, the rest are program names
    pub fn parse(line: &str) -> Self {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return Self::Empty;
        };
        let arguments: Vec<String> = tokens.map(str::to_owned).collect();
        match command {
            "start" => Self::Start(arguments),
            "stop" => Self::Stop(arguments),
            "restart" => Self::Restart(arguments),
            "status" => Self::Status(arguments),
            "full_status" => Self::FullStatus(arguments),
            "full_restart" => Self::FullRestart(arguments),
            "reload" => Self::Reload,
            "log" => Self::Log,
            "help" => Self::Help,
            "exit" => Self::Exit,
            _ => Self::Unknown(command.to_owned()),
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Dispatch                                  */
/* -------------------------------------------------------------------------- */
/// run one command against the registry, serialising against the monitor
/// through the shared lock; returns true when the control loop should end
pub fn dispatch(command: Command, registry: &SharedRegistry, logger: &SharedLogger) -> bool {
    match &command {
        Command::Empty => return false,
        Command::Exit => return true,
        Command::Help => {
            print_help();
            return false;
        }
        Command::Unknown(name) => {
            println!("unknown command: {name} (try `help`)");
            return false;
        }
        _ => {}
    }
    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    match command {
        Command::Start(names) => {
            let missing = apply_named(&mut registry, &names, logger, |program, logger| {
                log_info!(logger, "start {}", program.name());
                program.execute(logger);
            });
            report_missing(missing);
        }
        Command::Stop(names) => {
            let missing = apply_named(&mut registry, &names, logger, |program, logger| {
                program.kill(logger);
                log_info!(logger, "stop {}", program.name());
            });
            report_missing(missing);
        }
        Command::Restart(names) => {
            if names.is_empty() {
                return false;
            }
            let missing = apply_named(&mut registry, &names, logger, |program, logger| {
                program.restart(logger);
            });
            report_missing(missing);
        }
        Command::Status(names) => {
            if names.is_empty() {
                println!("{}", registry.status());
            } else {
                let missing = apply_named(&mut registry, &names, logger, |program, _| {
                    println!("{}", program.status());
                });
                report_missing(missing);
            }
        }
        Command::FullStatus(names) => {
            if names.is_empty() {
                println!("{}", registry.full_status(logger));
            } else {
                let missing = apply_named(&mut registry, &names, logger, |program, logger| {
                    println!("{}", program.full_status(logger));
                });
                report_missing(missing);
            }
        }
        Command::FullRestart(arguments) => {
            if !arguments.is_empty() {
                println!("{YELLOW}Warning:{RESET} full_restart doesn't take any arguments");
            } else {
                for program in registry.programs_mut() {
                    program.kill(logger);
                    program.execute(logger);
                }
            }
        }
        Command::Reload => registry.reload(logger),
        Command::Log => {
            if let Err(error) = logger.stream_to_stdout() {
                println!("{YELLOW}Warning:{RESET} log file not available ({error})");
            }
        }
        Command::Empty | Command::Exit | Command::Help | Command::Unknown(_) => {}
    }
    false
}

/// apply an action to every named program once, collecting the unknown
/// names for reporting; duplicates are only acted upon the first time
fn apply_named(
    registry: &mut Registry,
    names: &[String],
    logger: &Logger,
    mut action: impl FnMut(&mut Program, &Logger),
) -> Vec<String> {
    let mut missing = Vec::new();
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            continue;
        }
        match registry.get_mut(name) {
            Some(program) => action(program, logger),
            None => missing.push(name.clone()),
        }
    }
    missing
}

fn report_missing(missing: Vec<String>) {
    if !missing.is_empty() {
        println!("{YELLOW}programs not found: {}{RESET}", missing.join(" "));
    }
}

fn print_help() {
    println!(
        "Taskmaster Commands:

    status [PROGRAM...]        One summary line per program
    full_status [PROGRAM...]   Summary plus one line per launched process
    start PROGRAM...           Start the named programs
    stop PROGRAM...            Stop the named programs
    restart PROGRAM...         Restart the named programs
    full_restart               Stop then start every program
    reload                     Re-read the configuration files
    log                        Print the log file
    help                       Show this help message
    exit                       Stop every program and leave"
    );
}

/* -------------------------------------------------------------------------- */
/*                               Signal Handling                              */
/* -------------------------------------------------------------------------- */
/// SIGINT stops the supervisor cleanly after stopping its children, SIGHUP
/// triggers a configuration reload
pub fn spawn_signal_handler(
    registry: SharedRegistry,
    logger: SharedLogger,
) -> io::Result<JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGHUP])?;
    thread::Builder::new()
        .name("signals".to_owned())
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGINT => {
                        log_info!(logger, "stopping taskmaster");
                        let mut registry =
                            registry.lock().unwrap_or_else(PoisonError::into_inner);
                        registry.kill_all(&logger);
                        std::process::exit(0);
                    }
                    SIGHUP => {
                        let mut registry =
                            registry.lock().unwrap_or_else(PoisonError::into_inner);
                        registry.reload(&logger);
                    }
                    _ => {}
                }
            }
        })
}

/* -------------------------------------------------------------------------- */
/*                                    Tests                                   */
/* -------------------------------------------------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use crate::supervisor::new_shared_registry;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn shared_fixture(config: &str) -> (TempDir, SharedRegistry, SharedLogger) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, config).expect("config file");
        let logger = Arc::new(Logger::open(dir.path().join("log.txt")).expect("logger"));
        let mut registry = Registry::new(vec![path]);
        registry.load(&logger).expect("load");
        (dir, new_shared_registry(registry), logger)
    }

    #[test]
    fn lines_tokenize_into_typed_commands() {
        assert_eq!(
            Command::parse("start alpha beta"),
            Command::Start(vec!["alpha".to_owned(), "beta".to_owned()])
        );
        assert_eq!(Command::parse("  status  "), Command::Status(vec![]));
        assert_eq!(Command::parse("full_restart"), Command::FullRestart(vec![]));
        assert_eq!(Command::parse("reload"), Command::Reload);
        assert_eq!(Command::parse("exit"), Command::Exit);
        assert_eq!(Command::parse("\n"), Command::Empty);
        assert_eq!(
            Command::parse("bogus thing"),
            Command::Unknown("bogus".to_owned())
        );
    }

    #[test]
    fn exit_terminates_the_control_loop() {
        let (_dir, registry, logger) = shared_fixture("worker:\n  cmd: exit 0\n  auto_start: false\n");
        assert!(dispatch(Command::Exit, &registry, &logger));
        assert!(!dispatch(Command::Empty, &registry, &logger));
    }

    #[test]
    fn unknown_names_are_collected_once() {
        let (_dir, registry, logger) = shared_fixture("worker:\n  cmd: exit 0\n  auto_start: false\n");
        let mut guard = registry.lock().expect("registry lock");
        let names = vec![
            "worker".to_owned(),
            "nosuch".to_owned(),
            "nosuch".to_owned(),
            "worker".to_owned(),
        ];
        let mut touched = 0;
        let missing = apply_named(&mut guard, &names, &logger, |_, _| touched += 1);
        assert_eq!(touched, 1);
        assert_eq!(missing, vec!["nosuch".to_owned()]);
    }

    #[test]
    fn starting_an_unknown_program_changes_nothing() {
        let (_dir, registry, logger) = shared_fixture("worker:\n  cmd: sleep 60\n  auto_start: false\n");
        assert!(!dispatch(
            Command::Start(vec!["nosuch".to_owned()]),
            &registry,
            &logger
        ));
        let mut guard = registry.lock().expect("registry lock");
        assert_eq!(guard.len(), 1);
        let status = guard.status();
        assert!(status.contains("launched: 0"));
    }

    #[test]
    fn restart_with_no_arguments_is_a_noop() {
        let (_dir, registry, logger) = shared_fixture("worker:\n  cmd: sleep 60\n  auto_start: false\n");
        assert!(!dispatch(Command::Restart(vec![]), &registry, &logger));
        let mut guard = registry.lock().expect("registry lock");
        assert!(guard.status().contains("launched: 0"));
    }

    #[test]
    fn start_and_stop_drive_the_named_program() {
        let (_dir, registry, logger) =
            shared_fixture("worker:\n  cmd: sleep 60\n  auto_start: false\n  stop_time: 5\n");

        dispatch(Command::Start(vec!["worker".to_owned()]), &registry, &logger);
        {
            let mut guard = registry.lock().expect("registry lock");
            assert!(guard.status().contains("running: 1"));
        }

        dispatch(Command::Stop(vec!["worker".to_owned()]), &registry, &logger);
        {
            let mut guard = registry.lock().expect("registry lock");
            assert!(guard.status().contains("running: 0"));
            assert!(guard.status().contains("stopped: 1"));
        }
    }
}
