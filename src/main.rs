/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::PoisonError;

use taskmaster::control::{dispatch, spawn_signal_handler, Command};
use taskmaster::error::TaskmasterError;
use taskmaster::log_info;
use taskmaster::logger::{new_shared_logger, SharedLogger};
use taskmaster::supervisor::{new_shared_registry, spawn_monitor, Registry, SharedRegistry};

/* -------------------------------------------------------------------------- */
/*                                  Constants                                 */
/* -------------------------------------------------------------------------- */
const PROMPT: &str = "\x1b[1;32mtaskmaster> \x1b[0m";

/* -------------------------------------------------------------------------- */
/*                                    Main                                    */
/* -------------------------------------------------------------------------- */
fn main() {
    let config_paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if config_paths.is_empty() {
        println!("Usage: taskmaster <config.yaml>...");
        return;
    }
    if let Err(error) = run(config_paths) {
        // a top level failure is reported on stderr, the exit stays clean
        eprintln!("\x1b[31mError:\x1b[0m {error}");
    }
}

fn run(config_paths: Vec<PathBuf>) -> Result<(), TaskmasterError> {
    let logger = new_shared_logger()?;
    log_info!(logger, "starting taskmaster");

    let mut registry = Registry::new(config_paths);
    registry.load(&logger)?;
    registry.launch(&logger);

    let registry = new_shared_registry(registry);
    let _monitor_handle = spawn_monitor(registry.clone(), logger.clone())?;
    let _signal_handle = spawn_signal_handler(registry.clone(), logger.clone())?;

    control_loop(&registry, &logger)?;

    // stop everything we supervise before leaving
    let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
    guard.kill_all(&logger);
    log_info!(logger, "stopping taskmaster");
    Ok(())
}

/// the interactive front end: a plain blocking line reader feeding the
/// typed command surface; end of input behaves like `exit`
fn control_loop(registry: &SharedRegistry, logger: &SharedLogger) -> io::Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("{PROMPT}");
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            return Ok(());
        }
        if dispatch(Command::parse(&line), registry, logger) {
            return Ok(());
        }
    }
}
