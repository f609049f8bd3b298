/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use std::io;
use std::sync::PoisonError;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::logger::SharedLogger;

use super::SharedRegistry;

/* -------------------------------------------------------------------------- */
/*                                  Constant                                  */
/* -------------------------------------------------------------------------- */
/// pause between two supervision passes, slept outside the lock
const MONITOR_PERIOD: Duration = Duration::from_millis(100);

/* -------------------------------------------------------------------------- */
/*                                  Function                                  */
/* -------------------------------------------------------------------------- */
/// spawn the background activity that periodically drives every program's
/// `check`; it shares the registry lock with the command handlers and never
/// touches the program map structure itself. Lock poisoning is recovered
/// from so a panicking handler cannot stop supervision.
pub fn spawn_monitor(
    registry: SharedRegistry,
    logger: SharedLogger,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("monitor".to_owned())
        .spawn(move || loop {
            {
                let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                for program in registry.programs_mut() {
                    program.check(&logger);
                }
            }
            thread::sleep(MONITOR_PERIOD);
        })
}

/* -------------------------------------------------------------------------- */
/*                                    Tests                                   */
/* -------------------------------------------------------------------------- */
