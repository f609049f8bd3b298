/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use chrono::{Local, SecondsFormat};
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

/* -------------------------------------------------------------------------- */
/*                                  Constant                                  */
/* -------------------------------------------------------------------------- */
const LOG_PATH: &str = "./log.txt";

/* -------------------------------------------------------------------------- */
/*                             Struct Declaration                             */
/* -------------------------------------------------------------------------- */
/// the append only log sink, one `[<ISO-8601>]: <message>` record per call
pub struct Logger {
    path: PathBuf,
    file: Mutex<File>,
}

pub type SharedLogger = Arc<Logger>;

/* -------------------------------------------------------------------------- */
/*                            Struct Implementation                           */
/* -------------------------------------------------------------------------- */
impl Logger {
    /// open the default log file, creating it if it doesn't exist,
    /// appending to it if it does
    pub fn new() -> Result<Self, io::Error> {
        Self::open(LOG_PATH)
    }

    /// same as `new` but at an explicit location
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Logger {
            path: path.as_ref().to_owned(),
            file: Mutex::new(file),
        })
    }

    /// append one record; logging failures are swallowed so a full disk
    /// cannot take the supervision loop down with it
    pub fn log(&self, message: &str) {
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
        let record = format!("[{timestamp}]: {message}\n");
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = file.write_all(record.as_bytes());
        let _ = file.flush();
    }

    /// dump the whole log file on stdout, used by the `log` command
    pub fn stream_to_stdout(&self) -> io::Result<()> {
        let mut file = File::open(&self.path)?;
        io::copy(&mut file, &mut io::stdout())?;
        Ok(())
    }
}

pub fn new_shared_logger() -> Result<SharedLogger, io::Error> {
    Ok(Arc::new(Logger::new()?))
}

/* -------------------------------------------------------------------------- */
/*                                    Macro                                   */
/* -------------------------------------------------------------------------- */
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log(&format!($($arg)*))
    }
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log(&format!("error: {}", format!($($arg)*)))
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Tests                                   */
/* -------------------------------------------------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::fs;

    #[test]
    fn records_carry_an_iso8601_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let logger = Logger::open(&path).expect("logger");

        log_info!(logger, "hello {}", "world");
        log_error!(logger, "boom");

        let contents = fs::read_to_string(&path).expect("log file");
        let mut lines = contents.lines();

        let first = lines.next().expect("first record");
        assert!(first.ends_with("]: hello world"));
        let timestamp = &first[1..first.find(']').expect("closing bracket")];
        DateTime::parse_from_rfc3339(timestamp).expect("rfc3339 timestamp");

        let second = lines.next().expect("second record");
        assert!(second.ends_with("]: error: boom"));
    }
}
