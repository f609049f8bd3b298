/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::{ConfigFile, Properties};
use crate::error::ConfigError;
use crate::logger::Logger;
use crate::{log_error, log_info};

use super::{Program, Registry, SharedRegistry};

/* -------------------------------------------------------------------------- */
/*                            Struct Implementation                           */
/* -------------------------------------------------------------------------- */
impl Registry {
    pub fn new(config_paths: Vec<PathBuf>) -> Self {
        Self {
            programs: HashMap::new(),
            config_paths,
        }
    }

    /// populate the registry from the configuration files; a program whose
    /// entry does not validate is logged and skipped, the batch continues
    pub fn load(&mut self, logger: &Logger) -> Result<(), ConfigError> {
        let config = ConfigFile::load(&self.config_paths)?;
        if config.is_empty() {
            eprintln!("\x1b[31mError:\x1b[0m empty config");
            std::process::exit(0);
        }
        for (name, properties) in config.into_inner() {
            match Program::new(&name, properties) {
                Ok(program) => {
                    self.programs.insert(name, program);
                }
                Err(error) => log_error!(logger, "can't create program [{name}]: {error}"),
            }
        }
        Ok(())
    }

    /// re-read the configuration and reconcile: programs gone from the new
    /// config are stopped and dropped, a substantive change replaces the
    /// program wholesale, a bare count change grows or shrinks in place and
    /// new names are created; every failure is a per-name warning
    pub fn reload(&mut self, logger: &Logger) {
        log_info!(logger, "reloading configuration");
        let mut config = match ConfigFile::load(&self.config_paths) {
            Ok(config) => config.into_inner(),
            Err(error) => {
                log_error!(logger, "reload failed: {error}");
                println!("\x1b[33mWarning:\x1b[0m error reloading ({error})");
                return;
            }
        };
        let names: Vec<String> = self.programs.keys().cloned().collect();
        for name in names {
            match config.remove(&name) {
                None => {
                    if let Some(mut program) = self.programs.remove(&name) {
                        program.kill(logger);
                    }
                }
                Some(properties) => {
                    if let Err(error) = self.reload_program(&name, properties, logger) {
                        log_error!(logger, "error reloading config for [{name}]: {error}");
                        println!(
                            "\x1b[33mWarning:\x1b[0m error reloading config file for {name} ({error})"
                        );
                    }
                }
            }
        }
        for (name, properties) in config {
            match Program::new(&name, properties) {
                Ok(mut program) => {
                    if program.auto_start() {
                        program.execute(logger);
                    }
                    self.programs.insert(name, program);
                }
                Err(error) => {
                    log_error!(logger, "can't create program [{name}]: {error}");
                    println!(
                        "\x1b[33mWarning:\x1b[0m error reloading config file for {name} ({error})"
                    );
                }
            }
        }
    }

    /// all-or-nothing per name: the replacement is fully constructed before
    /// the previous program is stopped, so a failure leaves it untouched
    fn reload_program(
        &mut self,
        name: &str,
        properties: Properties,
        logger: &Logger,
    ) -> Result<(), ConfigError> {
        let Some(existing) = self.programs.get_mut(name) else {
            return Ok(());
        };
        if existing.reload_has_substantive_change(&properties) {
            let mut replacement = Program::new(name, properties)?;
            existing.kill(logger);
            if replacement.auto_start() {
                replacement.execute(logger);
            }
            self.programs.insert(name.to_owned(), replacement);
        } else {
            existing.assign_count(properties)?;
            existing.reload(logger);
        }
        Ok(())
    }

    /// start every auto_start program
    pub fn launch(&mut self, logger: &Logger) {
        for program in self.programs.values_mut() {
            if program.auto_start() {
                program.execute(logger);
            }
        }
    }

    /// stop everything we supervise, used on shutdown
    pub fn kill_all(&mut self, logger: &Logger) {
        for program in self.programs.values_mut() {
            program.kill(logger);
        }
    }

    pub fn status(&mut self) -> String {
        let mut lines: Vec<String> = Vec::with_capacity(self.programs.len());
        for program in self.programs.values_mut() {
            lines.push(program.status());
        }
        lines.join("\n")
    }

    pub fn full_status(&mut self, logger: &Logger) -> String {
        let mut lines: Vec<String> = Vec::with_capacity(self.programs.len());
        for program in self.programs.values_mut() {
            lines.push(program.full_status(logger));
        }
        lines.join("\n")
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Program> {
        self.programs.get_mut(name)
    }

    pub fn programs_mut(&mut self) -> impl Iterator<Item = &mut Program> {
        self.programs.values_mut()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

pub fn new_shared_registry(registry: Registry) -> SharedRegistry {
    Arc::new(Mutex::new(registry))
}

/* -------------------------------------------------------------------------- */
/*                                    Tests                                   */
/* -------------------------------------------------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::Child;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_logger() -> (TempDir, Logger) {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = Logger::open(dir.path().join("log.txt")).expect("logger");
        (dir, logger)
    }

    fn write_config(path: &Path, contents: &str) {
        fs::write(path, contents).expect("config file");
    }

    fn loaded(dir: &TempDir, contents: &str) -> (Registry, PathBuf, Logger) {
        let path = dir.path().join("config.yaml");
        write_config(&path, contents);
        let logger = Logger::open(dir.path().join("log.txt")).expect("logger");
        let mut registry = Registry::new(vec![path.clone()]);
        registry.load(&logger).expect("load");
        (registry, path, logger)
    }

    fn pids(registry: &Registry, name: &str) -> Vec<Option<u32>> {
        registry.programs[name].children.iter().map(Child::pid).collect()
    }

    #[test]
    fn load_skips_entries_that_do_not_validate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (registry, _path, _logger) = loaded(
            &dir,
            "good:\n  cmd: exit 0\n  auto_start: false\nbad:\n  count: 5\n",
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.programs.contains_key("good"));
    }

    #[test]
    fn load_fails_on_an_unreadable_file() {
        let (_dir, logger) = test_logger();
        let mut registry = Registry::new(vec![PathBuf::from("/nonexistent/config.yaml")]);
        assert!(registry.load(&logger).is_err());
    }

    #[test]
    fn reloading_an_unchanged_config_reconstructs_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut registry, _path, logger) = loaded(&dir, "worker:\n  cmd: sleep 60\n  count: 2\n");
        registry.launch(&logger);
        let before = pids(&registry, "worker");

        registry.reload(&logger);
        assert_eq!(registry.len(), 1);
        assert_eq!(pids(&registry, "worker"), before);

        registry.kill_all(&logger);
    }

    #[test]
    fn reload_replaces_a_program_on_substantive_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut registry, path, logger) = loaded(&dir, "worker:\n  cmd: sleep 60\n");
        registry.launch(&logger);
        let before = pids(&registry, "worker");

        write_config(&path, "worker:\n  cmd: sleep 120\n");
        registry.reload(&logger);

        assert_eq!(registry.programs["worker"].config.command, "sleep 120");
        assert_ne!(pids(&registry, "worker"), before);
        assert!(registry
            .programs
            .get_mut("worker")
            .expect("worker")
            .children
            .iter_mut()
            .all(Child::is_running));

        registry.kill_all(&logger);
    }

    #[test]
    fn reload_keeps_the_prior_program_when_the_new_entry_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut registry, path, logger) = loaded(&dir, "worker:\n  cmd: sleep 60\n");
        registry.launch(&logger);
        let before = pids(&registry, "worker");

        write_config(&path, "worker:\n  cmd: sleep 120\n  count: 0\n");
        registry.reload(&logger);

        assert_eq!(registry.programs["worker"].config.command, "sleep 60");
        assert_eq!(pids(&registry, "worker"), before);

        registry.kill_all(&logger);
    }

    #[test]
    fn reload_drops_programs_gone_from_the_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut registry, path, logger) = loaded(
            &dir,
            "keeper:\n  cmd: sleep 60\ngoner:\n  cmd: sleep 60\n",
        );
        registry.launch(&logger);

        write_config(&path, "keeper:\n  cmd: sleep 60\n");
        registry.reload(&logger);

        assert_eq!(registry.len(), 1);
        assert!(registry.programs.contains_key("keeper"));

        registry.kill_all(&logger);
    }

    #[test]
    fn reload_creates_and_starts_new_programs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut registry, path, logger) = loaded(&dir, "worker:\n  cmd: sleep 60\n");
        registry.launch(&logger);

        write_config(
            &path,
            "worker:\n  cmd: sleep 60\nnewcomer:\n  cmd: sleep 60\nlazy:\n  cmd: sleep 60\n  auto_start: false\n",
        );
        registry.reload(&logger);

        assert_eq!(registry.len(), 3);
        assert!(registry
            .programs
            .get_mut("newcomer")
            .expect("newcomer")
            .children
            .iter_mut()
            .all(Child::is_running));
        assert!(registry
            .programs
            .get_mut("lazy")
            .expect("lazy")
            .children
            .iter_mut()
            .all(|child| !child.is_running()));

        registry.kill_all(&logger);
    }

    #[test]
    fn launch_only_starts_auto_start_programs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut registry, _path, logger) = loaded(
            &dir,
            "eager:\n  cmd: sleep 60\nlazy:\n  cmd: sleep 60\n  auto_start: false\n",
        );
        registry.launch(&logger);

        assert!(registry
            .programs
            .get_mut("eager")
            .expect("eager")
            .children
            .iter_mut()
            .all(Child::is_running));
        assert!(registry
            .programs
            .get_mut("lazy")
            .expect("lazy")
            .children
            .iter_mut()
            .all(|child| !child.is_running()));

        registry.kill_all(&logger);
    }
}
