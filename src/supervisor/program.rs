/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use std::time::Duration;

use crate::config::{validate_count, ProgramConfig, Properties};
use crate::error::ConfigError;
use crate::log_info;
use crate::logger::Logger;

use super::{Child, Program, SpawnAttrs};

/* -------------------------------------------------------------------------- */
/*                                  Constants                                 */
/* -------------------------------------------------------------------------- */
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const BLUE: &str = "\x1b[34m";
const MAGENTA: &str = "\x1b[35m";
const RESET: &str = "\x1b[0m";

/* -------------------------------------------------------------------------- */
/*                            Struct Implementation                           */
/* -------------------------------------------------------------------------- */
impl Program {
    /// validate the raw properties and allocate the children; the mapping is
    /// kept verbatim so reload can diff it against future configurations
    pub fn new(name: &str, properties: Properties) -> Result<Self, ConfigError> {
        let config = ProgramConfig::from_properties(name, &properties)?;
        let children = (0..config.count)
            .map(|_| Child::new(name, &config.command))
            .collect();
        Ok(Self {
            name: name.to_owned(),
            config,
            properties,
            children,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auto_start(&self) -> bool {
        self.config.auto_start
    }

    fn spawn_attrs(&self) -> SpawnAttrs {
        SpawnAttrs {
            working_dir: self.config.working_dir.clone(),
            env: self.config.env.clone(),
            umask: self.config.umask,
            uid: self.config.uid,
            gid: self.config.gid,
            stdout: self.config.stdout.clone(),
            stderr: self.config.stderr.clone(),
        }
    }

    /// start every child with the current launch parameters
    pub fn execute(&mut self, logger: &Logger) {
        log_info!(logger, "execute program [{}]", self.name);
        self.execute_from(0, logger);
    }

    fn execute_from(&mut self, first: usize, logger: &Logger) {
        let attrs = self.spawn_attrs();
        for child in self.children.iter_mut().skip(first) {
            child.set_spawn_attrs(attrs.clone());
            child.spawn(logger);
        }
    }

    /// gracefully stop every running child
    pub fn kill(&mut self, logger: &Logger) {
        log_info!(logger, "kill program [{}]", self.name);
        let grace = Duration::from_secs(self.config.stop_time);
        for child in &mut self.children {
            child.kill(self.config.stop_signal, true, grace);
        }
    }

    pub fn restart(&mut self, logger: &Logger) {
        log_info!(logger, "restart program [{}]", self.name);
        let attrs = self.spawn_attrs();
        for child in &mut self.children {
            child.set_spawn_attrs(attrs.clone());
            child.restart(logger);
        }
    }

    /// one supervision pass over every child
    pub fn check(&mut self, logger: &Logger) {
        for child in &mut self.children {
            child.check(
                self.config.auto_restart,
                self.config.stop_time,
                &self.config.exit_codes,
                self.config.start_time,
                self.config.retries,
                logger,
            );
        }
    }

    /// one human readable line counting the five child categories
    pub fn status(&mut self) -> String {
        let (mut launched, mut running, mut succeeded, mut failed, mut stopped) = (0, 0, 0, 0, 0);
        for child in &mut self.children {
            if child.launched {
                launched += 1;
            }
            if child.is_running() {
                running += 1;
            }
            if child.killed_by_user {
                stopped += 1;
            } else if let Some(code) = child.exit_status() {
                if code == 0 {
                    succeeded += 1;
                } else {
                    failed += 1;
                }
            }
        }
        format!(
            "program: {}\n↳ launched: {launched}, running: {running}, success: {succeeded}, failed: {failed}, stopped: {stopped}",
            self.name
        )
    }

    /// the summary line plus one detail line per launched child; the state
    /// is refreshed through `check` first so the report is current
    pub fn full_status(&mut self, logger: &Logger) -> String {
        self.check(logger);
        let mut report = self.status();
        let start_time = self.config.start_time;
        for child in &mut self.children {
            if !child.launched {
                continue;
            }
            let Some(pid) = child.pid() else {
                continue;
            };
            let elapsed = child.elapsed_time().unwrap_or_default();
            let state = if child.is_running() {
                if start_time > 0 && elapsed <= Duration::from_secs(start_time) {
                    format!("{YELLOW}starting{RESET}")
                } else {
                    format!("{YELLOW}running{RESET}")
                }
            } else if child.killed_by_user {
                format!("{BLUE}stopped{RESET}")
            } else if !child.lived_enough(start_time) {
                format!("{MAGENTA}stopped prematurely{RESET}")
            } else {
                match child.exit_status() {
                    Some(0) => format!("{GREEN}success{RESET}"),
                    Some(code) => format!("{RED}failed{RESET} [code:{code}]"),
                    None => continue,
                }
            };
            report.push_str(&format!("\n↳ [pid:{pid}] {state} ({elapsed:.1?})"));
        }
        report
    }

    /// true iff any key other than `count` differs from the stored mapping;
    /// a bare count change is adjusted in place instead of rebuilding
    pub fn reload_has_substantive_change(&self, new_properties: &Properties) -> bool {
        new_properties
            .iter()
            .filter(|(key, _)| key.as_str() != "count")
            .any(|(key, value)| self.properties.get(key) != Some(value))
    }

    /// adopt the new mapping, re-validating its replica count
    pub fn assign_count(&mut self, new_properties: Properties) -> Result<(), ConfigError> {
        self.config.count = match new_properties.get("count") {
            Some(value) if !value.is_null() => validate_count(&self.name, value)?,
            _ => ProgramConfig::default().count,
        };
        self.properties = new_properties;
        Ok(())
    }

    /// reconcile the child list with the configured count: grow by appending
    /// (and starting, when auto_start) fresh children, shrink by stopping
    /// the removed tail before truncating; survivors are left undisturbed
    pub fn reload(&mut self, logger: &Logger) {
        use std::cmp::Ordering as O;
        match self.children.len().cmp(&self.config.count) {
            O::Equal => {}
            O::Less => {
                let first_new = self.children.len();
                for _ in first_new..self.config.count {
                    self.children.push(Child::new(&self.name, &self.config.command));
                }
                if self.config.auto_start {
                    self.execute_from(first_new, logger);
                }
            }
            O::Greater => {
                let grace = Duration::from_secs(self.config.stop_time);
                for child in self.children.iter_mut().skip(self.config.count) {
                    child.kill(self.config.stop_signal, true, grace);
                }
                self.children.truncate(self.config.count);
            }
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Tests                                   */
/* -------------------------------------------------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    fn test_logger() -> (TempDir, Logger) {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = Logger::open(dir.path().join("log.txt")).expect("logger");
        (dir, logger)
    }

    fn properties(yaml: &str) -> Properties {
        serde_yaml::from_str(yaml).expect("test properties should parse")
    }

    fn program(yaml: &str) -> Program {
        Program::new("demo", properties(yaml)).expect("test program should validate")
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn pids(program: &Program) -> Vec<Option<u32>> {
        program.children.iter().map(Child::pid).collect()
    }

    #[test]
    fn construction_allocates_count_children() {
        let program = program("cmd: exit 0\ncount: 3");
        assert_eq!(program.children.len(), 3);
    }

    #[test]
    fn status_counts_the_five_categories() {
        let (_dir, logger) = test_logger();
        let mut program = program("cmd: exit 0\ncount: 2");

        assert_eq!(
            program.status(),
            "program: demo\n↳ launched: 0, running: 0, success: 0, failed: 0, stopped: 0"
        );

        program.execute(&logger);
        assert!(wait_until(|| program
            .children
            .iter_mut()
            .all(|child| child.exit_status().is_some())));
        assert_eq!(
            program.status(),
            "program: demo\n↳ launched: 2, running: 0, success: 2, failed: 0, stopped: 0"
        );
    }

    #[test]
    fn kill_then_execute_returns_to_all_running() {
        let (_dir, logger) = test_logger();
        let mut program = program("cmd: sleep 60\ncount: 2\nstop_time: 5");

        program.execute(&logger);
        assert!(program.children.iter_mut().all(Child::is_running));

        program.kill(&logger);
        assert!(program.children.iter_mut().all(|child| !child.is_running()));
        assert!(program.children.iter().all(|child| child.killed_by_user));

        program.execute(&logger);
        assert!(program.children.iter_mut().all(Child::is_running));
        assert!(program.children.iter().all(|child| !child.killed_by_user));

        program.kill(&logger);
    }

    #[test]
    fn full_status_reports_one_line_per_launched_child() {
        let (_dir, logger) = test_logger();
        let mut program = program("cmd: exit 0\ncount: 2");

        program.execute(&logger);
        assert!(wait_until(|| program
            .children
            .iter_mut()
            .all(|child| child.exit_status().is_some())));

        let report = program.full_status(&logger);
        assert_eq!(report.matches("[pid:").count(), 2);
        assert_eq!(report.matches("success").count(), 3); // summary line + 2 details
    }

    #[test]
    fn reload_grows_in_place_without_disturbing_survivors() {
        let (_dir, logger) = test_logger();
        let mut program = program("cmd: sleep 60\ncount: 2");

        program.execute(&logger);
        let before = pids(&program);

        program
            .assign_count(properties("cmd: sleep 60\ncount: 4"))
            .expect("count 4");
        program.reload(&logger);

        assert_eq!(program.children.len(), 4);
        assert_eq!(&pids(&program)[..2], &before[..]);
        assert!(program.children.iter_mut().all(Child::is_running));

        program.kill(&logger);
    }

    #[test]
    fn reload_shrink_stops_the_tail_first() {
        let (_dir, logger) = test_logger();
        let mut program = program("cmd: sleep 60\ncount: 4");

        program.execute(&logger);
        let before = pids(&program);

        program
            .assign_count(properties("cmd: sleep 60\ncount: 2"))
            .expect("count 2");
        program.reload(&logger);

        assert_eq!(program.children.len(), 2);
        assert_eq!(pids(&program), &before[..2]);
        assert!(program.children.iter_mut().all(Child::is_running));

        program.kill(&logger);
    }

    #[test]
    fn reload_with_matching_count_is_a_noop() {
        let (_dir, logger) = test_logger();
        let mut program = program("cmd: sleep 60\ncount: 2");

        program.execute(&logger);
        let before = pids(&program);
        program.reload(&logger);
        assert_eq!(pids(&program), before);

        program.kill(&logger);
    }

    #[test]
    fn substantive_change_ignores_count() {
        let program = program("cmd: exit 0\ncount: 2");

        assert!(!program.reload_has_substantive_change(&program.properties.clone()));
        assert!(!program.reload_has_substantive_change(&properties("cmd: exit 0\ncount: 4")));
        assert!(program.reload_has_substantive_change(&properties("cmd: exit 1\ncount: 2")));
        assert!(program.reload_has_substantive_change(&properties(
            "cmd: exit 0\ncount: 2\nstop_time: 4"
        )));
    }

    #[test]
    fn assign_count_revalidates() {
        let mut program = program("cmd: exit 0");
        assert!(program
            .assign_count(properties("cmd: exit 0\ncount: 101"))
            .is_err());
        program
            .assign_count(properties("cmd: exit 0"))
            .expect("absent count falls back to the default");
        assert_eq!(program.config.count, 1);
    }
}
