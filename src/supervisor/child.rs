/* -------------------------------------------------------------------------- */
/*                                   Import                                   */
/* -------------------------------------------------------------------------- */

use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{AutoRestart, StopSignal};
use crate::logger::Logger;
use crate::{log_error, log_info};

use super::{Child, SpawnAttrs};

/* -------------------------------------------------------------------------- */
/*                                  Constant                                  */
/* -------------------------------------------------------------------------- */
/// granularity of the wait loop in `kill`
const KILL_POLL_PERIOD: Duration = Duration::from_millis(10);

/* -------------------------------------------------------------------------- */
/*                            Struct Implementation                           */
/* -------------------------------------------------------------------------- */
impl Child {
    pub(super) fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_owned(),
            command: command.to_owned(),
            attrs: SpawnAttrs::default(),
            handle: None,
            launched: false,
            start_ts: None,
            end_ts: None,
            retries: 0,
            killed_by_user: false,
        }
    }

    pub(super) fn set_spawn_attrs(&mut self, attrs: SpawnAttrs) {
        self.attrs = attrs;
    }

    /// launch the command through a shell; a spawn failure is logged and the
    /// child stays eligible for restart accounting, it is never raised to
    /// the caller
    pub(super) fn spawn(&mut self, logger: &Logger) {
        if self.is_running() {
            if let Some(pid) = self.pid() {
                log_info!(logger, "cannot start an already running process [pid:{pid}]");
            }
            return;
        }
        let stdout = self.open_redirection(self.attrs.stdout.clone(), logger);
        let stderr = self.open_redirection(self.attrs.stderr.clone(), logger);
        self.killed_by_user = false;
        let now = Instant::now();
        self.start_ts = Some(now);
        // pre-set so elapsed_time stays well defined if the spawn fails
        self.end_ts = Some(now);

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .env_clear()
            .envs(&self.attrs.env);
        if let Some(working_dir) = &self.attrs.working_dir {
            command.current_dir(working_dir);
        }
        let (umask, uid, gid) = (self.attrs.umask, self.attrs.uid, self.attrs.gid);
        unsafe {
            command.pre_exec(move || {
                libc::umask(umask);
                // the group first: a demoted user can no longer change it
                if let Some(gid) = gid {
                    if libc::setgid(gid) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                if let Some(uid) = uid {
                    if libc::setuid(uid) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
        match command.spawn() {
            Ok(handle) => {
                log_info!(logger, "execute({})[pid:{}]", self.command, handle.id());
                self.handle = Some(handle);
                self.launched = true;
                self.end_ts = None;
            }
            Err(error) => {
                self.handle = None;
                log_error!(logger, "[{}] execution failed: {error}", self.name);
            }
        }
    }

    /// open a redirection target for append; an unopenable path is
    /// downgraded to the null sink with a warning, an unconfigured one is
    /// inherited from the supervisor
    fn open_redirection(&self, path: Option<String>, logger: &Logger) -> Stdio {
        let Some(path) = path else {
            return Stdio::inherit();
        };
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Stdio::from(file),
            Err(error) => {
                log_error!(
                    logger,
                    "standard file {path} for {} can't be opened: {error}",
                    self.name
                );
                Stdio::null()
            }
        }
    }

    pub(super) fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(std::process::Child::id)
    }

    /// the collected exit code, absent while running or never launched; a
    /// signal terminated child reports the signal number instead
    pub(super) fn exit_status(&mut self) -> Option<i32> {
        if !self.launched {
            return None;
        }
        let handle = self.handle.as_mut()?;
        match handle.try_wait() {
            Ok(Some(status)) => Some(extract_exit_code(status)),
            Ok(None) | Err(_) => None,
        }
    }

    pub(super) fn is_running(&mut self) -> bool {
        match self.handle.as_mut() {
            Some(handle) => matches!(handle.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// the process's time to live so far
    pub(super) fn elapsed_time(&mut self) -> Option<Duration> {
        let start = self.start_ts?;
        if self.is_running() {
            Some(start.elapsed())
        } else {
            Some(self.end_ts?.duration_since(start))
        }
    }

    /// did this child survive long enough to count as successfully started?
    /// living exactly `start_time` counts as "did not live enough"
    pub(super) fn lived_enough(&self, start_time: u64) -> bool {
        if start_time == 0 {
            return true;
        }
        match (self.start_ts, self.end_ts) {
            (Some(start), Some(end)) => {
                end.duration_since(start) > Duration::from_secs(start_time)
            }
            _ => true,
        }
    }

    /// send `signal` and wait for the exit, at most `grace` (SIGKILL cannot
    /// be ignored so it is always awaited); `end_ts` marks the signal time
    /// so the monitor can escalate on children that survive the window
    pub(super) fn kill(&mut self, signal: StopSignal, by_user: bool, grace: Duration) {
        self.killed_by_user = by_user;
        if !self.is_running() {
            return;
        }
        let Some(pid) = self.pid() else {
            return;
        };
        if unsafe { libc::kill(pid as libc::pid_t, signal.number()) } == -1 {
            return;
        }
        let signalled = Instant::now();
        self.end_ts = Some(signalled);
        while self.is_running() {
            if signal != StopSignal::Kill && signalled.elapsed() >= grace {
                return;
            }
            thread::sleep(KILL_POLL_PERIOD);
        }
        self.end_ts = Some(Instant::now());
    }

    pub(super) fn restart(&mut self, logger: &Logger) {
        log_info!(logger, "restart process [{}]", self.name);
        self.kill(StopSignal::Kill, false, Duration::ZERO);
        self.retries = 0;
        self.spawn(logger);
    }

    /// the periodic decision step driven by the monitor
    pub(super) fn check(
        &mut self,
        auto_restart: AutoRestart,
        stop_time: u64,
        exit_codes: &[i32],
        start_time: u64,
        retries_limit: u32,
        logger: &Logger,
    ) {
        if self.launched {
            if let Some(code) = self.exit_status() {
                if self.end_ts.is_none() {
                    self.end_ts = Some(Instant::now());
                    if !exit_codes.contains(&code) {
                        if let Some(pid) = self.pid() {
                            log_info!(
                                logger,
                                "process[pid:{pid}] stopped unexpectedly [code:{code}]"
                            );
                        }
                    }
                }
            }
        }
        if self.exit_status().is_some() {
            self.ensure_restart(auto_restart, exit_codes, retries_limit, start_time, logger);
        } else {
            self.ensure_force_kill(stop_time, logger);
        }
    }

    /// decide whether an exited child comes back: never against the user's
    /// will, never past the retry limit, and under UNEXPECTED a clean stable
    /// exit is accepted as final
    fn ensure_restart(
        &mut self,
        auto_restart: AutoRestart,
        exit_codes: &[i32],
        retries_limit: u32,
        start_time: u64,
        logger: &Logger,
    ) {
        if auto_restart == AutoRestart::Never
            || self.killed_by_user
            || self.retries > retries_limit
        {
            return;
        }
        let expected = self
            .exit_status()
            .is_some_and(|code| exit_codes.contains(&code));
        if auto_restart == AutoRestart::Unexpected && expected && self.lived_enough(start_time) {
            return;
        }
        if !expected || !self.lived_enough(start_time) {
            self.retries += 1;
            if self.retries > retries_limit {
                if let Some(pid) = self.pid() {
                    log_info!(logger, "max retries reached [pid:{pid}]");
                }
                return;
            }
        }
        self.spawn(logger);
    }

    /// escalate a graceful stop that overstayed its grace window
    fn ensure_force_kill(&mut self, stop_time: u64, logger: &Logger) {
        let Some(end) = self.end_ts else {
            return;
        };
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        if end.elapsed() >= Duration::from_secs(stop_time) && handle.kill().is_ok() {
            log_info!(logger, "force kill process [pid:{}]", handle.id());
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                               Common Function                              */
/* -------------------------------------------------------------------------- */
/// on unix a signal terminated child carries no exit code, report the signal
/// number the way wait(2) reporting tools do
fn extract_exit_code(status: ExitStatus) -> i32 {
    status.code().or_else(|| status.signal()).unwrap_or(-1)
}

/* -------------------------------------------------------------------------- */
/*                                    Tests                                   */
/* -------------------------------------------------------------------------- */
