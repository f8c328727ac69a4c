//! Supervised child processes.
//!
//! A [`Supervisor`] owns one external program with piped stdin/stdout and knows
//! how to take it down again: close the pipes, ask it to terminate, give it a
//! grace period and finally kill its whole process group.

use std::{
    ffi::OsStr,
    fmt::{Display, Formatter},
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::TEARDOWN_GRACE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Terminating,
    Exited,
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessState::NotStarted => "not started",
            ProcessState::Running => "running",
            ProcessState::Terminating => "terminating",
            ProcessState::Exited => "exited",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Supervisor {
    program: PathBuf,
    grace: Duration,
    state: ProcessState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl Supervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            grace: TEARDOWN_GRACE,
            state: ProcessState::NotStarted,
            child: None,
            stdin: None,
            stdout: None,
        }
    }

    /// How long [`release`](Self::release) waits after the terminate signal.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Spawns the program with stdin and stdout piped and stderr discarded.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<I, S>(&mut self, args: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if self.state != ProcessState::NotStarted {
            return Err(io::Error::other(format!(
                "{} is {}, cannot start it again",
                self.program.display(),
                self.state
            )));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // own process group, so teardown reaches anything the program forks
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        #[cfg(windows)]
        {
            cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }

        let mut child = cmd.spawn()?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take();
        log::debug!("started {} with pid {:?}", self.program.display(), child.id());
        self.child = Some(child);
        self.state = ProcessState::Running;
        Ok(())
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        self.stdin.as_mut()
    }

    pub fn stdout(&mut self) -> Option<&mut ChildStdout> {
        self.stdout.as_mut()
    }

    /// Whether the process is still running. Reaps it if it has exited.
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => {
                self.state = ProcessState::Exited;
                false
            }
        }
    }

    /// Waits for the process to exit on its own.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| io::Error::other("process was never started"))?;
        let status = child.wait().await?;
        self.state = ProcessState::Exited;
        Ok(status)
    }

    /// Tears the process down.
    ///
    /// Closes stdin and stdout, sends a terminate signal and waits for the
    /// grace period. A process still alive after that is killed together with
    /// its process group. Calling this again, or on a process that already
    /// exited, is a no-op.
    pub async fn release(&mut self) {
        drop(self.stdin.take());
        drop(self.stdout.take());

        let Some(mut child) = self.child.take() else {
            if self.state != ProcessState::NotStarted {
                self.state = ProcessState::Exited;
            }
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            log::debug!("{} already exited: {}", self.program.display(), status);
            self.state = ProcessState::Exited;
            return;
        }

        self.state = ProcessState::Terminating;
        let pid = child.id();
        if let Some(pid) = pid {
            if !terminate(pid).await {
                let _ = child.start_kill();
            }
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!("{} exited: {}", self.program.display(), status);
            }
            Ok(Err(e)) => {
                log::warn!("failed to wait for {}: {}", self.program.display(), e);
            }
            Err(_) => {
                log::warn!(
                    "{} did not exit within {:?}, killing it",
                    self.program.display(),
                    self.grace
                );
                if let Some(pid) = pid {
                    force_kill(pid).await;
                }
                let _ = child.start_kill();
                if let Err(e) = child.wait().await {
                    log::warn!("failed to reap {}: {}", self.program.display(), e);
                }
            }
        }
        self.state = ProcessState::Exited;
    }
}

/// Runs a signalling helper quietly and reports whether it succeeded.
async fn run_quiet(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
async fn terminate(pid: u32) -> bool {
    // negative pid addresses the group created by process_group(0)
    run_quiet("kill", &["-TERM", "--", &format!("-{}", pid)]).await
        || run_quiet("kill", &["-TERM", &pid.to_string()]).await
}

#[cfg(unix)]
async fn force_kill(pid: u32) {
    run_quiet("kill", &["-KILL", "--", &format!("-{}", pid)]).await;
}

#[cfg(windows)]
async fn terminate(pid: u32) -> bool {
    run_quiet("taskkill", &["/pid", &pid.to_string(), "/T"]).await
}

#[cfg(windows)]
async fn force_kill(pid: u32) {
    run_quiet("taskkill", &["/pid", &pid.to_string(), "/T", "/F"]).await;
}

#[cfg(test)]
#[path = "process_test.rs"]
mod process_test;
