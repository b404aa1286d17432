//! Child process supervision: spawn in a fresh process group, capture logs, kill the whole group.

use crate::api::ApiClient;
use crate::error::HarnessError;
use crate::wait::{poll_until, Attempt, PollPolicy};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

/// Where an application binding listens; bindings hard-code this.
pub const DEFAULT_APP_PORT: u16 = 6543;

/// Bind port 0 and return what the OS handed out.
pub fn pick_free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

pub async fn port_open(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).await.is_ok()
}

/// A program invocation, independent of how it gets spawned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        LaunchCommand {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion with no time limit, failing with the captured stderr on a non-zero exit.
    pub async fn run_to_completion(&self) -> Result<(), HarnessError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        tracing::info!(command = %self.display(), "running");
        let output = cmd.output().await.map_err(|source| HarnessError::Spawn {
            command: self.display(),
            source,
        })?;
        if !output.status.success() {
            return Err(HarnessError::EarlyExit {
                name: self.display(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// A spawned process that leads its own process group, with stdout/stderr captured to files.
pub struct ChildProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
}

impl ChildProcess {
    /// `seq` distinguishes log files of successive launches of the same program.
    pub fn spawn(name: &str, command: &LaunchCommand, log_dir: &Path, seq: usize) -> Result<Self, HarnessError> {
        std::fs::create_dir_all(log_dir)?;
        let stdout_path = log_dir.join(format!("{name}.{seq}.out.log"));
        let stderr_path = log_dir.join(format!("{name}.{seq}.err.log"));
        let stdout_file = OpenOptions::new().create(true).append(true).open(&stdout_path)?;
        let stderr_file = OpenOptions::new().create(true).append(true).open(&stderr_path)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .process_group(0);
        for (k, v) in &command.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            command: command.display(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(name, pid, command = %command.display(), "spawned");
        Ok(ChildProcess {
            name: name.to_string(),
            child,
            pid,
            stdout_path,
            stderr_path,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn read_stderr(&self) -> String {
        std::fs::read_to_string(&self.stderr_path).unwrap_or_default()
    }

    pub fn read_stdout(&self) -> String {
        std::fs::read_to_string(&self.stdout_path).unwrap_or_default()
    }

    /// Fails with the captured stderr if the process has already exited.
    pub fn check_running(&mut self) -> Result<(), HarnessError> {
        match self.child.try_wait()? {
            None => Ok(()),
            Some(status) => Err(HarnessError::EarlyExit {
                name: self.name.clone(),
                status: status.to_string(),
                stderr: self.read_stderr(),
            }),
        }
    }

    /// SIGKILL every process in the group. A group that is already gone is not an error.
    pub fn kill_group(&mut self) {
        let Some(pid) = self.pid else { return };
        let Ok(pgid) = i32::try_from(pid) else { return };
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!(name = %self.name, pgid, error = %err, "kill failed");
            }
        }
    }

    /// Reap the process, giving up after `timeout`.
    pub async fn wait(&mut self, timeout: Duration) -> Result<(), HarnessError> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::debug!(name = %self.name, %status, "reaped");
                Ok(())
            }
            Err(_) => Err(HarnessError::Timeout {
                what: format!("{} to exit", self.name),
                waited: timeout,
                last: "still running".to_string(),
            }),
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Healthy,
    Terminating,
    Stopped,
}

impl LifecycleState {
    pub fn can_transition(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Starting, Healthy) | (Starting, Terminating) | (Healthy, Terminating) | (Terminating, Stopped) | (Stopped, Starting)
        )
    }
}

#[derive(Clone, Debug)]
pub struct LaunchSettings {
    pub health: PollPolicy,
    pub exit: PollPolicy,
    pub app_port: u16,
    pub log_dir: PathBuf,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        LaunchSettings {
            health: PollPolicy::fixed(Duration::from_millis(250), Duration::from_secs(180)),
            exit: PollPolicy::fixed(Duration::from_secs(1), Duration::from_secs(30)),
            app_port: DEFAULT_APP_PORT,
            log_dir: std::env::temp_dir().join("company-harness"),
        }
    }
}

impl LaunchSettings {
    /// Defaults overridden by `HARNESS_APP_PORT` and `HARNESS_LOG_DIR`.
    pub fn from_env() -> Result<Self, HarnessError> {
        let mut settings = LaunchSettings::default();
        if let Ok(port) = std::env::var("HARNESS_APP_PORT") {
            settings.app_port = port
                .parse()
                .map_err(|_| HarnessError::Config(format!("HARNESS_APP_PORT is not a port: {port}")))?;
        }
        if let Ok(dir) = std::env::var("HARNESS_LOG_DIR") {
            settings.log_dir = PathBuf::from(dir);
        }
        Ok(settings)
    }
}

/// An application binding under test, tracked through its lifecycle.
pub struct AppProcess {
    name: String,
    command: LaunchCommand,
    settings: LaunchSettings,
    api: ApiClient,
    state: LifecycleState,
    child: Option<ChildProcess>,
    launches: usize,
}

impl AppProcess {
    /// Spawn the application and wait until `/ping` answers.
    pub async fn launch(name: &str, command: LaunchCommand, settings: LaunchSettings) -> Result<Self, HarnessError> {
        let api = ApiClient::new(settings.app_port)?;
        let mut app = AppProcess {
            name: name.replace('/', "-"),
            command,
            settings,
            api,
            state: LifecycleState::Stopped,
            child: None,
            launches: 0,
        };
        app.start().await?;
        Ok(app)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn transition(&mut self, to: LifecycleState, action: &'static str) -> Result<(), HarnessError> {
        if !self.state.can_transition(to) {
            return Err(HarnessError::Lifecycle { from: self.state, action });
        }
        tracing::debug!(app = %self.name, from = ?self.state, to = ?to, "lifecycle");
        self.state = to;
        Ok(())
    }

    async fn start(&mut self) -> Result<(), HarnessError> {
        self.transition(LifecycleState::Starting, "start")?;
        self.launches += 1;
        let child = ChildProcess::spawn(&self.name, &self.command, &self.settings.log_dir, self.launches)?;
        let child = self.child.insert(child);
        let api = self.api.clone();
        let what = format!("{} to answer /ping", self.name);
        let ready = poll_until(&self.settings.health, &what, || {
            let running = child.check_running();
            let api = api.clone();
            async move {
                running?;
                Ok(match api.ping().await {
                    Ok(()) => Attempt::Ready(()),
                    Err(e) => Attempt::Retry(e.to_string()),
                })
            }
        })
        .await;
        match ready {
            Ok(()) => {
                self.transition(LifecycleState::Healthy, "report healthy")?;
                tracing::info!(app = %self.name, "healthy");
                Ok(())
            }
            Err(e) => {
                if let Some(child) = &self.child {
                    tracing::warn!(
                        app = %self.name,
                        pid = ?child.pid(),
                        stdout = %child.read_stdout(),
                        "application did not become healthy"
                    );
                }
                if let Err(kill_err) = self.kill().await {
                    tracing::warn!(app = %self.name, error = %kill_err, "cleanup after failed start");
                }
                Err(e)
            }
        }
    }

    /// Kill the process group, reap it and wait until the port stops accepting connections.
    pub async fn kill(&mut self) -> Result<(), HarnessError> {
        self.transition(LifecycleState::Terminating, "kill")?;
        if let Some(mut child) = self.child.take() {
            child.kill_group();
            child.wait(self.settings.exit.ceiling).await?;
        }
        let port = self.settings.app_port;
        let what = format!("port {port} to close");
        poll_until(&self.settings.exit, &what, || async move {
            Ok(if port_open(port).await {
                Attempt::Retry("still accepting connections".to_string())
            } else {
                Attempt::Ready(())
            })
        })
        .await?;
        self.transition(LifecycleState::Stopped, "report stopped")?;
        tracing::info!(app = %self.name, "stopped");
        Ok(())
    }

    pub async fn restart(&mut self) -> Result<(), HarnessError> {
        self.kill().await?;
        self.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_settings(dir: &Path) -> LaunchSettings {
        LaunchSettings {
            health: PollPolicy::fixed(Duration::from_millis(50), Duration::from_millis(600)),
            exit: PollPolicy::fixed(Duration::from_millis(50), Duration::from_secs(5)),
            app_port: pick_free_port().unwrap(),
            log_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn lifecycle_transitions() {
        use LifecycleState::*;
        assert!(Stopped.can_transition(Starting));
        assert!(Starting.can_transition(Healthy));
        assert!(Starting.can_transition(Terminating));
        assert!(Healthy.can_transition(Terminating));
        assert!(Terminating.can_transition(Stopped));
        assert!(!Healthy.can_transition(Starting));
        assert!(!Stopped.can_transition(Terminating));
        assert!(!Terminating.can_transition(Healthy));
    }

    #[test]
    fn command_display_joins_args() {
        let cmd = LaunchCommand::new("make").args(["start", "-C", "go/gorm"]).env("ADDR", "x");
        assert_eq!(cmd.display(), "make start -C go/gorm");
        assert_eq!(cmd.env, vec![("ADDR".to_string(), "x".to_string())]);
    }

    #[tokio::test]
    async fn early_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = LaunchCommand::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let mut child = ChildProcess::spawn("crasher", &cmd, dir.path(), 1).unwrap();
        child.wait(Duration::from_secs(5)).await.unwrap();
        match child.check_running() {
            Err(HarnessError::EarlyExit { name, stderr, .. }) => {
                assert_eq!(name, "crasher");
                assert!(stderr.contains("boom"), "stderr was {stderr:?}");
            }
            other => panic!("expected early exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn logs_are_captured_per_launch() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = LaunchCommand::new("sh").args(["-c", "echo listening; echo warn >&2"]);
        let mut child = ChildProcess::spawn("talker", &cmd, dir.path(), 2).unwrap();
        assert!(child.pid().is_some());
        child.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(child.read_stdout(), "listening\n");
        assert_eq!(child.read_stderr(), "warn\n");
        assert!(dir.path().join("talker.2.out.log").exists());
    }

    #[tokio::test]
    async fn run_to_completion_has_no_time_limit_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok = LaunchCommand::new("sh")
            .args(["-c", "sleep 1; test \"$MODE\" = release && touch built"])
            .env("MODE", "release")
            .current_dir(dir.path());
        ok.run_to_completion().await.unwrap();
        assert!(dir.path().join("built").exists());

        let failing = LaunchCommand::new("sh").args(["-c", "echo compile error >&2; exit 101"]);
        match failing.run_to_completion().await {
            Err(HarnessError::EarlyExit { stderr, .. }) => assert!(stderr.contains("compile error")),
            other => panic!("expected early exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn kill_group_reaps_children() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = LaunchCommand::new("sh").args(["-c", "sleep 30 & sleep 30"]);
        let mut child = ChildProcess::spawn("sleeper", &cmd, dir.path(), 1).unwrap();
        child.check_running().unwrap();
        child.kill_group();
        child.wait(Duration::from_secs(5)).await.unwrap();
        // Signalling the now-empty group again is harmless.
        child.kill_group();
    }

    #[tokio::test]
    async fn launch_fails_fast_on_crash() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = LaunchCommand::new("sh").args(["-c", "echo bad config >&2; exit 2"]);
        let settings = LaunchSettings {
            health: PollPolicy::fixed(Duration::from_millis(50), Duration::from_secs(10)),
            ..quick_settings(dir.path())
        };
        let err = AppProcess::launch("go/broken", cmd, settings).await.err().unwrap();
        match err {
            HarnessError::EarlyExit { name, stderr, .. } => {
                assert_eq!(name, "go-broken");
                assert!(stderr.contains("bad config"));
            }
            other => panic!("expected early exit, got {other}"),
        }
    }

    #[tokio::test]
    async fn launch_times_out_when_never_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = LaunchCommand::new("sleep").arg("30");
        let err = AppProcess::launch("silent", cmd, quick_settings(dir.path())).await.err().unwrap();
        assert!(matches!(err, HarnessError::Timeout { .. }), "got {err}");
    }
}
