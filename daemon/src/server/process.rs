use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::install::FORGE_UNIVERSAL_JAR;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("no server console attached")]
    NoConsole,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialized writer to the child's stdin.
///
/// This is the only path that touches stdin; the mutex guarantees that
/// concurrent callers (operator commands, status probes) emit whole
/// `line\n` writes with no interleaving.
#[derive(Clone)]
pub struct ConsoleWriter {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl ConsoleWriter {
    pub fn new() -> Self {
        Self {
            stdin: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn install(&self, stdin: ChildStdin) {
        *self.stdin.lock().await = Some(stdin);
    }

    pub async fn clear(&self) {
        *self.stdin.lock().await = None;
    }

    /// Writes `line` plus a single trailing newline to the server console.
    pub async fn write_command(&self, line: &str) -> Result<(), ConsoleError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ConsoleError::NoConsole)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

impl Default for ConsoleWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpawnedServer {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub pid: u32,
}

/// Builds the fixed JVM invocation for the server. The installer reuses it
/// for the one-shot eula run.
pub fn server_command(settings: &Settings) -> Command {
    let mut cmd = Command::new("java");
    cmd.arg("-jar")
        .arg(FORGE_UNIVERSAL_JAR)
        .arg("-Xms512M")
        .arg(format!("-Xmx{}M", settings.max_ram))
        .args([
            "-XX:+UseG1GC",
            "-XX:+UseCompressedOops",
            "-XX:MaxGCPauseMillis=50",
            "-XX:UseSSE=4",
            "-XX:+UseNUMA",
            "nogui",
        ])
        .current_dir(settings.server_dir());
    cmd
}

pub fn spawn_server(settings: &Settings) -> std::io::Result<SpawnedServer> {
    let mut cmd = server_command(settings);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(if settings.passthrough_std_err {
            Stdio::inherit()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdin not captured")
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout not captured")
    })?;
    let pid = child.id().unwrap_or(0);

    Ok(SpawnedServer {
        child,
        stdin,
        stdout,
        pid,
    })
}

/// SIGKILLs the process with the given id.
#[cfg(unix)]
pub fn kill_pid(pid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).map_err(std::io::Error::other)
}

#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process kill is only supported on unix",
    ))
}
