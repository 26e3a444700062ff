use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use log::{debug, error, info, warn};
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::server::process::{self, ConsoleWriter};
use crate::server::state::{ServerState, StateCell};
use crate::server::status::StatusBuilder;
use crate::server::{OutputParser, StatusRequest};

pub const RELAUNCH_RETRY_DELAY: Duration = Duration::from_secs(5);
const REBOOT_GAP: Duration = Duration::from_secs(5);

/// Pid and launch instant of the live child; advisory reads elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct ChildInfo {
    pub pid: u32,
    pub launched_at: Instant,
}

pub type ChildSlot = Arc<RwLock<Option<ChildInfo>>>;

/// Receivers the long-lived fibers consume; produced by [`Supervisor::new`]
/// and handed to [`Supervisor::spawn_fibers`] after the first launch.
pub struct SupervisorChannels {
    child_rx: mpsc::Receiver<Child>,
    stdout_rx: mpsc::Receiver<ChildStdout>,
}

/// Owns the lifecycle state machine.
///
/// `launch` is gated by a `NotRunning -> Starting` compare-exchange, so at
/// most one child exists no matter how `start` commands and crash
/// relaunches interleave. The keep-alive fiber is the only observer of
/// child exit; operator-initiated exits are flagged beforehand so it knows
/// not to relaunch them.
pub struct Supervisor {
    settings: Arc<Settings>,
    state: Arc<StateCell>,
    console: ConsoleWriter,
    running: ChildSlot,
    expected_exit: AtomicBool,
    fibers_started: AtomicBool,
    child_tx: mpsc::Sender<Child>,
    stdout_tx: mpsc::Sender<ChildStdout>,
}

impl Supervisor {
    pub fn new(
        settings: Arc<Settings>,
        state: Arc<StateCell>,
        console: ConsoleWriter,
        running: ChildSlot,
    ) -> (Arc<Self>, SupervisorChannels) {
        let (child_tx, child_rx) = mpsc::channel(1);
        let (stdout_tx, stdout_rx) = mpsc::channel(1);
        let supervisor = Arc::new(Self {
            settings,
            state,
            console,
            running,
            expected_exit: AtomicBool::new(false),
            fibers_started: AtomicBool::new(false),
            child_tx,
            stdout_tx,
        });
        (
            supervisor,
            SupervisorChannels {
                child_rx,
                stdout_rx,
            },
        )
    }

    /// Spawns a fresh child. Returns `Ok(false)` when the state machine is
    /// not in `NotRunning`, which makes concurrent launch attempts
    /// harmless.
    pub async fn launch(&self) -> anyhow::Result<bool> {
        if !self.state.try_begin_start() {
            debug!("launch skipped; server is not in the NotRunning state");
            return Ok(false);
        }

        let spawned = match process::spawn_server(&self.settings) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.state.set(ServerState::NotRunning);
                return Err(err).context("spawning server process");
            }
        };

        info!("server process launched (pid {})", spawned.pid);
        self.expected_exit.store(false, Ordering::SeqCst);
        self.console.install(spawned.stdin).await;
        *self.running.write().unwrap() = Some(ChildInfo {
            pid: spawned.pid,
            launched_at: Instant::now(),
        });

        // capacity-1 handoff to the long-lived fibers; both slots are free
        // because a launch is only reachable after the previous exit was
        // fully observed
        if self.stdout_tx.send(spawned.stdout).await.is_err()
            || self.child_tx.send(spawned.child).await.is_err()
        {
            bail!("supervisor fibers are gone");
        }
        Ok(true)
    }

    /// Spawns the four long-lived fibers exactly once, after the first
    /// successful launch. Relaunches reuse them through the handoff
    /// channels and the shared child slot.
    pub fn spawn_fibers(
        self: &Arc<Self>,
        channels: SupervisorChannels,
        cmd_rx: mpsc::Receiver<String>,
        parser: OutputParser,
        builder: StatusBuilder,
        status_rx: mpsc::Receiver<StatusRequest>,
    ) {
        if self.fibers_started.swap(true, Ordering::SeqCst) {
            warn!("supervisor fibers already started");
            return;
        }
        tokio::spawn(parser.run(channels.stdout_rx));
        tokio::spawn(builder.run(status_rx));
        tokio::spawn(self.clone().keep_alive(channels.child_rx));
        tokio::spawn(self.clone().process_commands(cmd_rx));
    }

    async fn keep_alive(self: Arc<Self>, mut child_rx: mpsc::Receiver<Child>) {
        while let Some(mut child) = child_rx.recv().await {
            match child.wait().await {
                Ok(status) => info!("server process exited with {status}"),
                Err(err) => warn!("failed waiting on server process: {err}"),
            }
            self.console.clear().await;
            *self.running.write().unwrap() = None;
            self.state.set(ServerState::NotRunning);

            if self.expected_exit.swap(false, Ordering::SeqCst) {
                info!("server stopped by operator; waiting for a start command");
                continue;
            }

            info!("relaunching server");
            while let Err(err) = self.launch().await {
                error!(
                    "relaunch failed: {err:#}; retrying in {}s",
                    RELAUNCH_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(RELAUNCH_RETRY_DELAY).await;
            }
        }
    }

    async fn process_commands(self: Arc<Self>, mut cmd_rx: mpsc::Receiver<String>) {
        while let Some(raw) = cmd_rx.recv().await {
            let cmd = raw.trim();
            debug!("operator command: {cmd}");
            match cmd {
                "start" => {
                    if let Err(err) = self.launch().await {
                        error!("start failed: {err:#}");
                    }
                }
                "stop" => {
                    self.mark_expected_exit();
                    self.forward("stop").await;
                }
                "kill" => {
                    self.mark_expected_exit();
                    self.kill_child();
                }
                "reboot" => {
                    self.mark_expected_exit();
                    self.forward("stop").await;
                    tokio::time::sleep(REBOOT_GAP).await;
                    if let Err(err) = self.launch().await {
                        error!("reboot launch failed: {err:#}");
                    }
                }
                "forcereboot" => {
                    self.mark_expected_exit();
                    self.kill_child();
                    tokio::time::sleep(REBOOT_GAP).await;
                    if let Err(err) = self.launch().await {
                        error!("forcereboot launch failed: {err:#}");
                    }
                }
                "save" => self.forward("save-all").await,
                other => self.forward(other).await,
            }
        }
    }

    /// Flags the next child exit as operator-initiated so keep_alive does
    /// not relaunch it. A no-op with no live child: the flag must not
    /// outlive the process it was aimed at.
    fn mark_expected_exit(&self) {
        if self.running.read().unwrap().is_some() {
            self.expected_exit.store(true, Ordering::SeqCst);
        }
    }

    fn kill_child(&self) {
        let info = *self.running.read().unwrap();
        match info {
            Some(info) => {
                if let Err(err) = process::kill_pid(info.pid) {
                    warn!("could not kill server process {}: {err}", info.pid);
                }
            }
            None => warn!("kill requested but no server process is attached"),
        }
    }

    async fn forward(&self, line: &str) {
        if let Err(err) = self.console.write_command(line).await {
            warn!("could not write '{line}' to the server console: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_supervisor(settings: Settings) -> (Arc<Supervisor>, SupervisorChannels, Arc<StateCell>) {
        let state = Arc::new(StateCell::new());
        let running = Arc::new(RwLock::new(None));
        let (supervisor, channels) = Supervisor::new(
            Arc::new(settings),
            state.clone(),
            ConsoleWriter::new(),
            running,
        );
        (supervisor, channels, state)
    }

    #[tokio::test]
    async fn launch_is_skipped_outside_not_running() {
        let (supervisor, _channels, state) = test_supervisor(Settings::default());
        state.set(ServerState::Starting);
        assert!(!supervisor.launch().await.unwrap());
        state.set(ServerState::Running);
        assert!(!supervisor.launch().await.unwrap());
    }

    #[tokio::test]
    async fn failed_spawn_reverts_to_not_running() {
        // a working directory that cannot exist guarantees the spawn fails
        let settings = Settings {
            directory: "/nonexistent/mcward-test-dir".to_string(),
            ..Settings::default()
        };
        let (supervisor, _channels, state) = test_supervisor(settings);
        assert!(supervisor.launch().await.is_err());
        assert_eq!(state.get(), ServerState::NotRunning);
        // the slot must still be free for a retry
        assert!(state.try_begin_start());
    }

    #[tokio::test]
    async fn expected_exit_is_only_flagged_with_a_live_child() {
        let (supervisor, _channels, _state) = test_supervisor(Settings::default());
        supervisor.mark_expected_exit();
        assert!(!supervisor.expected_exit.load(Ordering::SeqCst));

        *supervisor.running.write().unwrap() = Some(ChildInfo {
            pid: 1,
            launched_at: Instant::now(),
        });
        supervisor.mark_expected_exit();
        assert!(supervisor.expected_exit.load(Ordering::SeqCst));
    }
}
