use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use mcward_protocol::StatusReport;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::config::Settings;
use crate::server::metrics;
use crate::server::process::ConsoleWriter;
use crate::server::state::{ServerState, StateCell};
use crate::server::supervisor::ChildSlot;

const LIST_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const TPS_QUIESCENCE: Duration = Duration::from_secs(1);
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

/// A snapshot request; dropping the reply sender tells the requester the
/// snapshot was refused.
pub struct StatusRequest {
    pub reply: oneshot::Sender<StatusReport>,
}

/// Builds health snapshots on request.
///
/// Player count and tps come back through the log-scraper inboxes, so the
/// probes are correlated to their commands only by timing. That holds
/// because this builder is the sole emitter of `list` and `forge tps`, and
/// it drains stale inbox entries before each probe.
pub struct StatusBuilder {
    settings: Arc<Settings>,
    state: Arc<StateCell>,
    console: ConsoleWriter,
    running: ChildSlot,
    tps_rx: mpsc::Receiver<(i32, f64)>,
    players_rx: mpsc::Receiver<u32>,
}

impl StatusBuilder {
    pub fn new(
        settings: Arc<Settings>,
        state: Arc<StateCell>,
        console: ConsoleWriter,
        running: ChildSlot,
        tps_rx: mpsc::Receiver<(i32, f64)>,
        players_rx: mpsc::Receiver<u32>,
    ) -> Self {
        Self {
            settings,
            state,
            console,
            running,
            tps_rx,
            players_rx,
        }
    }

    pub async fn run(mut self, mut req_rx: mpsc::Receiver<StatusRequest>) {
        while let Some(req) = req_rx.recv().await {
            if self.state.get() != ServerState::Running {
                debug!("status request dropped; server is not running");
                continue;
            }
            let report = self.build().await;
            let _ = req.reply.send(report);
        }
    }

    async fn build(&mut self) -> StatusReport {
        let info = *self.running.read().unwrap();
        let activetime = info
            .map(|i| i.launched_at.elapsed().as_secs())
            .unwrap_or(0);
        let memory = info.map(|i| metrics::process_memory_mib(i.pid)).unwrap_or(0);
        let (storage, storagemax) = metrics::disk_usage_mib(&self.settings.world_dir());

        let (playercount, tps) = match timeout(PROBE_DEADLINE, self.probe()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("status probe exceeded its deadline; emitting a partial snapshot");
                (0, BTreeMap::new())
            }
        };

        StatusReport {
            name: self.settings.name.clone(),
            playercount,
            playermax: self.settings.max_players,
            activetime,
            status: self.state.get().label().to_string(),
            memory,
            memorymax: u64::from(self.settings.max_ram),
            storage,
            storagemax,
            tps,
        }
    }

    async fn probe(&mut self) -> (u32, BTreeMap<i32, f64>) {
        while self.players_rx.try_recv().is_ok() {}
        let playercount = match self.console.write_command("list").await {
            Ok(()) => match timeout(LIST_REPLY_TIMEOUT, self.players_rx.recv()).await {
                Ok(Some(count)) => count,
                Ok(None) => 0,
                Err(_) => {
                    warn!("no reply to 'list' within {}s", LIST_REPLY_TIMEOUT.as_secs());
                    0
                }
            },
            Err(err) => {
                warn!("could not issue 'list': {err}");
                0
            }
        };

        while self.tps_rx.try_recv().is_ok() {}
        let mut tps = BTreeMap::new();
        match self.console.write_command("forge tps").await {
            Ok(()) => gather_tps(&mut self.tps_rx, &mut tps, TPS_QUIESCENCE).await,
            Err(err) => warn!("could not issue 'forge tps': {err}"),
        }

        (playercount, tps)
    }
}

/// Merges `(dim, tps)` rows until `quiescence` passes without a new one.
/// The server prints one row per dimension back to back, so a quiet second
/// means the report is complete.
async fn gather_tps(
    rx: &mut mpsc::Receiver<(i32, f64)>,
    out: &mut BTreeMap<i32, f64>,
    quiescence: Duration,
) {
    loop {
        match timeout(quiescence, rx.recv()).await {
            Ok(Some((dim, tps))) => {
                out.insert(dim, tps);
            }
            Ok(None) | Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    #[tokio::test]
    async fn gather_tps_merges_until_quiescence() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send((0, 20.0)).await.unwrap();
        tx.send((-1, 19.5)).await.unwrap();
        tx.send((0, 19.9)).await.unwrap(); // later row for the same dim wins

        let mut out = BTreeMap::new();
        gather_tps(&mut rx, &mut out, Duration::from_millis(50)).await;

        assert_eq!(out, BTreeMap::from([(0, 19.9), (-1, 19.5)]));
    }

    #[tokio::test]
    async fn requests_are_dropped_while_not_running() {
        let state = Arc::new(StateCell::new());
        let (_tps_tx, tps_rx) = mpsc::channel(8);
        let (_players_tx, players_rx) = mpsc::channel(1);
        let builder = StatusBuilder::new(
            Arc::new(Settings::default()),
            state,
            ConsoleWriter::new(),
            Arc::new(RwLock::new(None)),
            tps_rx,
            players_rx,
        );

        let (req_tx, req_rx) = mpsc::channel(1);
        tokio::spawn(builder.run(req_rx));

        let (reply_tx, reply_rx) = oneshot::channel();
        req_tx.send(StatusRequest { reply: reply_tx }).await.unwrap();
        // the builder drops the reply sender instead of answering
        assert!(reply_rx.await.is_err());
    }

    /// Full probe exchange against a `cat` stand-in for the server: the
    /// test reads the probing commands off cat's stdout and answers on the
    /// inboxes the way the output parser would.
    #[cfg(unix)]
    #[tokio::test]
    async fn probe_collects_player_count_and_tps() {
        use crate::server::supervisor::ChildInfo;
        use std::process::Stdio;
        use tokio::io::{AsyncBufReadExt, BufReader};
        use tokio::process::Command;

        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let console = ConsoleWriter::new();
        console.install(child.stdin.take().unwrap()).await;
        let mut echoed = BufReader::new(child.stdout.take().unwrap()).lines();

        let state = Arc::new(StateCell::new());
        state.set(ServerState::Starting);
        assert!(state.raise_running());

        let (tps_tx, tps_rx) = mpsc::channel(8);
        let (players_tx, players_rx) = mpsc::channel(1);
        let running: ChildSlot = Arc::new(RwLock::new(Some(ChildInfo {
            pid: std::process::id(),
            launched_at: std::time::Instant::now(),
        })));

        let builder = StatusBuilder::new(
            Arc::new(Settings::default()),
            state,
            console,
            running,
            tps_rx,
            players_rx,
        );
        let (req_tx, req_rx) = mpsc::channel(1);
        tokio::spawn(builder.run(req_rx));

        let (reply_tx, reply_rx) = oneshot::channel();
        req_tx.send(StatusRequest { reply: reply_tx }).await.unwrap();

        // act as the server: answer each probing command as it arrives
        assert_eq!(echoed.next_line().await.unwrap().unwrap(), "list");
        players_tx.send(2).await.unwrap();
        assert_eq!(echoed.next_line().await.unwrap().unwrap(), "forge tps");
        tps_tx.send((0, 20.0)).await.unwrap();
        tps_tx.send((-1, 19.5)).await.unwrap();

        let report = reply_rx.await.unwrap();
        assert_eq!(report.playercount, 2);
        assert_eq!(report.playermax, 20);
        assert_eq!(report.status, "Running");
        assert_eq!(report.tps, BTreeMap::from([(0, 20.0), (-1, 19.5)]));
        assert!(report.memory > 0);

        child.kill().await.ok();
    }
}
