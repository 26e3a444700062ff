use std::sync::Arc;
use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::{broadcast, mpsc};

use crate::config::Settings;
use crate::server::state::{ServerState, StateCell};

// Anchored on the log component the dedicated server stamps on every line
// it owns: `[time] [thread/INFO] [.../DedicatedServer]: ...`.
static DONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DedicatedServer\]: Done").unwrap());
static CHAT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DedicatedServer\]: (<.*)$").unwrap());
static TPS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DedicatedServer\]: Dim\s+(-?\d+)").unwrap());
static PLAYERS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DedicatedServer\]: There are\s+(\d+)").unwrap());
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.\d+").unwrap());

/// Turns the server's free-text stdout into typed events.
///
/// One long-lived task; each launch hands its stdout over the channel and
/// the parser reads it to EOF. Lines that match nothing are dropped
/// silently, as are unreadable (non-UTF-8) lines; the supervisor notices
/// process death independently of this reader.
pub struct OutputParser {
    settings: Arc<Settings>,
    state: Arc<StateCell>,
    chat_tx: broadcast::Sender<String>,
    tps_tx: mpsc::Sender<(i32, f64)>,
    players_tx: mpsc::Sender<u32>,
}

impl OutputParser {
    pub fn new(
        settings: Arc<Settings>,
        state: Arc<StateCell>,
        chat_tx: broadcast::Sender<String>,
        tps_tx: mpsc::Sender<(i32, f64)>,
        players_tx: mpsc::Sender<u32>,
    ) -> Self {
        Self {
            settings,
            state,
            chat_tx,
            tps_tx,
            players_tx,
        }
    }

    pub async fn run(self, mut stdout_rx: mpsc::Receiver<ChildStdout>) {
        while let Some(stdout) = stdout_rx.recv().await {
            debug!("output parser attached to a new server process");
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => self.dispatch(&line),
                    Ok(None) => break,
                    Err(err) if err.kind() == std::io::ErrorKind::InvalidData => continue,
                    Err(_) => break,
                }
            }
        }
    }

    fn dispatch(&self, line: &str) {
        if self.settings.passthrough_std_out {
            println!("{line}");
        }

        if DONE_PATTERN.is_match(line) {
            // only legitimate while Starting; a stray Done elsewhere is noise
            if self.state.raise_running() {
                info!("server finished booting");
            }
            return;
        }

        if self.state.get() != ServerState::Running {
            return;
        }

        if let Some(caps) = CHAT_PATTERN.captures(line) {
            // receivers come and go with controller connections; no
            // controller attached simply drops the line
            let _ = self.chat_tx.send(caps[1].to_string());
        } else if let Some(caps) = TPS_PATTERN.captures(line) {
            let Ok(dim) = caps[1].parse::<i32>() else {
                return;
            };
            // the tps value is the last decimal on the row
            let Some(tps) = DECIMAL
                .find_iter(line)
                .last()
                .and_then(|m| m.as_str().parse::<f64>().ok())
            else {
                return;
            };
            let _ = self.tps_tx.try_send((dim, tps));
        } else if let Some(caps) = PLAYERS_PATTERN.captures(line) {
            if let Ok(count) = caps[1].parse::<u32>() {
                let _ = self.players_tx.try_send(count);
            }
        }
    }
}
