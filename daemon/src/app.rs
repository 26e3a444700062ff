use std::sync::{Arc, RwLock};

use anyhow::Context;
use log::{debug, error, info};
use tokio::sync::{Mutex, Notify, broadcast, mpsc};

use crate::config::Settings;
use crate::drivers::GracefulShutdown;
use crate::drivers::websocket::{ControllerConnection, WsDriver};
use crate::install;
use crate::server::supervisor::RELAUNCH_RETRY_DELAY;
use crate::server::{ConsoleWriter, OutputParser, StateCell, StatusBuilder, StatusRequest, Supervisor};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const COMMAND_INBOX_DEPTH: usize = 32;
const CHAT_INBOX_DEPTH: usize = 32;
const TPS_INBOX_DEPTH: usize = 8;

/// Everything the control plane needs: channels into the supervisor and
/// the single controller slot. The controller never owns the supervisor;
/// it only talks to it through these handles.
pub struct ApplicationState {
    pub settings: Arc<Settings>,
    pub cmd_tx: mpsc::Sender<String>,
    pub status_tx: mpsc::Sender<StatusRequest>,
    pub chat_tx: broadcast::Sender<String>,
    pub stop_notify: Arc<Notify>,
    pub controller: Mutex<Option<ControllerConnection>>,
}

pub type AppState = Arc<ApplicationState>;

pub async fn run_app() -> anyhow::Result<()> {
    info!("mcward daemon v{VERSION}");
    let settings = Arc::new(Settings::load()?);
    debug!(
        "settings loaded: {}",
        serde_json::to_string_pretty(&*settings).unwrap()
    );

    // install failures are the only fatal outcome; everything after the
    // first successful launch retries forever
    install::ensure_installed(&settings)
        .await
        .context("server install failed")?;
    install::apply_settings(&settings).context("rewriting server.properties failed")?;

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_INBOX_DEPTH);
    let (chat_tx, _) = broadcast::channel(CHAT_INBOX_DEPTH);
    let (tps_tx, tps_rx) = mpsc::channel(TPS_INBOX_DEPTH);
    let (players_tx, players_rx) = mpsc::channel(1);
    let (status_tx, status_rx) = mpsc::channel(1);

    let state_cell = Arc::new(StateCell::new());
    let console = ConsoleWriter::new();
    let running = Arc::new(RwLock::new(None));

    let (supervisor, channels) = Supervisor::new(
        settings.clone(),
        state_cell.clone(),
        console.clone(),
        running.clone(),
    );
    let parser = OutputParser::new(
        settings.clone(),
        state_cell.clone(),
        chat_tx.clone(),
        tps_tx,
        players_tx,
    );
    let builder = StatusBuilder::new(
        settings.clone(),
        state_cell,
        console,
        running,
        tps_rx,
        players_rx,
    );

    info!("Starting server...");
    loop {
        match supervisor.launch().await {
            Ok(_) => break,
            Err(err) => {
                error!(
                    "launch failed: {err:#}; retrying in {}s",
                    RELAUNCH_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(RELAUNCH_RETRY_DELAY).await;
            }
        }
    }
    supervisor.spawn_fibers(channels, cmd_rx, parser, builder, status_rx);

    let state: AppState = Arc::new(ApplicationState {
        settings,
        cmd_tx,
        status_tx,
        chat_tx,
        stop_notify: Arc::new(Notify::new()),
        controller: Mutex::new(None),
    });

    let mut gs = GracefulShutdown::new();
    gs.add_driver(WsDriver::new(state.clone()));
    gs.watch(state.stop_notify.clone()).await;
    info!("Bye.");
    Ok(())
}
