use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use mcward_protocol::{ChatMessage, Frame};
use tokio::select;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::app::AppState;
use crate::server::StatusRequest;

const STATUS_CADENCE: Duration = Duration::from_secs(60);
const STATUS_REPLY_DEADLINE: Duration = Duration::from_secs(10);

/// Handle to the single attached controller.
///
/// One watch channel cancels all three of the connection's workers, which
/// is what lets a takeover (or daemon shutdown) detach the previous
/// controller without counting tokens: `shutdown` broadcasts once and then
/// awaits the connection task with a bound.
pub struct ControllerConnection {
    addr: SocketAddr,
    cancel: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl ControllerConnection {
    pub fn spawn(state: AppState, socket: WebSocket, addr: SocketAddr) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);
        let task = tokio::spawn(serve_controller(
            state,
            socket,
            addr,
            cancel.clone(),
            cancel_rx,
        ));
        Self { addr, cancel, task }
    }

    pub async fn shutdown(self, drain: Duration) {
        let _ = self.cancel.send(true);
        if tokio::time::timeout(drain, self.task).await.is_err() {
            warn!("controller at {} did not drain in time", self.addr);
        }
    }
}

async fn serve_controller(
    state: AppState,
    socket: WebSocket,
    addr: SocketAddr,
    cancel: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
) {
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Message>();

    let status_task = tokio::spawn(status_pusher(
        state.status_tx.clone(),
        outgoing_tx.clone(),
        cancel_rx.clone(),
    ));
    let chat_task = tokio::spawn(chat_pusher(
        state.chat_tx.subscribe(),
        outgoing_tx.clone(),
        cancel_rx.clone(),
    ));

    connection_loop(socket, state.cmd_tx.clone(), outgoing_rx, cancel_rx).await;

    // whatever ended the loop, fan the shutdown out to the pushers
    let _ = cancel.send(true);
    let _ = status_task.await;
    let _ = chat_task.await;
    info!("controller at {addr} detached");
}

/// Reads frames and owns every socket write; the pushers reach the socket
/// only through the outgoing queue, so writes never interleave.
async fn connection_loop(
    socket: WebSocket,
    cmd_tx: mpsc::Sender<String>,
    mut outgoing_rx: UnboundedReceiver<Message>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let (mut outgoing, mut incoming) = socket.split();

    loop {
        select! {
            msg = incoming.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(&cmd_tx, text.as_str()).await,
                    Some(Ok(Message::Close(_))) => {
                        // courtesy close back; the peer may already be gone
                        let _ = outgoing
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::NORMAL,
                                reason: Utf8Bytes::from_static("bye"),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("controller read error: {err}");
                        break;
                    }
                }
            }

            msg = outgoing_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(err) = outgoing.send(msg).await {
                    warn!("controller write error: {err}");
                    break;
                }
            }

            _ = cancel_rx.changed() => {
                let _ = outgoing
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: Utf8Bytes::from_static("superseded"),
                    })))
                    .await;
                let _ = outgoing.close().await;
                break;
            }
        }
    }
}

async fn handle_frame(cmd_tx: &mpsc::Sender<String>, raw: &str) {
    match serde_json::from_str::<Frame>(raw) {
        Ok(Frame::Cmd(payload)) => {
            if cmd_tx.send(payload.cmd).await.is_err() {
                warn!("command inbox is gone");
            }
        }
        Ok(other) => debug!("ignoring unexpected inbound frame: {other:?}"),
        Err(err) => warn!("malformed frame from controller: {err}"),
    }
}

/// Requests a snapshot on a fixed cadence (first pull immediate) and
/// enqueues it as a `status` frame. A dropped reply means the server is not
/// running; a timed-out reply is logged and skipped.
async fn status_pusher(
    status_tx: mpsc::Sender<StatusRequest>,
    outgoing: UnboundedSender<Message>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut cadence = tokio::time::interval(STATUS_CADENCE);
    loop {
        select! {
            _ = cadence.tick() => {}
            _ = cancel_rx.changed() => return,
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        select! {
            sent = status_tx.send(StatusRequest { reply: reply_tx }) => {
                if sent.is_err() {
                    return;
                }
            }
            _ = cancel_rx.changed() => return,
        }
        select! {
            reply = tokio::time::timeout(STATUS_REPLY_DEADLINE, reply_rx) => match reply {
                Ok(Ok(report)) => {
                    if !push_frame(&outgoing, &Frame::Status(report)) {
                        return;
                    }
                }
                Ok(Err(_)) => debug!("status request refused; server is not running"),
                Err(_) => warn!(
                    "no status update from the supervisor within {}s; it may be deadlocked",
                    STATUS_REPLY_DEADLINE.as_secs()
                ),
            },
            _ = cancel_rx.changed() => return,
        }
    }
}

/// Wraps each scraped chat line as a timestamped `msg` frame.
async fn chat_pusher(
    mut chat_rx: broadcast::Receiver<String>,
    outgoing: UnboundedSender<Message>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        select! {
            _ = cancel_rx.changed() => return,

            line = chat_rx.recv() => match line {
                Ok(line) => {
                    if !push_frame(&outgoing, &Frame::Msg(ChatMessage::now(line))) {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("chat pusher lagged; dropped {missed} lines");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

fn push_frame(outgoing: &UnboundedSender<Message>, frame: &Frame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => outgoing.send(Message::Text(Utf8Bytes::from(text))).is_ok(),
        Err(err) => {
            warn!("could not serialize outbound frame: {err}");
            true
        }
    }
}
