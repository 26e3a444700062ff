use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use log::{error, info};
use tokio::net::TcpListener;

use crate::app::AppState;
use crate::drivers::Driver;
use crate::drivers::websocket::ControllerConnection;

const TAKEOVER_DRAIN: Duration = Duration::from_secs(1);

/// Control plane: one endpoint, one controller, no authentication.
pub struct WsDriver {
    app_state: AppState,
}

impl WsDriver {
    pub fn new(app_state: AppState) -> Self {
        Self { app_state }
    }
}

#[async_trait::async_trait]
impl Driver for WsDriver {
    async fn run(&self) {
        let addr = match self.app_state.settings.listen_addr() {
            Ok(addr) => addr,
            Err(err) => {
                error!("control plane cannot start: {err:#}");
                return;
            }
        };

        let app = control_plane_router(self.app_state.clone())
            .into_make_service_with_connect_info::<SocketAddr>();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("control plane cannot bind {addr}: {err}");
                return;
            }
        };
        info!("control plane listening on {addr}");

        let stop_token = self.app_state.stop_notify.clone();
        let state = self.app_state.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            stop_token.notified().await;
            info!("shutdown signal received, detaching controller");
            if let Some(controller) = state.controller.lock().await.take() {
                controller.shutdown(TAKEOVER_DRAIN).await;
            }
        });
        if let Err(err) = serve.await {
            error!("control plane server error: {err}");
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

pub fn control_plane_router(state: AppState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("controller connection received from {addr}");
    ws.on_upgrade(move |socket| attach_controller(state, socket, addr))
}

/// Installs the new controller, detaching any previous one first. The slot
/// mutex serializes takeovers, so the old connection's workers are always
/// cancelled and drained before the new connection's workers exist.
async fn attach_controller(state: AppState, socket: WebSocket, addr: SocketAddr) {
    let mut slot = state.controller.lock().await;
    if let Some(previous) = slot.take() {
        info!("controller takeover by {addr}; detaching the previous connection");
        previous.shutdown(TAKEOVER_DRAIN).await;
    }
    *slot = Some(ControllerConnection::spawn(state.clone(), socket, addr));
}
