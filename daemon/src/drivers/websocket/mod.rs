mod connection;
mod driver;

pub use connection::ControllerConnection;
pub use driver::{WsDriver, control_plane_router};
