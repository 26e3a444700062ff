mod frame;
mod status;

pub use frame::{ChatMessage, CommandPayload, Frame};
pub use status::StatusReport;
