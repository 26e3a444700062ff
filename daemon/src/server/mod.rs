pub mod metrics;
pub mod parser;
pub mod process;
pub mod state;
pub mod status;
pub mod supervisor;

pub use parser::OutputParser;
pub use process::ConsoleWriter;
pub use state::{ServerState, StateCell};
pub use status::{StatusBuilder, StatusRequest};
pub use supervisor::Supervisor;
