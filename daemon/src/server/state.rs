use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the supervised server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    NotRunning = 0,
    Starting = 1,
    Running = 2,
}

impl ServerState {
    pub fn label(self) -> &'static str {
        match self {
            ServerState::NotRunning => "Not Running",
            ServerState::Starting => "Starting",
            ServerState::Running => "Running",
        }
    }

    fn from_u8(raw: u8) -> ServerState {
        match raw {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            _ => ServerState::NotRunning,
        }
    }
}

/// Shared state cell.
///
/// The supervisor owns every transition except `Starting -> Running`, which
/// the output parser performs when it sees the boot-complete line. Both of
/// the contended transitions are compare-exchanges, so a stale writer loses
/// cleanly. Reads elsewhere are advisory.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ServerState::NotRunning as u8))
    }

    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// `NotRunning -> Starting`; gates every spawn.
    pub fn try_begin_start(&self) -> bool {
        self.0
            .compare_exchange(
                ServerState::NotRunning as u8,
                ServerState::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// `Starting -> Running`; only legitimate on a boot-complete line.
    pub fn raise_running(&self) -> bool {
        self.0
            .compare_exchange(
                ServerState::Starting as u8,
                ServerState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_only_permitted_from_not_running() {
        let cell = StateCell::new();
        assert!(cell.try_begin_start());
        assert_eq!(cell.get(), ServerState::Starting);
        // a second spawn attempt loses
        assert!(!cell.try_begin_start());

        cell.set(ServerState::Running);
        assert!(!cell.try_begin_start());
    }

    #[test]
    fn boot_complete_only_raises_out_of_starting() {
        let cell = StateCell::new();
        assert!(!cell.raise_running());
        assert_eq!(cell.get(), ServerState::NotRunning);

        cell.set(ServerState::Starting);
        assert!(cell.raise_running());
        assert_eq!(cell.get(), ServerState::Running);

        // a duplicate boot-complete line is a no-op
        assert!(!cell.raise_running());
        assert_eq!(cell.get(), ServerState::Running);
    }

    #[test]
    fn labels_match_the_wire_format() {
        assert_eq!(ServerState::NotRunning.label(), "Not Running");
        assert_eq!(ServerState::Starting.label(), "Starting");
        assert_eq!(ServerState::Running.label(), "Running");
    }
}
