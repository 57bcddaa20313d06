//! Printer lifecycle events delivered by the host.
//!
//! The engine cares about two edges: a print becoming active (gates the
//! active-cooling regime) and a print ending in any way, faults and
//! disconnects included, which must never leave the previous setpoint live.

/// Discrete print-state events from the host's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterEvent {
    PrintStarted,
    PrintResumed,
    PrintDone,
    PrintCancelled,
    PrintFailed,
    Error,
    Disconnected,
    /// Generic state change carrying the host's state string. Counts as a
    /// print-ending fault only when the string mentions an error.
    StateChanged { state: String },
}

impl PrinterEvent {
    /// Events that mark a print as in progress.
    pub fn starts_print(&self) -> bool {
        matches!(self, Self::PrintStarted | Self::PrintResumed)
    }

    /// Events after which the heater must not stay on the old setpoint.
    pub fn ends_print(&self) -> bool {
        match self {
            Self::PrintDone
            | Self::PrintCancelled
            | Self::PrintFailed
            | Self::Error
            | Self::Disconnected => true,
            Self::StateChanged { state } => state.to_ascii_lowercase().contains("error"),
            Self::PrintStarted | Self::PrintResumed => false,
        }
    }
}
