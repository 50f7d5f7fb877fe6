use serde::{Deserialize, Serialize};

/// Why a stream finished for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalReason {
    Target,
    Stop,
    BeStop,
    ForcedFlatten,
    NoTrade,
    ErrorStanddown,
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminalReason::Target => "TARGET",
            TerminalReason::Stop => "STOP",
            TerminalReason::BeStop => "BE_STOP",
            TerminalReason::ForcedFlatten => "FORCED_FLATTEN",
            TerminalReason::NoTrade => "NO_TRADE",
            TerminalReason::ErrorStanddown => "ERROR_STANDDOWN",
        };
        f.write_str(s)
    }
}

/// Stream lifecycle. Only the owning stream mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    PreHydration,
    Armed,
    RangeBuilding,
    RangeLocked,
    InPosition,
    Done(TerminalReason),
}

impl StreamState {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamState::Done(_))
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        match self {
            StreamState::Done(reason) => Some(*reason),
            _ => None,
        }
    }

    /// States in which the range window itself may still change.
    pub fn before_lock(&self) -> bool {
        matches!(self, StreamState::PreHydration | StreamState::Armed | StreamState::RangeBuilding)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::PreHydration => f.write_str("PreHydration"),
            StreamState::Armed => f.write_str("Armed"),
            StreamState::RangeBuilding => f.write_str("RangeBuilding"),
            StreamState::RangeLocked => f.write_str("RangeLocked"),
            StreamState::InPosition => f.write_str("InPosition"),
            StreamState::Done(reason) => write!(f, "Done({reason})"),
        }
    }
}
