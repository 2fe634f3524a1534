//! Driver lifecycle states and the ordering that gates every operation.

use std::fmt;

/// Lifecycle state of the host-side driver abstraction.
///
/// The states are totally ordered: `Unloaded < Loaded < Initialized <
/// Prepared < Running`. Operations declare a minimum state and fail with
/// [`AsioError::InvalidState`](crate::AsioError::InvalidState) below it, and
/// cascading teardown walks the order downward one state at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriverState {
    /// No driver is present in the process.
    Unloaded,
    /// The driver is loaded into memory but not initialised.
    Loaded,
    /// The driver is initialised and accepts commands; channels are known.
    Initialized,
    /// Audio buffers have been created for the active channel set.
    Prepared,
    /// The driver is running and delivering `buffer_switch` callbacks.
    Running,
}

impl DriverState {
    /// True when `self` is at or above `minimum` in the lifecycle order.
    pub fn at_least(self, minimum: DriverState) -> bool {
        self >= minimum
    }

    /// The state one step below `self`, if any. `Unloaded` has no
    /// predecessor.
    pub(crate) fn previous(self) -> Option<DriverState> {
        match self {
            DriverState::Unloaded => None,
            DriverState::Loaded => Some(DriverState::Unloaded),
            DriverState::Initialized => Some(DriverState::Loaded),
            DriverState::Prepared => Some(DriverState::Initialized),
            DriverState::Running => Some(DriverState::Prepared),
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Unloaded => "UNLOADED",
            DriverState::Loaded => "LOADED",
            DriverState::Initialized => "INITIALIZED",
            DriverState::Prepared => "PREPARED",
            DriverState::Running => "RUNNING",
        };
        f.write_str(name)
    }
}
