//! Observable events emitted by the roof controller.

use std::fmt;

use log::Level;

use crate::error::{BusFault, Rejected};
use crate::panel::RoofPosition;
use crate::roof::{DeviceState, Direction, ParkState};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Connected,
    Disconnected,
    PanelStatusChanged {
        previous: RoofPosition,
        current: RoofPosition,
    },
    MotionAccepted(Direction),
    MotionRejected {
        direction: Direction,
        reason: Rejected,
    },
    /// Motion found in progress on connect, not commanded by us.
    MotionObserved(Direction),
    MotionSucceeded(Direction),
    MotionTimedOut(Direction),
    Abort(AbortReport),
    /// Neither fully open nor fully closed after an abort.
    AmbiguousPosition(RoofPosition),
    ParkChanged(ParkState),
    DeviceStateChanged(DeviceState),
    TimeoutChanged(u32),
    BusFault(BusFault),
}

/// What an abort found and did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AbortReport {
    AlreadyClosed,
    AlreadyOpen,
    PartiallyOpen,
    /// The switches could not be read and nothing was moving.
    PositionUnknown,
    Stopped(Direction),
    Failed(BusFault),
}

impl Event {
    /// Log level the event should be recorded at.
    pub fn level(&self) -> Level {
        match self {
            Event::Connected
            | Event::Disconnected
            | Event::MotionAccepted(_)
            | Event::MotionSucceeded(_)
            | Event::ParkChanged(_)
            | Event::TimeoutChanged(_) => Level::Info,
            Event::PanelStatusChanged { .. } | Event::DeviceStateChanged(_) => Level::Debug,
            Event::MotionRejected { .. }
            | Event::MotionObserved(_)
            | Event::MotionTimedOut(_)
            | Event::AmbiguousPosition(_) => Level::Warn,
            Event::Abort(AbortReport::Failed(_) | AbortReport::PositionUnknown)
            | Event::BusFault(_) => Level::Error,
            Event::Abort(_) => Level::Warn,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connected => f.write_str("roof controller connected"),
            Event::Disconnected => f.write_str("roof controller disconnected"),
            Event::PanelStatusChanged { previous, current } => {
                write!(f, "panels changed from {} to {}", previous, current)
            }
            Event::MotionAccepted(direction) => write!(f, "roof {} initiated", direction.verb()),
            Event::MotionRejected { direction, reason } => {
                write!(f, "roof {} rejected: {}", direction.verb(), reason)
            }
            Event::MotionObserved(direction) => {
                write!(f, "roof is already {} or partially moved", direction.verb())
            }
            Event::MotionSucceeded(direction) => write!(f, "roof is {}", direction.target()),
            Event::MotionTimedOut(direction) => {
                write!(f, "motion timeout has expired while {}", direction.verb())
            }
            Event::Abort(report) => match report {
                AbortReport::AlreadyClosed => {
                    f.write_str("roof appears to be closed and stationary, no action taken")
                }
                AbortReport::AlreadyOpen => {
                    f.write_str("roof appears to be open and stationary, no action taken")
                }
                AbortReport::PartiallyOpen => {
                    f.write_str("roof appears to be partially open and stationary, clearing relays")
                }
                AbortReport::PositionUnknown => {
                    f.write_str("roof position unknown after a bus fault, no action taken")
                }
                AbortReport::Stopped(direction) => {
                    write!(f, "abort requested on {} roof", direction.verb())
                }
                AbortReport::Failed(fault) => write!(f, "abort failed to clear relays: {}", fault),
            },
            Event::AmbiguousPosition(position) => {
                write!(f, "roof neither open nor closed ({}), park state reset", position)
            }
            Event::ParkChanged(park) => write!(f, "park state is now {}", park),
            Event::DeviceStateChanged(state) => write!(f, "device state is now {}", state),
            Event::TimeoutChanged(secs) => write!(f, "motion timeout set to {}s", secs),
            Event::BusFault(fault) => write!(f, "bus fault: {}", fault),
        }
    }
}
