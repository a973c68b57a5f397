use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bus::{Bus, BusFault, SwitchAddresses, SWITCH_COUNT};
use crate::error::ConfigError;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Panel {
    North,
    South,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PanelStatus {
    Open,
    Closed,
    /// Neither limit switch triggered: in transit or disconnected.
    Indeterminate,
    /// The switches could not be read.
    Fault,
}

impl PanelStatus {
    /// Open is checked first, so a panel reporting both open and closed is
    /// taken as open.
    pub fn from_switches(open: bool, closed: bool) -> Self {
        if open {
            PanelStatus::Open
        } else if closed {
            PanelStatus::Closed
        } else {
            PanelStatus::Indeterminate
        }
    }
}

impl fmt::Display for PanelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelStatus::Open => f.write_str("Open"),
            PanelStatus::Closed => f.write_str("Closed"),
            PanelStatus::Indeterminate => f.write_str("Indeterminate"),
            PanelStatus::Fault => f.write_str("Fault"),
        }
    }
}

/// Electrical sense of the limit switch inputs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// A triggered switch reads as a cleared input.
    #[default]
    ActiveLow,
    ActiveHigh,
}

impl Polarity {
    #[inline]
    pub fn is_triggered(self, bit: bool) -> bool {
        match self {
            Polarity::ActiveLow => !bit,
            Polarity::ActiveHigh => bit,
        }
    }

    /// Input level that represents `triggered`.
    #[inline]
    pub fn level(self, triggered: bool) -> bool {
        match self {
            Polarity::ActiveLow => !triggered,
            Polarity::ActiveHigh => triggered,
        }
    }
}

/// Both panels as sampled by a single block read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RoofPosition {
    pub north: PanelStatus,
    pub south: PanelStatus,
}

impl RoofPosition {
    pub const FAULT: RoofPosition = RoofPosition {
        north: PanelStatus::Fault,
        south: PanelStatus::Fault,
    };

    pub const UNKNOWN: RoofPosition = RoofPosition {
        north: PanelStatus::Indeterminate,
        south: PanelStatus::Indeterminate,
    };

    pub fn panel(&self, panel: Panel) -> PanelStatus {
        match panel {
            Panel::North => self.north,
            Panel::South => self.south,
        }
    }

    pub fn is_open(&self) -> bool {
        self.north == PanelStatus::Open && self.south == PanelStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.north == PanelStatus::Closed && self.south == PanelStatus::Closed
    }

    pub fn is_fault(&self) -> bool {
        self.north == PanelStatus::Fault || self.south == PanelStatus::Fault
    }
}

impl fmt::Display for RoofPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "north {}, south {}", self.north, self.south)
    }
}

/// Turns the raw limit switch inputs into a [`RoofPosition`].
#[derive(Copy, Clone, Debug)]
pub struct SwitchInterpreter {
    addresses: SwitchAddresses,
    polarity: Polarity,
    start: u16,
}

impl SwitchInterpreter {
    pub fn new(addresses: SwitchAddresses, polarity: Polarity) -> Result<Self, ConfigError> {
        let start = addresses.block_start().ok_or_else(|| {
            ConfigError::Validation(format!(
                "limit switch inputs must be {} distinct consecutive addresses, got {:?}",
                SWITCH_COUNT, addresses
            ))
        })?;
        Ok(SwitchInterpreter {
            addresses,
            polarity,
            start,
        })
    }

    /// Samples all four switches in one transaction so that both panels are
    /// seen at the same instant.
    pub fn read<B: Bus + ?Sized>(&self, bus: &mut B) -> Result<RoofPosition, BusFault> {
        let mut bits = [false; SWITCH_COUNT];
        let got = bus.read_discrete_inputs(self.start, &mut bits)?;
        if got < SWITCH_COUNT {
            return Err(BusFault::ShortRead {
                start: self.start,
                wanted: SWITCH_COUNT,
                got,
            });
        }

        let triggered = |address: u16| {
            let bit = bits[usize::from(address - self.start)];
            self.polarity.is_triggered(bit)
        };
        let a = &self.addresses;
        Ok(RoofPosition {
            north: PanelStatus::from_switches(triggered(a.north_open), triggered(a.north_closed)),
            south: PanelStatus::from_switches(triggered(a.south_open), triggered(a.south_closed)),
        })
    }
}
