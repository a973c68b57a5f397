//! Field-bus access and the register map of the roof controller.
//!
//! The motion controller only ever needs two transactions: a block read of the
//! four limit-switch inputs and a single-coil write. Everything about framing
//! and transport lives behind [`Bus`].

use serde::{Deserialize, Serialize};

pub use crate::error::BusFault;

/// Number of discrete inputs wired to the roof limit switches.
pub const SWITCH_COUNT: usize = 4;

/// Synchronous field-bus transactions. Both calls may block on I/O and must be
/// bounded by an I/O timeout in the implementation.
pub trait Bus {
    /// Reads `bits.len()` consecutive discrete inputs starting at `start`
    /// into `bits`, returning how many were actually filled.
    fn read_discrete_inputs(&mut self, start: u16, bits: &mut [bool]) -> Result<usize, BusFault>;

    /// Writes a single coil.
    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusFault>;
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn read_discrete_inputs(&mut self, start: u16, bits: &mut [bool]) -> Result<usize, BusFault> {
        (**self).read_discrete_inputs(start, bits)
    }

    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusFault> {
        (**self).write_coil(address, value)
    }
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn read_discrete_inputs(&mut self, start: u16, bits: &mut [bool]) -> Result<usize, BusFault> {
        (**self).read_discrete_inputs(start, bits)
    }

    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusFault> {
        (**self).write_coil(address, value)
    }
}

/// Discrete input addresses of the four limit switches.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchAddresses {
    pub south_open: u16,
    pub south_closed: u16,
    pub north_closed: u16,
    pub north_open: u16,
}

impl Default for SwitchAddresses {
    fn default() -> Self {
        SwitchAddresses {
            south_open: 0,
            south_closed: 1,
            north_closed: 2,
            north_open: 3,
        }
    }
}

impl SwitchAddresses {
    fn all(&self) -> [u16; SWITCH_COUNT] {
        [
            self.south_open,
            self.south_closed,
            self.north_closed,
            self.north_open,
        ]
    }

    /// First address of the block, provided the four switches occupy one
    /// contiguous block of distinct inputs.
    pub fn block_start(&self) -> Option<u16> {
        let mut addresses = self.all();
        addresses.sort_unstable();
        let start = addresses[0];
        let contiguous = addresses
            .iter()
            .enumerate()
            .all(|(i, &addr)| u32::from(addr) == u32::from(start) + i as u32);
        if contiguous {
            Some(start)
        } else {
            None
        }
    }
}

/// Coil addresses driving the roof relays.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoilAddresses {
    pub open: u16,
    pub close: u16,
}

impl Default for CoilAddresses {
    fn default() -> Self {
        // LOGO! M1 and M2 flags
        CoilAddresses {
            open: 8256,
            close: 8257,
        }
    }
}
