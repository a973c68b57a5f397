//! Modbus-TCP access to the roof's PLC.

use std::net::ToSocketAddrs;

use log::info;
use tokio_modbus::client::sync::{self, Reader, Writer};
use tokio_modbus::Slave;

use crate::bus::{Bus, BusFault};
use crate::config::BusSettings;

pub struct ModbusTcp {
    ctx: sync::Context,
}

impl ModbusTcp {
    /// Connects to the controller. Every later transaction is bounded by the
    /// configured I/O timeout.
    pub fn connect(settings: &BusSettings) -> Result<ModbusTcp, BusFault> {
        let connect_err = |detail: String| BusFault::Connect {
            address: settings.address.clone(),
            detail,
        };
        let address = settings
            .address
            .to_socket_addrs()
            .map_err(|err| connect_err(err.to_string()))?
            .next()
            .ok_or_else(|| connect_err("address did not resolve".to_string()))?;
        let ctx = sync::tcp::connect_slave_with_timeout(
            address,
            Slave(settings.unit_id),
            Some(settings.io_timeout()),
        )
        .map_err(|err| connect_err(err.to_string()))?;
        info!("Modbus connected to {}", address);
        Ok(ModbusTcp { ctx })
    }
}

impl Bus for ModbusTcp {
    fn read_discrete_inputs(&mut self, start: u16, bits: &mut [bool]) -> Result<usize, BusFault> {
        let wanted = bits.len();
        let read_err = |detail: String| BusFault::Read {
            start,
            count: wanted,
            detail,
        };
        let count = u16::try_from(wanted).map_err(|_| read_err("too many inputs".into()))?;
        let values = match self.ctx.read_discrete_inputs(start, count) {
            Ok(Ok(values)) => values,
            Ok(Err(code)) => return Err(read_err(format!("exception {:?}", code))),
            Err(err) => return Err(read_err(err.to_string())),
        };
        let n = values.len().min(wanted);
        bits[..n].copy_from_slice(&values[..n]);
        Ok(n)
    }

    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusFault> {
        let write_err = |detail: String| BusFault::Write { address, detail };
        match self.ctx.write_single_coil(address, value) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(code)) => Err(write_err(format!("exception {:?}", code))),
            Err(err) => Err(write_err(err.to_string())),
        }
    }
}
