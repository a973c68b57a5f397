//! A roll-off roof that only exists in memory.
//!
//! Each panel travels one step per switch read while a relay coil is held,
//! so a roof with `travel` steps opens in `travel` polls. Faults can be
//! injected to rehearse stuck switches and a failing link.

use crate::bus::{Bus, BusFault, CoilAddresses, SwitchAddresses};
use crate::panel::{Panel, Polarity};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadFault {
    /// The transaction fails outright.
    Error,
    /// Fewer inputs come back than were asked for.
    Short,
}

#[derive(Copy, Clone, Debug)]
struct PanelTravel {
    /// 0 is closed, `travel` is open.
    position: u32,
    travel: u32,
    /// Open switch stuck in the triggered state.
    stuck_open: bool,
}

impl PanelTravel {
    fn step(&mut self, open: bool, close: bool) {
        if open && !close && self.position < self.travel {
            self.position += 1;
        } else if close && !open && self.position > 0 {
            self.position -= 1;
        }
    }

    fn open_triggered(&self) -> bool {
        self.stuck_open || self.position == self.travel
    }

    fn closed_triggered(&self) -> bool {
        self.position == 0
    }
}

pub struct SimulatedRoof {
    switches: SwitchAddresses,
    coils: CoilAddresses,
    polarity: Polarity,
    north: PanelTravel,
    south: PanelTravel,
    open_coil: bool,
    close_coil: bool,
    read_fault: Option<ReadFault>,
    write_fault: bool,
    writes: usize,
    both_coils_seen: bool,
}

impl SimulatedRoof {
    /// A closed roof whose panels need `travel` polls to fully open.
    pub fn new(
        switches: SwitchAddresses,
        coils: CoilAddresses,
        polarity: Polarity,
        travel: u32,
    ) -> Self {
        let panel = PanelTravel {
            position: 0,
            travel: travel.max(1),
            stuck_open: false,
        };
        SimulatedRoof {
            switches,
            coils,
            polarity,
            north: panel,
            south: panel,
            open_coil: false,
            close_coil: false,
            read_fault: None,
            write_fault: false,
            writes: 0,
            both_coils_seen: false,
        }
    }

    fn panel_mut(&mut self, panel: Panel) -> &mut PanelTravel {
        match panel {
            Panel::North => &mut self.north,
            Panel::South => &mut self.south,
        }
    }

    /// Moves both panels to their open end stops, as if opened by hand.
    pub fn set_open(&mut self) {
        self.north.position = self.north.travel;
        self.south.position = self.south.travel;
    }

    pub fn set_closed(&mut self) {
        self.north.position = 0;
        self.south.position = 0;
    }

    /// Changes how many polls `panel` needs to travel end to end. The panel
    /// keeps its end stop if it was at one.
    pub fn set_travel(&mut self, panel: Panel, travel: u32) {
        let panel = self.panel_mut(panel);
        let was_open = panel.position == panel.travel;
        panel.travel = travel.max(1);
        panel.position = if was_open {
            panel.travel
        } else {
            panel.position.min(panel.travel)
        };
    }

    pub fn set_stuck_open(&mut self, panel: Panel, stuck: bool) {
        self.panel_mut(panel).stuck_open = stuck;
    }

    pub fn set_read_fault(&mut self, fault: Option<ReadFault>) {
        self.read_fault = fault;
    }

    pub fn set_write_fault(&mut self, failing: bool) {
        self.write_fault = failing;
    }

    pub fn open_coil(&self) -> bool {
        self.open_coil
    }

    pub fn close_coil(&self) -> bool {
        self.close_coil
    }

    /// Number of successful coil writes.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Whether both coils were ever asserted at the same time.
    pub fn both_coils_seen(&self) -> bool {
        self.both_coils_seen
    }

    fn input(&self, address: u16) -> bool {
        let s = &self.switches;
        let triggered = if address == s.north_open {
            self.north.open_triggered()
        } else if address == s.north_closed {
            self.north.closed_triggered()
        } else if address == s.south_open {
            self.south.open_triggered()
        } else if address == s.south_closed {
            self.south.closed_triggered()
        } else {
            false
        };
        self.polarity.level(triggered)
    }
}

impl Bus for SimulatedRoof {
    fn read_discrete_inputs(&mut self, start: u16, bits: &mut [bool]) -> Result<usize, BusFault> {
        let (open, close) = (self.open_coil, self.close_coil);
        self.north.step(open, close);
        self.south.step(open, close);

        match self.read_fault {
            Some(ReadFault::Error) => Err(BusFault::Read {
                start,
                count: bits.len(),
                detail: "simulated link failure".into(),
            }),
            Some(ReadFault::Short) => Ok(0),
            None => {
                for (offset, bit) in bits.iter_mut().enumerate() {
                    *bit = self.input(start.wrapping_add(offset as u16));
                }
                Ok(bits.len())
            }
        }
    }

    fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusFault> {
        if self.write_fault {
            return Err(BusFault::Write {
                address,
                detail: "simulated link failure".into(),
            });
        }
        if address == self.coils.open {
            self.open_coil = value;
        } else if address == self.coils.close {
            self.close_coil = value;
        }
        self.writes += 1;
        self.both_coils_seen |= self.open_coil && self.close_coil;
        Ok(())
    }
}
