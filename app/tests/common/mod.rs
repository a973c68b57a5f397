use std::time::Duration;

use rolloff_roof::bus::{CoilAddresses, SwitchAddresses};
use rolloff_roof::config::Polling;
use rolloff_roof::panel::{Polarity, SwitchInterpreter};
use rolloff_roof::roof::ParkState;
use rolloff_roof::sim::SimulatedRoof;
use rolloff_roof::{Controller, Event, Host};

#[derive(Default)]
pub struct RecordingHost {
    pub events: Vec<Event>,
    pub intervals: Vec<Duration>,
    pub locked: bool,
}

#[allow(dead_code)]
impl RecordingHost {
    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|event| f(event)).count()
    }
}

impl Host for RecordingHost {
    fn reschedule(&mut self, interval: Duration) {
        self.intervals.push(interval);
    }

    fn notify(&mut self, event: Event) {
        self.events.push(event);
    }

    fn is_locked(&self) -> bool {
        self.locked
    }
}

pub type Roof = Controller<SimulatedRoof, RecordingHost>;

/// A connected controller on a closed simulated roof whose panels take
/// `travel` polls to move end to end.
pub fn closed_roof(travel: u32, timeout: u32) -> Roof {
    let switches = SwitchAddresses::default();
    let sim = SimulatedRoof::new(switches, CoilAddresses::default(), Polarity::ActiveLow, travel);
    let mut roof = Controller::new(
        sim,
        RecordingHost::default(),
        SwitchInterpreter::new(switches, Polarity::ActiveLow).unwrap(),
        CoilAddresses::default(),
        Polling::default(),
        timeout,
    );
    roof.connect(ParkState::Unknown);
    roof
}
