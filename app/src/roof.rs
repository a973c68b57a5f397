//! The roof motion state machine.
//!
//! [`Controller`] owns everything that changes while the roof is driven: the
//! commanded direction, the countdown, the last sampled panel position and
//! what it believes the relay coils are set to. It is driven from outside by
//! [`Controller::tick`] and the operator calls, all of which run to completion
//! on the caller's thread.

use std::fmt;
use std::mem;

use log::{debug, info};

use crate::bus::{Bus, CoilAddresses};
use crate::config::{Polling, MAX_MOTION_TIMEOUT_SECS};
use crate::error::{BusFault, Rejected};
use crate::events::{AbortReport, Event};
use crate::host::Host;
use crate::panel::{RoofPosition, SwitchInterpreter};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Open,
    Close,
}

impl Direction {
    pub fn verb(self) -> &'static str {
        match self {
            Direction::Open => "opening",
            Direction::Close => "closing",
        }
    }

    pub fn target(self) -> &'static str {
        match self {
            Direction::Open => "open",
            Direction::Close => "closed",
        }
    }

    /// Both panels have reached the end of travel for this direction.
    pub fn is_reached(self, position: &RoofPosition) -> bool {
        match self {
            Direction::Open => position.is_open(),
            Direction::Close => position.is_closed(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Open => f.write_str("Open"),
            Direction::Close => f.write_str("Close"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RoofState {
    Idle,
    Opening,
    Closing,
    /// The last request failed. Cleared by the next accepted request.
    Alert,
}

impl RoofState {
    fn moving(direction: Direction) -> Self {
        match direction {
            Direction::Open => RoofState::Opening,
            Direction::Close => RoofState::Closing,
        }
    }

    pub fn motion(self) -> Option<Direction> {
        match self {
            RoofState::Opening => Some(Direction::Open),
            RoofState::Closing => Some(Direction::Close),
            RoofState::Idle | RoofState::Alert => None,
        }
    }

    #[inline]
    pub fn is_busy(self) -> bool {
        self.motion().is_some()
    }
}

impl fmt::Display for RoofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoofState::Idle => f.write_str("Idle"),
            RoofState::Opening => f.write_str("Opening"),
            RoofState::Closing => f.write_str("Closing"),
            RoofState::Alert => f.write_str("Alert"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParkState {
    /// Closed by a completed close motion.
    Parked,
    Unparked,
    Unknown,
}

impl fmt::Display for ParkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParkState::Parked => f.write_str("Parked"),
            ParkState::Unparked => f.write_str("Unparked"),
            ParkState::Unknown => f.write_str("Unknown"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceState {
    Idle,
    Moving,
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Idle => f.write_str("Idle"),
            DeviceState::Moving => f.write_str("Moving"),
            DeviceState::Error => f.write_str("Error"),
        }
    }
}

/// What we last wrote to a relay coil.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoilLevel {
    Cleared,
    Asserted,
    /// Never written, or the last write failed.
    Unknown,
}

impl fmt::Display for CoilLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoilLevel::Cleared => f.write_str("Cleared"),
            CoilLevel::Asserted => f.write_str("Asserted"),
            CoilLevel::Unknown => f.write_str("Unknown"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CoilState {
    pub open: CoilLevel,
    pub close: CoilLevel,
}

impl CoilState {
    pub const UNKNOWN: CoilState = CoilState {
        open: CoilLevel::Unknown,
        close: CoilLevel::Unknown,
    };

    pub fn needs_clearing(&self) -> bool {
        self.open != CoilLevel::Cleared || self.close != CoilLevel::Cleared
    }

    pub fn both_asserted(&self) -> bool {
        self.open == CoilLevel::Asserted && self.close == CoilLevel::Asserted
    }

    fn level_mut(&mut self, coil: Direction) -> &mut CoilLevel {
        match coil {
            Direction::Open => &mut self.open,
            Direction::Close => &mut self.close,
        }
    }
}

/// Result of an accepted motion request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Motion {
    Started(Direction),
    /// The roof was already moving, so the request stopped it.
    Stopped(AbortOutcome),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AbortOutcome {
    AlreadyStationary,
    Aborted(Direction),
}

/// Point-in-time view of the controller for status reporting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub connected: bool,
    pub state: RoofState,
    pub device: DeviceState,
    pub park: ParkState,
    pub position: RoofPosition,
    pub coils: CoilState,
    pub time_left: u32,
    pub motion_timeout: u32,
    pub locked: bool,
}

pub struct Controller<B, H> {
    bus: B,
    host: H,
    switches: SwitchInterpreter,
    coil_addresses: CoilAddresses,
    polling: Polling,
    motion_timeout: u32,
    connected: bool,
    state: RoofState,
    device: DeviceState,
    park: ParkState,
    position: RoofPosition,
    coils: CoilState,
    /// The last relay clear failed; keep polling fast until one succeeds.
    clear_pending: bool,
    time_left: u32,
}

impl<B: Bus, H: Host> Controller<B, H> {
    pub fn new(
        bus: B,
        host: H,
        switches: SwitchInterpreter,
        coil_addresses: CoilAddresses,
        polling: Polling,
        motion_timeout: u32,
    ) -> Self {
        Controller {
            bus,
            host,
            switches,
            coil_addresses,
            polling,
            motion_timeout,
            connected: false,
            state: RoofState::Idle,
            device: DeviceState::Idle,
            park: ParkState::Unknown,
            position: RoofPosition::UNKNOWN,
            coils: CoilState::UNKNOWN,
            clear_pending: false,
            time_left: 0,
        }
    }

    pub fn state(&self) -> RoofState {
        self.state
    }

    pub fn device_state(&self) -> DeviceState {
        self.device
    }

    pub fn park_state(&self) -> ParkState {
        self.park
    }

    pub fn position(&self) -> RoofPosition {
        self.position
    }

    pub fn coils(&self) -> CoilState {
        self.coils
    }

    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    pub fn motion_timeout(&self) -> u32 {
        self.motion_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connected: self.connected,
            state: self.state,
            device: self.device,
            park: self.park,
            position: self.position,
            coils: self.coils,
            time_left: self.time_left,
            motion_timeout: self.motion_timeout,
            locked: self.host.is_locked(),
        }
    }

    /// Starts polling and reconciles the switches with the park state the
    /// roof was last left in. A roof last parked but no longer closed is
    /// taken to be opening under some other control, and vice versa.
    pub fn connect(&mut self, last_park: ParkState) {
        self.connected = true;
        self.host.notify(Event::Connected);

        let position = self.check_status();
        if !position.is_fault() {
            match last_park {
                ParkState::Parked if !position.is_closed() => self.observe_motion(Direction::Open),
                ParkState::Unparked if !position.is_open() => self.observe_motion(Direction::Close),
                _ if position.is_closed() => self.set_park(ParkState::Parked),
                _ if position.is_open() => self.set_park(ParkState::Unparked),
                _ => self.set_park(last_park),
            }
        }
        self.reschedule();
    }

    /// Clears both relays and stops polling. The device stays connected if
    /// the relays cannot be cleared.
    pub fn disconnect(&mut self) -> Result<(), BusFault> {
        self.clear_coils()?;
        self.connected = false;
        self.state = RoofState::Idle;
        self.time_left = 0;
        self.position = RoofPosition::UNKNOWN;
        self.host.notify(Event::Disconnected);
        Ok(())
    }

    /// Whether [`Controller::set_motion_timeout`] would accept `secs` now.
    pub fn check_motion_timeout(&self, secs: u32) -> Result<(), Rejected> {
        if self.state.is_busy() {
            return Err(Rejected::MotionActive);
        }
        if secs > MAX_MOTION_TIMEOUT_SECS {
            return Err(Rejected::TimeoutOutOfRange(secs));
        }
        Ok(())
    }

    pub fn set_motion_timeout(&mut self, secs: u32) -> Result<(), Rejected> {
        self.check_motion_timeout(secs)?;
        self.motion_timeout = secs;
        self.host.notify(Event::TimeoutChanged(secs));
        Ok(())
    }

    /// Samples the limit switches, reporting any change. A failed read
    /// yields [`RoofPosition::FAULT`].
    pub fn check_status(&mut self) -> RoofPosition {
        self.poll().unwrap_or(RoofPosition::FAULT)
    }

    /// Drives the roof towards `direction`. A request while the roof is
    /// already moving stops it instead.
    pub fn request_motion(&mut self, direction: Direction) -> Result<Motion, Rejected> {
        if !self.connected {
            return Err(self.reject(direction, Rejected::NotConnected));
        }
        if self.motion_timeout == 0 {
            return Err(self.reject(direction, Rejected::NoTimeoutConfigured));
        }

        let polled = self.poll();
        if self.state.is_busy() {
            return self
                .abort_at(polled)
                .map(Motion::Stopped)
                .map_err(Rejected::Bus);
        }

        let position = match polled {
            Ok(position) => position,
            Err(fault) => return Err(self.reject(direction, fault.into())),
        };
        if direction.is_reached(&position) {
            return Err(self.reject(direction, Rejected::AlreadyAtTarget(direction)));
        }
        if direction == Direction::Close && self.host.is_locked() {
            return Err(self.reject(direction, Rejected::Locked));
        }
        if let Err(fault) = self.drive(direction) {
            return Err(self.reject(direction, fault.into()));
        }

        self.state = RoofState::moving(direction);
        self.time_left = self.motion_timeout;
        self.set_device(DeviceState::Moving);
        self.host.notify(Event::MotionAccepted(direction));
        self.host.reschedule(self.polling.moving());
        Ok(Motion::Started(direction))
    }

    /// Closes the roof.
    pub fn park(&mut self) -> Result<Motion, Rejected> {
        let motion = self.request_motion(Direction::Close)?;
        if let Motion::Started(_) = motion {
            info!("roll-off roof is parking...");
        }
        Ok(motion)
    }

    /// Opens the roof.
    pub fn unpark(&mut self) -> Result<Motion, Rejected> {
        let motion = self.request_motion(Direction::Open)?;
        if let Motion::Started(_) = motion {
            info!("roll-off roof is unparking...");
        }
        Ok(motion)
    }

    pub fn stop(&mut self) -> Result<AbortOutcome, BusFault> {
        self.abort()
    }

    /// Stops any motion by clearing both relays. Safe to repeat.
    ///
    /// While the roof is idle a failed switch read is returned as an error
    /// and nothing is written. A moving roof always has its relays cleared.
    pub fn abort(&mut self) -> Result<AbortOutcome, BusFault> {
        let polled = self.poll();
        self.abort_at(polled)
    }

    /// One scheduling period: sample the switches, advance any motion and
    /// pick the next polling interval.
    pub fn tick(&mut self) {
        if !self.connected {
            return;
        }

        let position = self.check_status();
        match self.state.motion() {
            Some(direction) => {
                if direction.is_reached(&position) {
                    self.complete(direction);
                } else if self.time_left == 0 {
                    // The coil stays asserted until an operator aborts.
                    self.host.notify(Event::MotionTimedOut(direction));
                } else {
                    self.time_left -= 1;
                }
            }
            None if position.is_fault() => {}
            None => {
                if self.coils.needs_clearing() {
                    debug!("clearing stray relay flags");
                    let device = match self.clear_coils() {
                        Ok(()) => DeviceState::Idle,
                        Err(_) => DeviceState::Error,
                    };
                    self.set_device(device);
                } else {
                    self.set_device(DeviceState::Idle);
                }
            }
        }
        self.reschedule();
    }

    /// The panels reached their end stops. The motion only counts as a
    /// success once both relays are known to be clear.
    fn complete(&mut self, direction: Direction) {
        self.time_left = 0;
        self.set_park(match direction {
            Direction::Open => ParkState::Unparked,
            Direction::Close => ParkState::Parked,
        });
        match self.clear_coils() {
            Ok(()) => {
                self.state = RoofState::Idle;
                self.set_device(DeviceState::Idle);
                self.host.notify(Event::MotionSucceeded(direction));
            }
            // The failed write has already been reported as a bus fault.
            Err(_) => {
                self.state = RoofState::Alert;
                self.set_device(DeviceState::Error);
            }
        }
    }

    fn abort_at(
        &mut self,
        polled: Result<RoofPosition, BusFault>,
    ) -> Result<AbortOutcome, BusFault> {
        let motion = self.state.motion();
        let position = match polled {
            Ok(position) => position,
            Err(fault) if motion.is_none() => {
                self.report(AbortReport::PositionUnknown);
                return Err(fault);
            }
            Err(_) => RoofPosition::FAULT,
        };
        let opened = position.is_open();
        let closed = position.is_closed();

        let result = match motion {
            None if closed => {
                self.report(AbortReport::AlreadyClosed);
                return Ok(AbortOutcome::AlreadyStationary);
            }
            None if opened => {
                self.report(AbortReport::AlreadyOpen);
                return Ok(AbortOutcome::AlreadyStationary);
            }
            None => {
                self.report(AbortReport::PartiallyOpen);
                self.clear_coils()
                    .map(|()| AbortOutcome::AlreadyStationary)
            }
            Some(direction) => {
                self.report(AbortReport::Stopped(direction));
                self.clear_coils().map(|()| AbortOutcome::Aborted(direction))
            }
        };

        match &result {
            Ok(_) => {
                self.state = RoofState::Idle;
                self.time_left = 0;
                self.set_device(DeviceState::Idle);
            }
            Err(fault) => {
                self.state = RoofState::Alert;
                self.set_device(DeviceState::Error);
                self.report(AbortReport::Failed(fault.clone()));
            }
        }

        if !opened && !closed {
            self.set_park(ParkState::Unknown);
            if !position.is_fault() {
                self.host.notify(Event::AmbiguousPosition(position));
            }
        }
        result
    }

    fn observe_motion(&mut self, direction: Direction) {
        self.state = RoofState::moving(direction);
        self.time_left = self.motion_timeout;
        self.set_device(DeviceState::Moving);
        self.host.notify(Event::MotionObserved(direction));
    }

    fn reject(&mut self, direction: Direction, reason: Rejected) -> Rejected {
        if self.connected {
            self.state = RoofState::Alert;
        }
        self.host.notify(Event::MotionRejected {
            direction,
            reason: reason.clone(),
        });
        reason
    }

    fn report(&mut self, report: AbortReport) {
        self.host.notify(Event::Abort(report));
    }

    fn reschedule(&mut self) {
        let interval = if self.state.is_busy() || self.clear_pending {
            self.polling.moving()
        } else {
            self.polling.idle()
        };
        self.host.reschedule(interval);
    }

    fn poll(&mut self) -> Result<RoofPosition, BusFault> {
        let result = self.switches.read(&mut self.bus);
        let current = *result.as_ref().unwrap_or(&RoofPosition::FAULT);
        if current != self.position {
            let previous = mem::replace(&mut self.position, current);
            self.host
                .notify(Event::PanelStatusChanged { previous, current });
        }
        if let Err(fault) = &result {
            self.host.notify(Event::BusFault(fault.clone()));
        }
        result
    }

    /// Clear-then-set, so the two coils are never asserted together.
    fn drive(&mut self, direction: Direction) -> Result<(), BusFault> {
        self.clear_coils()?;
        self.write_coil(direction, true)
    }

    /// Attempts both coils even if the first write fails.
    fn clear_coils(&mut self) -> Result<(), BusFault> {
        let open = self.write_coil(Direction::Open, false);
        let close = self.write_coil(Direction::Close, false);
        let result = open.and(close);
        self.clear_pending = result.is_err();
        result
    }

    fn write_coil(&mut self, coil: Direction, value: bool) -> Result<(), BusFault> {
        let address = match coil {
            Direction::Open => self.coil_addresses.open,
            Direction::Close => self.coil_addresses.close,
        };
        match self.bus.write_coil(address, value) {
            Ok(()) => {
                *self.coils.level_mut(coil) = if value {
                    CoilLevel::Asserted
                } else {
                    CoilLevel::Cleared
                };
                Ok(())
            }
            Err(fault) => {
                *self.coils.level_mut(coil) = CoilLevel::Unknown;
                self.host.notify(Event::BusFault(fault.clone()));
                Err(fault)
            }
        }
    }

    fn set_park(&mut self, park: ParkState) {
        if self.park != park {
            self.park = park;
            self.host.notify(Event::ParkChanged(park));
        }
    }

    fn set_device(&mut self, device: DeviceState) {
        if self.device != device {
            self.device = device;
            self.host.notify(Event::DeviceStateChanged(device));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::SwitchAddresses;
    use crate::panel::{PanelStatus, Polarity};

    // Input levels in address order: south open, south closed, north closed,
    // north open. Triggered switches read low.
    const OPEN: [bool; 4] = [false, true, true, false];
    const CLOSED: [bool; 4] = [true, false, false, true];
    const MOVING: [bool; 4] = [true, true, true, true];

    const OPEN_COIL: u16 = 8256;
    const CLOSE_COIL: u16 = 8257;

    #[derive(Default)]
    struct FakeBus {
        inputs: [bool; 4],
        short_read: bool,
        failing_coil: Option<u16>,
        writes: Vec<(u16, bool)>,
    }

    impl Bus for FakeBus {
        fn read_discrete_inputs(&mut self, _start: u16, bits: &mut [bool]) -> Result<usize, BusFault> {
            if self.short_read {
                bits[0] = self.inputs[0];
                return Ok(1);
            }
            bits.copy_from_slice(&self.inputs);
            Ok(bits.len())
        }

        fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusFault> {
            if self.failing_coil == Some(address) {
                return Err(BusFault::Write {
                    address,
                    detail: "no response".into(),
                });
            }
            self.writes.push((address, value));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        events: Vec<Event>,
        schedule: Vec<Duration>,
        locked: bool,
    }

    impl RecordingHost {
        fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
            self.events.iter().filter(|event| f(event)).count()
        }
    }

    impl Host for RecordingHost {
        fn reschedule(&mut self, interval: Duration) {
            self.schedule.push(interval);
        }

        fn notify(&mut self, event: Event) {
            self.events.push(event);
        }

        fn is_locked(&self) -> bool {
            self.locked
        }
    }

    type TestController = Controller<FakeBus, RecordingHost>;

    fn controller(inputs: [bool; 4], timeout: u32) -> TestController {
        let switches =
            SwitchInterpreter::new(SwitchAddresses::default(), Polarity::ActiveLow).unwrap();
        let bus = FakeBus {
            inputs,
            ..FakeBus::default()
        };
        let mut controller = Controller::new(
            bus,
            RecordingHost::default(),
            switches,
            CoilAddresses::default(),
            Polling::default(),
            timeout,
        );
        controller.connect(ParkState::Unknown);
        controller
    }

    fn opening(timeout: u32) -> TestController {
        let mut controller = controller(MOVING, timeout);
        controller.request_motion(Direction::Open).unwrap();
        controller.bus_mut().writes.clear();
        controller
    }

    #[test]
    fn connect_derives_park_state() {
        assert_eq!(controller(CLOSED, 60).park_state(), ParkState::Parked);
        assert_eq!(controller(OPEN, 60).park_state(), ParkState::Unparked);
        assert_eq!(controller(MOVING, 60).park_state(), ParkState::Unknown);
    }

    #[test]
    fn connect_resumes_motion_left_by_parked_roof() {
        let switches =
            SwitchInterpreter::new(SwitchAddresses::default(), Polarity::ActiveLow).unwrap();
        let bus = FakeBus {
            inputs: MOVING,
            ..FakeBus::default()
        };
        let mut controller = Controller::new(
            bus,
            RecordingHost::default(),
            switches,
            CoilAddresses::default(),
            Polling::default(),
            45,
        );
        controller.connect(ParkState::Parked);
        assert_eq!(controller.state(), RoofState::Opening);
        assert_eq!(controller.time_left(), 45);
        assert_eq!(controller.host().schedule.last(), Some(&Duration::from_secs(1)));
        assert!(controller.bus_mut().writes.is_empty());
    }

    #[test]
    fn open_asserts_only_the_open_coil() {
        let mut controller = controller(CLOSED, 60);
        assert_eq!(
            controller.request_motion(Direction::Open),
            Ok(Motion::Started(Direction::Open))
        );
        assert_eq!(
            controller.bus_mut().writes,
            vec![(OPEN_COIL, false), (CLOSE_COIL, false), (OPEN_COIL, true)]
        );
        assert_eq!(controller.state(), RoofState::Opening);
        assert_eq!(controller.device_state(), DeviceState::Moving);
        assert_eq!(controller.time_left(), 60);
        assert_eq!(controller.host().schedule.last(), Some(&Duration::from_secs(1)));
        assert_eq!(
            controller.coils(),
            CoilState {
                open: CoilLevel::Asserted,
                close: CoilLevel::Cleared
            }
        );
    }

    #[test]
    fn motion_needs_a_timeout() {
        let mut controller = controller(CLOSED, 0);
        assert_eq!(
            controller.request_motion(Direction::Open),
            Err(Rejected::NoTimeoutConfigured)
        );
        assert!(controller.bus_mut().writes.is_empty());
        assert_eq!(controller.state(), RoofState::Alert);
    }

    #[test]
    fn already_open() {
        let mut controller = controller(OPEN, 60);
        assert_eq!(
            controller.request_motion(Direction::Open),
            Err(Rejected::AlreadyAtTarget(Direction::Open))
        );
        assert!(controller.bus_mut().writes.is_empty());
    }

    #[test]
    fn close_refused_while_locked() {
        let mut controller = controller(OPEN, 60);
        controller.host_mut().locked = true;
        assert_eq!(controller.request_motion(Direction::Close), Err(Rejected::Locked));
        assert!(controller.bus_mut().writes.is_empty());

        // opening is not affected by the interlock
        controller.bus_mut().inputs = CLOSED;
        assert!(controller.request_motion(Direction::Open).is_ok());
    }

    #[test]
    fn alert_is_cleared_by_the_next_accepted_request() {
        let mut controller = controller(OPEN, 60);
        let _ = controller.request_motion(Direction::Open);
        assert_eq!(controller.state(), RoofState::Alert);
        controller.request_motion(Direction::Close).unwrap();
        assert_eq!(controller.state(), RoofState::Closing);
    }

    #[test]
    fn opening_completes_when_both_panels_open() {
        let mut controller = opening(60);
        controller.tick();
        assert_eq!(controller.time_left(), 59);

        controller.bus_mut().inputs = OPEN;
        controller.tick();
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.park_state(), ParkState::Unparked);
        assert_eq!(controller.time_left(), 0);
        assert_eq!(
            controller.bus_mut().writes,
            vec![(OPEN_COIL, false), (CLOSE_COIL, false)]
        );
        assert_eq!(controller.host().schedule.last(), Some(&Duration::from_secs(300)));
        assert_eq!(
            controller
                .host()
                .count(|e| *e == Event::MotionSucceeded(Direction::Open)),
            1
        );
    }

    #[test]
    fn one_panel_open_is_not_enough() {
        let mut controller = opening(60);
        controller.bus_mut().inputs = [true, true, true, false];
        controller.tick();
        assert_eq!(controller.state(), RoofState::Opening);
        assert!(controller.bus_mut().writes.is_empty());
    }

    #[test]
    fn closing_completes_and_parks() {
        let mut controller = controller(OPEN, 60);
        controller.request_motion(Direction::Close).unwrap();
        controller.bus_mut().inputs = CLOSED;
        controller.tick();
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.park_state(), ParkState::Parked);
        assert!(!controller.coils().needs_clearing());
    }

    #[test]
    fn timeout_is_reported_but_not_acted_on() {
        let mut controller = opening(2);
        controller.tick();
        controller.tick();
        assert_eq!(controller.time_left(), 0);
        assert_eq!(
            controller.host().count(|e| matches!(e, Event::MotionTimedOut(_))),
            0
        );

        for n in 1..=3 {
            controller.tick();
            assert_eq!(
                controller.host().count(|e| matches!(e, Event::MotionTimedOut(_))),
                n
            );
        }
        assert_eq!(controller.state(), RoofState::Opening);
        assert_eq!(controller.coils().open, CoilLevel::Asserted);
        assert!(controller.bus_mut().writes.is_empty());
        assert_eq!(controller.host().schedule.last(), Some(&Duration::from_secs(1)));
    }

    #[test]
    fn short_read_faults_both_panels_without_writing() {
        let mut controller = controller(MOVING, 60);
        controller.bus_mut().short_read = true;
        controller.tick();
        assert_eq!(controller.position().north, PanelStatus::Fault);
        assert_eq!(controller.position().south, PanelStatus::Fault);

        assert!(matches!(
            controller.request_motion(Direction::Open),
            Err(Rejected::Bus(BusFault::ShortRead { .. }))
        ));
        assert!(controller.bus_mut().writes.is_empty());
    }

    #[test]
    fn idle_tick_clears_unknown_coils_once() {
        let mut controller = controller(CLOSED, 60);
        controller.tick();
        controller.tick();
        assert_eq!(
            controller.bus_mut().writes,
            vec![(OPEN_COIL, false), (CLOSE_COIL, false)]
        );
    }

    #[test]
    fn abort_when_closed_is_a_no_op() {
        let mut controller = controller(CLOSED, 60);
        assert_eq!(controller.abort(), Ok(AbortOutcome::AlreadyStationary));
        assert_eq!(controller.abort(), Ok(AbortOutcome::AlreadyStationary));
        assert!(controller.bus_mut().writes.is_empty());
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.park_state(), ParkState::Parked);
    }

    #[test]
    fn abort_stops_motion() {
        let mut controller = opening(60);
        controller.host_mut().events.clear();
        assert_eq!(controller.abort(), Ok(AbortOutcome::Aborted(Direction::Open)));
        assert_eq!(
            controller.bus_mut().writes,
            vec![(OPEN_COIL, false), (CLOSE_COIL, false)]
        );
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.device_state(), DeviceState::Idle);
        assert_eq!(controller.park_state(), ParkState::Unknown);
        assert_eq!(
            controller
                .host()
                .count(|e| matches!(e, Event::AmbiguousPosition(_))),
            1
        );
    }

    #[test]
    fn abort_in_mid_travel_resets_park_state() {
        let mut controller = controller(CLOSED, 60);
        controller.request_motion(Direction::Open).unwrap();
        assert_eq!(controller.park_state(), ParkState::Parked);
        controller.bus_mut().inputs = MOVING;
        controller.abort().unwrap();
        assert_eq!(controller.park_state(), ParkState::Unknown);
    }

    #[test]
    fn second_request_while_moving_aborts() {
        let mut controller = opening(60);
        assert_eq!(
            controller.request_motion(Direction::Close),
            Ok(Motion::Stopped(AbortOutcome::Aborted(Direction::Open)))
        );
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.coils().close, CoilLevel::Cleared);
    }

    #[test]
    fn failed_abort_is_an_error_state() {
        let mut controller = opening(60);
        controller.bus_mut().failing_coil = Some(OPEN_COIL);
        assert!(controller.abort().is_err());
        assert_eq!(controller.device_state(), DeviceState::Error);
        assert_eq!(controller.state(), RoofState::Alert);
        assert_eq!(controller.coils().open, CoilLevel::Unknown);
        // the other coil is still cleared
        assert_eq!(controller.bus_mut().writes, vec![(CLOSE_COIL, false)]);

        controller.bus_mut().failing_coil = None;
        controller.tick();
        assert_eq!(controller.device_state(), DeviceState::Idle);
        assert!(!controller.coils().needs_clearing());
    }

    #[test]
    fn failed_clear_on_arrival_keeps_polling_fast() {
        let mut controller = opening(60);
        controller.bus_mut().inputs = OPEN;
        controller.bus_mut().failing_coil = Some(OPEN_COIL);
        controller.tick();
        assert_eq!(controller.state(), RoofState::Alert);
        assert_eq!(controller.device_state(), DeviceState::Error);
        assert_eq!(controller.coils().open, CoilLevel::Unknown);
        assert_eq!(controller.park_state(), ParkState::Unparked);
        assert_eq!(
            controller.host().count(|e| matches!(e, Event::MotionSucceeded(_))),
            0
        );
        assert_eq!(controller.host().schedule.last(), Some(&Duration::from_secs(1)));

        controller.bus_mut().failing_coil = None;
        controller.tick();
        assert!(!controller.coils().needs_clearing());
        assert_eq!(controller.device_state(), DeviceState::Idle);
        assert_eq!(controller.host().schedule.last(), Some(&Duration::from_secs(300)));
    }

    #[test]
    fn failed_idle_clear_is_an_error_state() {
        let mut controller = controller(CLOSED, 60);
        controller.bus_mut().failing_coil = Some(CLOSE_COIL);
        controller.tick();
        assert_eq!(controller.device_state(), DeviceState::Error);
        assert_eq!(controller.coils().close, CoilLevel::Unknown);
        assert_eq!(controller.host().schedule.last(), Some(&Duration::from_secs(1)));
    }

    #[test]
    fn completes_on_the_last_second() {
        let mut controller = opening(1);
        controller.bus_mut().inputs = OPEN;
        controller.tick();
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.park_state(), ParkState::Unparked);
        assert_eq!(controller.time_left(), 0);
        assert_eq!(
            controller.bus_mut().writes,
            vec![(OPEN_COIL, false), (CLOSE_COIL, false)]
        );
    }

    #[test]
    fn arrival_after_expiry_still_completes() {
        let mut controller = opening(1);
        controller.tick();
        controller.tick();
        assert_eq!(
            controller.host().count(|e| matches!(e, Event::MotionTimedOut(_))),
            1
        );

        controller.bus_mut().inputs = OPEN;
        controller.tick();
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.park_state(), ParkState::Unparked);
        assert!(!controller.coils().needs_clearing());
        assert_eq!(
            controller.host().count(|e| matches!(e, Event::MotionTimedOut(_))),
            1
        );
        assert_eq!(
            controller
                .host()
                .count(|e| *e == Event::MotionSucceeded(Direction::Open)),
            1
        );
    }

    #[test]
    fn abort_after_short_read_while_idle_writes_nothing() {
        let mut controller = controller(MOVING, 60);
        controller.bus_mut().short_read = true;
        assert!(matches!(
            controller.abort(),
            Err(BusFault::ShortRead { .. })
        ));
        assert!(controller.bus_mut().writes.is_empty());
        assert_eq!(controller.position(), RoofPosition::FAULT);
        assert_eq!(
            controller
                .host()
                .count(|e| *e == Event::Abort(AbortReport::PositionUnknown)),
            1
        );
        assert_eq!(
            controller
                .host()
                .count(|e| *e == Event::Abort(AbortReport::PartiallyOpen)),
            0
        );
    }

    #[test]
    fn abort_after_short_read_while_moving_still_clears() {
        let mut controller = opening(60);
        controller.bus_mut().short_read = true;
        assert_eq!(controller.abort(), Ok(AbortOutcome::Aborted(Direction::Open)));
        assert_eq!(
            controller.bus_mut().writes,
            vec![(OPEN_COIL, false), (CLOSE_COIL, false)]
        );
        assert_eq!(controller.state(), RoofState::Idle);
        assert_eq!(controller.park_state(), ParkState::Unknown);
        assert_eq!(
            controller
                .host()
                .count(|e| matches!(e, Event::AmbiguousPosition(_))),
            0
        );
    }

    #[test]
    fn stop_aborts_and_repeats_safely() {
        let mut controller = opening(60);
        assert_eq!(controller.stop(), Ok(AbortOutcome::Aborted(Direction::Open)));
        assert_eq!(controller.stop(), Ok(AbortOutcome::AlreadyStationary));
        assert_eq!(controller.state(), RoofState::Idle);
    }

    #[test]
    fn failed_coil_write_rejects_motion() {
        let mut controller = controller(CLOSED, 60);
        controller.bus_mut().failing_coil = Some(OPEN_COIL);
        assert!(matches!(
            controller.request_motion(Direction::Open),
            Err(Rejected::Bus(BusFault::Write { address: OPEN_COIL, .. }))
        ));
        assert_eq!(controller.state(), RoofState::Alert);
        assert!(!controller.bus_mut().writes.contains(&(OPEN_COIL, true)));
    }

    #[test]
    fn timeout_cannot_change_during_motion() {
        let mut controller = opening(60);
        assert_eq!(controller.set_motion_timeout(30), Err(Rejected::MotionActive));
        controller.abort().unwrap();
        assert_eq!(controller.set_motion_timeout(151), Err(Rejected::TimeoutOutOfRange(151)));
        assert_eq!(controller.set_motion_timeout(30), Ok(()));
        assert_eq!(controller.motion_timeout(), 30);
    }

    #[test]
    fn disconnect_clears_coils_and_stops_ticking() {
        let mut controller = opening(60);
        controller.disconnect().unwrap();
        assert_eq!(
            controller.bus_mut().writes,
            vec![(OPEN_COIL, false), (CLOSE_COIL, false)]
        );
        assert!(!controller.is_connected());
        assert_eq!(controller.state(), RoofState::Idle);

        let scheduled = controller.host().schedule.len();
        controller.tick();
        assert_eq!(controller.host().schedule.len(), scheduled);
        assert_eq!(
            controller.request_motion(Direction::Open),
            Err(Rejected::NotConnected)
        );
    }

    #[test]
    fn disconnect_refused_when_coils_cannot_be_cleared() {
        let mut controller = opening(60);
        controller.bus_mut().failing_coil = Some(CLOSE_COIL);
        assert!(controller.disconnect().is_err());
        assert!(controller.is_connected());
    }

    #[test]
    fn park_and_unpark() {
        let mut controller = controller(CLOSED, 60);
        assert_eq!(controller.unpark(), Ok(Motion::Started(Direction::Open)));
        controller.bus_mut().inputs = OPEN;
        controller.tick();
        assert_eq!(controller.park(), Ok(Motion::Started(Direction::Close)));
        assert_eq!(controller.state(), RoofState::Closing);
    }
}
