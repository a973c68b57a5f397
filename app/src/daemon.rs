//! The control thread: owns the roof controller, drives its ticks and
//! carries out operator commands between them.

use std::fmt;
use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use log::{error, info, log};

use crate::bus::Bus;
use crate::config::Settings;
use crate::error::CommandError;
use crate::events::Event;
use crate::host::Host;
use crate::roof::{AbortOutcome, Controller, Motion};
use crate::Status;

/// Longest the loop sleeps before checking for termination.
const MAX_WAIT: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Open,
    Close,
    Abort,
    Stop,
    Lock,
    Unlock,
    SetTimeout(u32),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Motion(Motion),
    Abort(AbortOutcome),
    Locked(bool),
    TimeoutSet(u32),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Motion(Motion::Started(direction)) => write!(f, "roof {}", direction.verb()),
            Outcome::Motion(Motion::Stopped(abort)) | Outcome::Abort(abort) => match abort {
                AbortOutcome::AlreadyStationary => f.write_str("roof is stationary"),
                AbortOutcome::Aborted(direction) => {
                    write!(f, "{} aborted", direction.verb())
                }
            },
            Outcome::Locked(true) => f.write_str("interlock engaged"),
            Outcome::Locked(false) => f.write_str("interlock released"),
            Outcome::TimeoutSet(secs) => write!(f, "motion timeout set to {}s", secs),
        }
    }
}

pub type Reply = Result<Outcome, CommandError>;

pub struct Request {
    pub command: Command,
    pub reply: Sender<Reply>,
}

/// [`Host`] for the daemon: a tick deadline, the interlock flag, and a log
/// of events waiting to be published.
pub struct DaemonHost {
    next_tick: Instant,
    locked: bool,
    pending: Vec<String>,
}

impl DaemonHost {
    pub fn new() -> Self {
        DaemonHost {
            next_tick: Instant::now(),
            locked: false,
            pending: Vec::new(),
        }
    }

    pub fn time_to_tick(&self) -> Duration {
        self.next_tick.saturating_duration_since(Instant::now())
    }

    pub fn tick_due(&self) -> bool {
        Instant::now() >= self.next_tick
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    fn take_pending(&mut self) -> Vec<String> {
        mem::take(&mut self.pending)
    }
}

impl Default for DaemonHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for DaemonHost {
    fn reschedule(&mut self, interval: Duration) {
        self.next_tick = Instant::now() + interval;
    }

    fn notify(&mut self, event: Event) {
        log!(event.level(), "{}", event);
        self.pending.push(event.to_string());
    }

    fn is_locked(&self) -> bool {
        self.locked
    }
}

pub struct Daemon<B> {
    controller: Controller<B, DaemonHost>,
    settings: Settings,
    config_path: Option<PathBuf>,
}

impl<B: Bus> Daemon<B> {
    /// `config_path` is where a changed motion timeout is saved, if anywhere.
    pub fn new(
        controller: Controller<B, DaemonHost>,
        settings: Settings,
        config_path: Option<PathBuf>,
    ) -> Self {
        Daemon {
            controller,
            settings,
            config_path,
        }
    }

    pub fn controller(&self) -> &Controller<B, DaemonHost> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller<B, DaemonHost> {
        &mut self.controller
    }

    pub fn handle(&mut self, command: Command) -> Reply {
        match command {
            Command::Open => Ok(Outcome::Motion(self.controller.unpark()?)),
            Command::Close => Ok(Outcome::Motion(self.controller.park()?)),
            Command::Abort => Ok(Outcome::Abort(self.controller.abort()?)),
            Command::Stop => Ok(Outcome::Abort(self.controller.stop()?)),
            Command::Lock | Command::Unlock => {
                let locked = command == Command::Lock;
                self.controller.host_mut().set_locked(locked);
                info!("mount interlock {}", if locked { "engaged" } else { "released" });
                Ok(Outcome::Locked(locked))
            }
            Command::SetTimeout(secs) => {
                // Saved first, so a failed save leaves the old value in effect.
                self.controller.check_motion_timeout(secs)?;
                let mut settings = self.settings.clone();
                settings.motion_timeout_secs = secs;
                if let Some(path) = &self.config_path {
                    settings.save(path)?;
                }
                self.controller.set_motion_timeout(secs)?;
                self.settings = settings;
                Ok(Outcome::TimeoutSet(secs))
            }
        }
    }

    /// Ticks the controller if its deadline has passed.
    pub fn poll_timer(&mut self) {
        if self.controller.host().tick_due() {
            self.controller.tick();
        }
    }

    pub fn publish(&mut self, status: &mut Status) {
        let events = self.controller.host_mut().take_pending();
        status.update(self.controller.snapshot(), events);
    }

    /// Answers one request, if any arrived, then ticks if the deadline has
    /// passed. Returns false once every command sender is gone.
    pub fn step(&mut self, received: Result<Request, RecvTimeoutError>) -> bool {
        match received {
            Ok(request) => {
                let reply = self.handle(request.command);
                // The requester may have stopped waiting.
                let _ = request.reply.send(reply);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return false,
        }
        self.poll_timer();
        true
    }

    /// Runs until `term` is set or every command sender is gone.
    pub fn run(&mut self, requests: &Receiver<Request>, term: &AtomicBool, status: &RwLock<Status>) {
        while !term.load(Ordering::Relaxed) {
            let wait = self.controller.host().time_to_tick().min(MAX_WAIT);
            if !self.step(requests.recv_timeout(wait)) {
                break;
            }
            let mut published = crate::term_on_err!(status.write(), term);
            self.publish(&mut published);
        }
    }

    /// Clears the relays on the way out.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.controller.disconnect() {
            error!("controller relays cannot be cleared on shutdown: {}", err);
        }
    }
}
