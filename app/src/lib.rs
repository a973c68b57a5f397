#[macro_export]
macro_rules! term_on_err {
    ($expr:expr, $term:expr) => {
        match $expr {
            std::result::Result::Ok(val) => val,
            std::result::Result::Err(err) => {
                ::log::error!("setting term due to error: {}", err);
                $term.store(true, std::sync::atomic::Ordering::SeqCst);
                break;
            }
        }
    };
}

pub mod bus;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod host;
pub mod http;
pub mod modbus;
pub mod panel;
pub mod roof;
pub mod sim;

use std::collections::VecDeque;
use std::time::Instant;

pub use bus::Bus;
pub use error::{BusFault, Rejected};
pub use events::Event;
pub use host::Host;
pub use panel::{PanelStatus, RoofPosition};
pub use roof::{Controller, Direction, RoofState, Snapshot};

/// Messages kept for the status page.
pub const RECENT_EVENTS: usize = 20;

/// What the HTTP thread shows, published by the control thread.
#[derive(Clone, Debug)]
pub struct Status {
    pub roof: Snapshot,
    /// When the roof state last changed, if it has since start-up.
    pub changed_at: Option<Instant>,
    pub recent: VecDeque<String>,
}

impl Status {
    pub fn new(roof: Snapshot) -> Self {
        Status {
            roof,
            changed_at: None,
            recent: VecDeque::with_capacity(RECENT_EVENTS),
        }
    }

    pub fn update(&mut self, roof: Snapshot, events: impl IntoIterator<Item = String>) {
        if roof.state != self.roof.state {
            self.changed_at = Some(Instant::now());
        }
        self.roof = roof;
        for event in events {
            if self.recent.len() == RECENT_EVENTS {
                self.recent.pop_front();
            }
            self.recent.push_back(event);
        }
    }
}
