use std::time::Duration;

use crate::events::Event;

/// Everything the roof controller needs from the application hosting it.
pub trait Host {
    /// Schedule the next tick `interval` from now, replacing any pending one.
    fn reschedule(&mut self, interval: Duration);

    /// Deliver an event to observers.
    fn notify(&mut self, event: Event);

    /// Whether the mount-safety interlock currently forbids closing the roof.
    fn is_locked(&self) -> bool;
}

impl<H: Host + ?Sized> Host for &mut H {
    fn reschedule(&mut self, interval: Duration) {
        (**self).reschedule(interval)
    }

    fn notify(&mut self, event: Event) {
        (**self).notify(event)
    }

    fn is_locked(&self) -> bool {
        (**self).is_locked()
    }
}
