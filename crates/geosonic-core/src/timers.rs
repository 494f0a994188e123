//! Host timer seam for deferred strategy work.

use std::time::Duration;

/// Opaque handle returned by a [`Timers`] implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub i64);

/// Host event-loop timers. Callbacks run later on the same thread, never
/// from inside the `set_*` call.
pub trait Timers {
    /// Returns `None` if the host refused to arm the timer.
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId>;
    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> Option<TimerId>;
    fn clear(&self, id: TimerId);
}
