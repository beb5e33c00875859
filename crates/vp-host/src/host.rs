//! The host-facing contract: cycle clock, event scheduler, and trace sink.
//!
//! Everything in this module is a trait because the simulation host that actually owns the
//! event queue, the clock, and the trace output lives outside this crate entirely.
//! Components depend only on these traits so they can be driven by any host and unit-tested with
//! a trivial fake (see `tests/` in `vp-router` and `vp-udma`).

/// Monotonic cycle counter the simulation host owns.
pub trait Clock {
    fn now(&self) -> u64;
}

/// Opaque identifier for a schedulable event, allocated by the host.
pub type EventId = u64;

/// The event-scheduling contract components consume from the host.
///
/// `event_enqueue` arms a fresh delay on an event that is not currently pending.
/// `event_reenqueue` re-arms an event that may already be pending, moving its fire time forward
/// or backward to `delay_cycles` from now. There is no cancellation — once an
/// event is scheduled it always fires.
pub trait Scheduler {
    fn event_enqueue(&mut self, event: EventId, delay_cycles: u64);
    fn event_reenqueue(&mut self, event: EventId, delay_cycles: u64);
}

/// Trace severities the host's sink understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Debug,
    Warning,
}

/// The host-provided trace sink.
pub trait TraceSink {
    fn msg(&mut self, level: TraceLevel, message: &str);

    fn debug(&mut self, message: &str) {
        self.msg(TraceLevel::Debug, message);
    }

    fn warning(&mut self, message: &str) {
        self.msg(TraceLevel::Warning, message);
    }
}

/// Routes through the `tracing` crate, for hosts (and this workspace's own tests) that want the
/// standard ecosystem logging story instead of a bespoke sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn msg(&mut self, level: TraceLevel, message: &str) {
        match level {
            TraceLevel::Debug => tracing::debug!("{message}"),
            TraceLevel::Warning => tracing::warn!("{message}"),
        }
    }
}

/// Raises a host-level completion event by id at transfer completion. Kept separate from
/// [`Scheduler`], which arms the host's own event queue rather than notifying some other
/// observer.
pub trait EventTrigger {
    fn trigger_event(&mut self, id: u32);
}

/// The full host contract `vp-udma` is driven through: clock, scheduler, trace sink, and event
/// trigger bundled into one object so call sites thread a single `&mut dyn Host` instead of four
/// separate trait objects.
pub trait Host: Clock + Scheduler + TraceSink + EventTrigger {}

impl<T: Clock + Scheduler + TraceSink + EventTrigger + ?Sized> Host for T {}
