//! Multi-domain clock event scheduler.
//!
//! A single min-heap of events keyed by absolute SYS tick drives the whole
//! device: the CPU-step event, timer ticks, and any other peripheral
//! callback. Every event is tagged with the clock domain it was scheduled
//! on and carries the domain-to-SYS scale captured at scheduling time, so
//! the queue can be re-aligned in place when the prescaler tree changes.
//!
//! Events at the same tick drain in ascending priority; ties beyond that
//! are unspecified and nothing may rely on them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Clock domains. All are integer divisors of SYS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockType {
    Sys,
    Cpu,
    Per,
    Per2,
    Per4,
    Asy,
}

/// Stable identity of a scheduled callback.
///
/// The device routes a popped event back to its owner through this tag;
/// it is also the handle used to unschedule by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTag {
    /// The CPU instruction-step event.
    CpuStep,
    /// A Timer/Counter instance, by index.
    Tc(u8),
}

/// One scheduled callback occurrence.
#[derive(Debug, Clone)]
pub struct ClockEvent {
    pub tag: EventTag,
    pub clock: ClockType,
    pub priority: u8,
    /// Due SYS tick.
    pub tick: u64,
    /// Domain-to-SYS divisor captured when the event was (re)scheduled.
    pub scale: u64,
}

// BinaryHeap is a max-heap; invert the (tick, priority) order so the
// earliest tick and then the lowest priority number pops first.
impl Ord for ClockEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.tick, other.priority).cmp(&(self.tick, self.priority))
    }
}

impl PartialOrd for ClockEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ClockEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.priority == other.priority
    }
}

impl Eq for ClockEvent {}

/// The event queue.
#[derive(Default)]
pub struct Scheduler {
    queue: BinaryHeap<ClockEvent>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { queue: BinaryHeap::new() }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Schedule `ticks` domain ticks into the future, snapped to the
    /// domain grid: `tick = (now/scale + ticks) * scale`.
    pub fn schedule(
        &mut self,
        tag: EventTag,
        clock: ClockType,
        ticks: u64,
        priority: u8,
        scale: u64,
        now: u64,
    ) {
        let tick = (now / scale + ticks) * scale;
        self.queue.push(ClockEvent { tag, clock, priority, tick, scale });
    }

    /// Remove an event by identity. Returns false if it was not queued.
    pub fn unschedule(&mut self, tag: EventTag) -> bool {
        let mut events = std::mem::take(&mut self.queue).into_vec();
        let before = events.len();
        events.retain(|ev| ev.tag != tag);
        let removed = events.len() != before;
        self.queue = BinaryHeap::from(events);
        removed
    }

    /// Due tick of the earliest event.
    pub fn head_tick(&self) -> Option<u64> {
        self.queue.peek().map(|ev| ev.tick)
    }

    /// Pop the head event if it is due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<ClockEvent> {
        if self.queue.peek().map(|ev| ev.tick <= now).unwrap_or(false) {
            self.queue.pop()
        } else {
            None
        }
    }

    /// Put a repeating event back after its callback asked for a re-run.
    pub fn requeue(&mut self, ev: ClockEvent) {
        self.queue.push(ev);
    }

    /// Re-align every event whose domain scale changed.
    ///
    /// Must run on a tick aligned with the slowest changed domain: the
    /// remaining delay of each event is an exact multiple of its old scale,
    /// converted with `dt = ceil((tick - now) / old_scale)` into the new
    /// scale.
    pub fn rescale<F: Fn(ClockType) -> u64>(&mut self, now: u64, scale_of: F) {
        let mut events = std::mem::take(&mut self.queue).into_vec();
        for ev in &mut events {
            let scale = scale_of(ev.clock);
            if scale == ev.scale {
                continue;
            }
            debug_assert_eq!((ev.tick - now) % ev.scale, 0);
            let dt = (ev.tick - now + ev.scale - 1) / ev.scale;
            ev.tick = now + dt * scale;
            ev.scale = scale;
        }
        self.queue = BinaryHeap::from(events);
    }
}
