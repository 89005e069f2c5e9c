use std::any::Any;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, error};

const QUEUE_COMPACT_SLACK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error)]
#[error("{feature} timer failed: {message}")]
pub struct CallbackError {
    pub feature: &'static str,
    pub message: String,
}

impl CallbackError {
    pub fn new(feature: &'static str, message: impl Into<String>) -> Self {
        Self {
            feature,
            message: message.into(),
        }
    }
}

/// Outcome of one `Scheduler::tick` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: u32,
    pub fired: u32,
    pub failed: u32,
    /// Due at the start of the pass but cancelled before being visited.
    pub skipped: u32,
}

impl TickReport {
    pub fn merge(&mut self, other: TickReport) {
        self.due = self.due.saturating_add(other.due);
        self.fired = self.fired.saturating_add(other.fired);
        self.failed = self.failed.saturating_add(other.failed);
        self.skipped = self.skipped.saturating_add(other.skipped);
    }
}

#[derive(Debug)]
struct TimerSlot<T> {
    fire_at: DateTime<Utc>,
    interval: Option<TimeDelta>,
    remaining_fires: Option<u32>,
    queue_seq: u64,
    payload: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    fire_at: DateTime<Utc>,
    seq: u64,
    handle: TimerHandle,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Deadline-ordered set of pending timers carrying a payload of type `T`.
///
/// Cancellation drops the timer's slot; queue entries whose slot is gone or
/// has been re-armed are skipped lazily when they reach the front.
#[derive(Debug)]
pub struct Scheduler<T> {
    now: DateTime<Utc>,
    timers: HashMap<TimerHandle, TimerSlot<T>>,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    next_handle: u64,
    next_seq: u64,
}

impl<T: Clone> Scheduler<T> {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: start,
            timers: HashMap::new(),
            queue: BinaryHeap::new(),
            next_handle: 1,
            next_seq: 0,
        }
    }

    /// Time of the most recent tick, or the start time before the first one.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn schedule(&mut self, after: TimeDelta, payload: T) -> TimerHandle {
        self.insert(self.now + after, None, None, payload)
    }

    pub fn schedule_at(&mut self, deadline: DateTime<Utc>, payload: T) -> TimerHandle {
        self.insert(deadline, None, None, payload)
    }

    pub fn schedule_repeating(
        &mut self,
        initial_delay: TimeDelta,
        interval: TimeDelta,
        payload: T,
    ) -> TimerHandle {
        let interval = normalize_interval(interval);
        self.insert(self.now + initial_delay, interval, None, payload)
    }

    /// Repeating timer that stops itself after `count` fires.
    pub fn schedule_repeating_limited(
        &mut self,
        initial_delay: TimeDelta,
        interval: TimeDelta,
        count: u32,
        payload: T,
    ) -> TimerHandle {
        let interval = normalize_interval(interval);
        let remaining = interval.map(|_| count.max(1));
        self.insert(self.now + initial_delay, interval, remaining, payload)
    }

    /// Returns true when the handle was still pending. Repeated calls, or
    /// calls after a one-shot has fired, are no-ops.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let removed = self.timers.remove(&handle).is_some();
        if removed {
            self.maybe_compact();
        }
        removed
    }

    pub fn is_running(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    pub fn next_fire(&self, handle: TimerHandle) -> Option<DateTime<Utc>> {
        self.timers.get(&handle).map(|slot| slot.fire_at)
    }

    pub fn interval(&self, handle: TimerHandle) -> Option<TimeDelta> {
        self.timers.get(&handle).and_then(|slot| slot.interval)
    }

    pub fn payload(&self, handle: TimerHandle) -> Option<&T> {
        self.timers.get(&handle).map(|slot| &slot.payload)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    /// Earliest deadline among running timers.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse(entry)) = self.queue.peek().copied() {
            if self.is_current(&entry) {
                return Some(entry.fire_at);
            }
            self.queue.pop();
        }
        None
    }

    /// Fires every running timer whose deadline is at or before `now`.
    ///
    /// The due set is captured before any callback runs, so a repeating timer
    /// fires at most once per pass even if it is behind by several intervals.
    /// Callback errors and panics are logged and counted; they never stop
    /// the remaining due timers from firing.
    pub fn tick<E, F>(&mut self, now: DateTime<Utc>, mut callback: F) -> TickReport
    where
        E: Display,
        F: FnMut(&mut Self, TimerHandle, &T) -> Result<(), E>,
    {
        if now > self.now {
            self.now = now;
        }

        let due = self.drain_due();
        let mut report = TickReport {
            due: due.len() as u32,
            ..TickReport::default()
        };

        for handle in due {
            let Some(payload) = self.claim(handle) else {
                report.skipped += 1;
                continue;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(&mut *self, handle, &payload)
            }));
            report.fired += 1;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.failed += 1;
                    error!(timer = handle.0, error = %err, "timer_callback_failed");
                }
                Err(panic_payload) => {
                    report.failed += 1;
                    error!(
                        timer = handle.0,
                        panic = %panic_message(panic_payload.as_ref()),
                        "timer_callback_panicked"
                    );
                }
            }
        }

        if report.due > 0 {
            debug!(
                due = report.due,
                fired = report.fired,
                failed = report.failed,
                skipped = report.skipped,
                pending = self.timers.len(),
                "scheduler_tick"
            );
        }
        report
    }

    fn insert(
        &mut self,
        fire_at: DateTime<Utc>,
        interval: Option<TimeDelta>,
        remaining_fires: Option<u32>,
        payload: T,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        let seq = self.push_entry(fire_at, handle);
        self.timers.insert(
            handle,
            TimerSlot {
                fire_at,
                interval,
                remaining_fires,
                queue_seq: seq,
                payload,
            },
        );
        handle
    }

    fn push_entry(&mut self, fire_at: DateTime<Utc>, handle: TimerHandle) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(QueueEntry {
            fire_at,
            seq,
            handle,
        }));
        seq
    }

    fn is_current(&self, entry: &QueueEntry) -> bool {
        self.timers
            .get(&entry.handle)
            .is_some_and(|slot| slot.queue_seq == entry.seq)
    }

    fn drain_due(&mut self) -> Vec<TimerHandle> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.queue.peek().copied() {
            if entry.fire_at > self.now {
                break;
            }
            self.queue.pop();
            if self.is_current(&entry) {
                due.push(entry.handle);
            }
        }
        due
    }

    /// Re-arms or retires a due timer ahead of its callback and hands back
    /// the payload. `None` means the timer was cancelled earlier in the pass.
    fn claim(&mut self, handle: TimerHandle) -> Option<T> {
        let slot = self.timers.get_mut(&handle)?;
        let Some(interval) = slot.interval else {
            return self.timers.remove(&handle).map(|slot| slot.payload);
        };

        if let Some(remaining) = slot.remaining_fires.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                return self.timers.remove(&handle).map(|slot| slot.payload);
            }
        }

        let next_fire = slot.fire_at + interval;
        slot.fire_at = next_fire;
        let payload = slot.payload.clone();
        let seq = self.push_entry(next_fire, handle);
        if let Some(slot) = self.timers.get_mut(&handle) {
            slot.queue_seq = seq;
        }
        Some(payload)
    }

    fn maybe_compact(&mut self) {
        if self.queue.len() <= self.timers.len() * 2 + QUEUE_COMPACT_SLACK {
            return;
        }
        let timers = &self.timers;
        self.queue.retain(|Reverse(entry)| {
            timers
                .get(&entry.handle)
                .is_some_and(|slot| slot.queue_seq == entry.seq)
        });
    }
}

fn normalize_interval(interval: TimeDelta) -> Option<TimeDelta> {
    if interval > TimeDelta::zero() {
        Some(interval)
    } else {
        debug!(
            interval_ms = interval.num_milliseconds(),
            "non-positive repeat interval; scheduling as one-shot"
        );
        None
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn collect(scheduler: &mut Scheduler<&'static str>, at: DateTime<Utc>) -> Vec<&'static str> {
        let mut fired = Vec::new();
        scheduler.tick(at, |_, _, payload| {
            fired.push(*payload);
            Ok::<(), CallbackError>(())
        });
        fired
    }

    #[test]
    fn one_shot_fires_once_at_deadline() {
        let mut scheduler = Scheduler::new(start());
        let handle = scheduler.schedule(TimeDelta::seconds(5), "ping");

        assert!(collect(&mut scheduler, start() + TimeDelta::seconds(4)).is_empty());
        assert_eq!(
            collect(&mut scheduler, start() + TimeDelta::seconds(5)),
            vec!["ping"]
        );
        assert!(!scheduler.is_running(handle));
        assert!(collect(&mut scheduler, start() + TimeDelta::seconds(60)).is_empty());
    }

    #[test]
    fn repeating_timer_rearms_from_missed_deadline_once_per_tick() {
        let mut scheduler = Scheduler::new(start());
        let handle =
            scheduler.schedule_repeating(TimeDelta::minutes(10), TimeDelta::minutes(10), "sweep");

        let late = start() + TimeDelta::minutes(35);
        assert_eq!(collect(&mut scheduler, late), vec!["sweep"]);
        assert_eq!(
            scheduler.next_fire(handle),
            Some(start() + TimeDelta::minutes(20))
        );

        assert_eq!(collect(&mut scheduler, late), vec!["sweep"]);
        assert_eq!(collect(&mut scheduler, late), vec!["sweep"]);
        assert!(collect(&mut scheduler, late).is_empty());
        assert_eq!(
            scheduler.next_fire(handle),
            Some(start() + TimeDelta::minutes(40))
        );
    }

    #[test]
    fn cancel_is_idempotent_and_safe_after_fire() {
        let mut scheduler = Scheduler::new(start());
        let one_shot = scheduler.schedule(TimeDelta::seconds(1), "a");
        let repeating = scheduler.schedule_repeating(TimeDelta::seconds(1), TimeDelta::seconds(1), "b");

        collect(&mut scheduler, start() + TimeDelta::seconds(1));
        assert!(!scheduler.cancel(one_shot));
        assert!(scheduler.cancel(repeating));
        assert!(!scheduler.cancel(repeating));
        assert_eq!(scheduler.pending_count(), 0);
        assert!(collect(&mut scheduler, start() + TimeDelta::seconds(10)).is_empty());
    }

    #[test]
    fn repeating_timer_can_cancel_itself_from_callback() {
        let mut scheduler = Scheduler::new(start());
        let handle = scheduler.schedule_repeating(TimeDelta::seconds(1), TimeDelta::seconds(1), ());
        let mut fires = 0;
        for second in 1..=5 {
            scheduler.tick(start() + TimeDelta::seconds(second), |sched, fired, _| {
                fires += 1;
                sched.cancel(fired);
                Ok::<(), CallbackError>(())
            });
        }
        assert_eq!(fires, 1);
        assert!(!scheduler.is_running(handle));
    }

    #[test]
    fn timer_cancelled_earlier_in_same_pass_does_not_fire() {
        let mut scheduler = Scheduler::new(start());
        let first = scheduler.schedule(TimeDelta::seconds(1), 1u32);
        let second = scheduler.schedule(TimeDelta::seconds(2), 2u32);

        let mut fired = Vec::new();
        let report = scheduler.tick(start() + TimeDelta::seconds(3), |sched, handle, payload| {
            fired.push(*payload);
            if handle == first {
                sched.cancel(second);
            }
            Ok::<(), CallbackError>(())
        });

        assert_eq!(fired, vec![1]);
        assert_eq!(report.due, 2);
        assert_eq!(report.fired, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn failing_and_panicking_callbacks_do_not_block_others() {
        let mut scheduler = Scheduler::new(start());
        scheduler.schedule(TimeDelta::seconds(1), "fail");
        scheduler.schedule(TimeDelta::seconds(1), "panic");
        scheduler.schedule(TimeDelta::seconds(1), "ok");

        let mut ok_fired = false;
        let report = scheduler.tick(start() + TimeDelta::seconds(1), |_, _, payload| {
            match *payload {
                "fail" => Err(CallbackError::new("test", "boom")),
                "panic" => panic!("callback exploded"),
                _ => {
                    ok_fired = true;
                    Ok(())
                }
            }
        });

        assert!(ok_fired);
        assert_eq!(report.fired, 3);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn limited_repeating_timer_retires_after_count() {
        let mut scheduler = Scheduler::new(start());
        let handle = scheduler.schedule_repeating_limited(
            TimeDelta::seconds(5),
            TimeDelta::seconds(10),
            3,
            "welcome",
        );

        let mut total = 0;
        for step in 0..10 {
            total += collect(&mut scheduler, start() + TimeDelta::seconds(5 + step * 10)).len();
        }
        assert_eq!(total, 3);
        assert!(!scheduler.is_running(handle));
    }

    #[test]
    fn callback_may_schedule_new_timers() {
        let mut scheduler = Scheduler::new(start());
        scheduler.schedule(TimeDelta::seconds(1), "parent");
        scheduler.tick(start() + TimeDelta::seconds(1), |sched, _, payload| {
            if *payload == "parent" {
                sched.schedule(TimeDelta::seconds(1), "child");
            }
            Ok::<(), CallbackError>(())
        });

        assert_eq!(
            scheduler.next_deadline(),
            Some(start() + TimeDelta::seconds(2))
        );
        assert_eq!(
            collect(&mut scheduler, start() + TimeDelta::seconds(2)),
            vec!["child"]
        );
    }

    #[test]
    fn non_positive_interval_schedules_one_shot() {
        let mut scheduler = Scheduler::new(start());
        let handle = scheduler.schedule_repeating(TimeDelta::seconds(1), TimeDelta::zero(), "x");
        assert_eq!(scheduler.interval(handle), None);
        assert_eq!(collect(&mut scheduler, start() + TimeDelta::seconds(9)), vec!["x"]);
        assert!(!scheduler.is_running(handle));
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut scheduler: Scheduler<()> = Scheduler::new(start());
        scheduler.tick(start() + TimeDelta::seconds(10), |_, _, _| Ok::<(), CallbackError>(()));
        scheduler.tick(start(), |_, _, _| Ok::<(), CallbackError>(()));
        assert_eq!(scheduler.now(), start() + TimeDelta::seconds(10));
    }

    #[test]
    fn cancelled_entries_are_compacted() {
        let mut scheduler = Scheduler::new(start());
        let handles = (0..200)
            .map(|i| scheduler.schedule(TimeDelta::seconds(i + 1), i))
            .collect::<Vec<_>>();
        for handle in handles {
            scheduler.cancel(handle);
        }
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler.queue.len() <= QUEUE_COMPACT_SLACK);
        assert_eq!(scheduler.next_deadline(), None);
    }
}
