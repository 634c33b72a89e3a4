//! Gapless playback scheduling
//!
//! Model audio arrives in independent chunks at irregular intervals. The
//! scheduler places each chunk on the output clock so it starts exactly
//! where the previous one ends. Barge-in cancels everything in flight by
//! bumping the epoch: the output drops any source from an older epoch, so
//! a stale chunk can never sound after an interrupt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::PlaybackItem;

/// Identifier of one scheduled source
pub type SourceId = u64;

/// A playback item pinned to a start time on the output clock
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub epoch: u64,
    /// Start time in seconds on the output clock
    pub start_time: f64,
    pub item: PlaybackItem,
}

impl ScheduledSource {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.item.duration
    }
}

/// The output device as seen by the scheduler.
///
/// Implementations own the hardware clock; the scheduler never touches the
/// device directly.
pub trait AudioOutput: Send + Sync {
    /// Current time of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Play `source` starting exactly at its start time
    fn start_source(&self, source: ScheduledSource);

    /// Silence a source immediately
    fn stop_source(&self, id: SourceId);

    /// Drop every source whose epoch is older than `epoch`
    fn set_epoch(&self, epoch: u64);
}

/// Scheduling counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    pub items_scheduled: u64,
    pub items_cancelled: u64,
    pub interrupts: u64,
}

/// Queues decoded audio onto the output clock back-to-back
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    lead_in: f64,
    /// Next start time; never decreases except on interrupt or stop
    schedule_clock: f64,
    epoch: u64,
    next_id: SourceId,
    /// Active sources by id with their end times
    active: BTreeMap<SourceId, f64>,
    stats: SchedulerStats,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, lead_in: Duration) -> Self {
        let schedule_clock = output.current_time();
        Self {
            output,
            lead_in: lead_in.as_secs_f64(),
            schedule_clock,
            epoch: 0,
            next_id: 0,
            active: BTreeMap::new(),
            stats: SchedulerStats::default(),
        }
    }

    /// Schedule `item` and return its start time.
    ///
    /// Returns `None` for an empty item, which is not scheduled.
    pub fn enqueue(&mut self, item: PlaybackItem) -> Option<f64> {
        if item.is_empty() || item.duration <= 0.0 {
            return None;
        }

        let now = self.output.current_time();
        self.prune(now);

        let start_time = if self.schedule_clock <= now {
            // Idle: nothing pending, absorb jitter before the first item
            now + self.lead_in
        } else {
            self.schedule_clock
        };

        let id = self.next_id;
        self.next_id += 1;

        let source = ScheduledSource {
            id,
            epoch: self.epoch,
            start_time,
            item,
        };
        self.schedule_clock = source.end_time();
        self.active.insert(id, self.schedule_clock);
        self.stats.items_scheduled += 1;

        tracing::trace!(
            "Scheduled source {} at {:.4}s for {:.4}s (epoch {})",
            id,
            start_time,
            source.item.duration,
            self.epoch
        );
        self.output.start_source(source);

        Some(start_time)
    }

    /// Barge-in: silence everything and restart the clock from now.
    pub fn interrupt(&mut self) {
        let cancelled = self.cancel_all();
        self.schedule_clock = self.output.current_time();
        self.stats.interrupts += 1;
        tracing::debug!("Playback interrupted, {} sources cancelled", cancelled);
    }

    /// Teardown: silence everything. The scheduler is not reused.
    pub fn stop_all(&mut self) {
        let cancelled = self.cancel_all();
        tracing::debug!("Playback stopped, {} sources cancelled", cancelled);
    }

    fn cancel_all(&mut self) -> usize {
        self.epoch += 1;
        self.output.set_epoch(self.epoch);

        let cancelled = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop_source(id);
        }
        self.stats.items_cancelled += cancelled as u64;
        cancelled
    }

    /// Forget sources that have finished playing
    fn prune(&mut self, now: f64) {
        self.active.retain(|_, end| *end > now);
    }

    /// True when nothing is scheduled past the current clock time
    pub fn is_idle(&self) -> bool {
        self.schedule_clock <= self.output.current_time()
    }

    pub fn schedule_clock(&self) -> f64 {
        self.schedule_clock
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Sources scheduled and not yet known to be finished
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOutput;
    use proptest::prelude::*;

    const LEAD_IN: f64 = 0.05;

    fn item(seconds: f64) -> PlaybackItem {
        PlaybackItem::new(vec![0.1; (seconds * 24_000.0).round() as usize], 24_000)
    }

    fn scheduler(output: &Arc<FakeOutput>) -> PlaybackScheduler {
        PlaybackScheduler::new(output.clone(), Duration::from_secs_f64(LEAD_IN))
    }

    #[test]
    fn test_gapless_while_playing() {
        let output = Arc::new(FakeOutput::new());
        let mut scheduler = scheduler(&output);

        for seconds in [0.1, 0.25, 0.04, 0.5] {
            scheduler.enqueue(item(seconds));
            output.advance(0.02);
        }

        let started = output.started();
        assert_eq!(started.len(), 4);
        for pair in started.windows(2) {
            assert_eq!(pair[1].start_time, pair[0].start_time + pair[0].item.duration);
        }
    }

    #[test]
    fn test_idle_lead_in() {
        let output = Arc::new(FakeOutput::new());
        output.set_time(3.0);
        let mut scheduler = scheduler(&output);

        assert_eq!(scheduler.enqueue(item(0.1)), Some(3.0 + LEAD_IN));

        // Long after the first item has finished
        output.set_time(10.0);
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.enqueue(item(0.1)), Some(10.0 + LEAD_IN));
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn test_interrupt_clears_and_resets() {
        let output = Arc::new(FakeOutput::new());
        let mut scheduler = scheduler(&output);

        scheduler.enqueue(item(1.0));
        scheduler.enqueue(item(1.0));
        output.set_time(0.5);

        scheduler.interrupt();
        assert_eq!(output.stopped(), vec![0, 1]);
        assert_eq!(output.epoch(), 1);
        assert_eq!(scheduler.schedule_clock(), 0.5);
        assert_eq!(scheduler.active_count(), 0);

        // Starts fresh instead of queuing behind the cancelled 2 s
        assert_eq!(scheduler.enqueue(item(0.2)), Some(0.5 + LEAD_IN));
        assert_eq!(output.started().last().unwrap().epoch, 1);
        assert_eq!(scheduler.stats().items_cancelled, 2);
    }

    #[test]
    fn test_stop_all() {
        let output = Arc::new(FakeOutput::new());
        let mut scheduler = scheduler(&output);
        scheduler.enqueue(item(0.3));

        scheduler.stop_all();
        assert_eq!(output.stopped(), vec![0]);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.epoch(), 1);
    }

    #[test]
    fn test_empty_item_not_scheduled() {
        let output = Arc::new(FakeOutput::new());
        let mut scheduler = scheduler(&output);
        assert_eq!(scheduler.enqueue(PlaybackItem::new(Vec::new(), 24_000)), None);
        assert!(output.started().is_empty());
    }

    proptest! {
        #[test]
        fn prop_clock_monotonic_and_gapless(
            steps in prop::collection::vec((1usize..4800, 0.0f64..0.3), 1..40)
        ) {
            let output = Arc::new(FakeOutput::new());
            let mut scheduler = scheduler(&output);
            let mut last_clock = scheduler.schedule_clock();
            let mut last_end: Option<f64> = None;

            for (samples, advance) in steps {
                let now = output.current_time();
                let busy = scheduler.schedule_clock() > now;
                let start = scheduler.enqueue(PlaybackItem::new(vec![0.0; samples], 24_000)).unwrap();

                prop_assert!(start >= now);
                if busy {
                    prop_assert_eq!(Some(start), last_end);
                } else {
                    prop_assert_eq!(start, now + LEAD_IN);
                }
                prop_assert!(scheduler.schedule_clock() >= last_clock);
                last_clock = scheduler.schedule_clock();
                last_end = Some(last_clock);
                output.advance(advance);
            }
        }
    }
}
