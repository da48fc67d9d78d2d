//! Simulated compare unit and output stage.
//!
//! Time only moves when [`Bench::run_until`] is called; due compares are then
//! serviced in time order exactly as the timer interrupts would be.

use std::time::Duration;

use ecu_core::engine::{CHANNEL_COUNT, ChannelId, Ticks};
use ecu_core::scheduler::{CompareHardware, EventScheduler, OutputAction, OutputDriver};

/// Compare registers of every channel sharing one free-running counter.
#[derive(Debug, Default)]
pub struct SimCompare {
    now: Ticks,
    compares: [Option<Ticks>; CHANNEL_COUNT],
    masked: [bool; CHANNEL_COUNT],
}

impl SimCompare {
    #[must_use]
    pub fn starting_at(now: Ticks) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    /// Earliest compare due no later than `until`.
    fn next_due(&self, until: Ticks) -> Option<(ChannelId, Ticks)> {
        let now = self.now;
        self.compares
            .iter()
            .enumerate()
            .filter(|(slot, _)| !self.masked[*slot])
            .filter_map(|(slot, at)| Some((ChannelId::from_slot(slot)?, (*at)?)))
            .filter(|(_, at)| at.wrapping_since(now) <= until.wrapping_since(now))
            .min_by_key(|(_, at)| at.wrapping_since(now))
    }
}

impl CompareHardware for SimCompare {
    fn now(&self) -> Ticks {
        self.now
    }

    fn mask(&mut self, channel: ChannelId) {
        self.masked[channel.slot()] = true;
    }

    fn unmask(&mut self, channel: ChannelId) {
        self.masked[channel.slot()] = false;
    }

    fn set_compare(&mut self, channel: ChannelId, at: Ticks) {
        self.compares[channel.slot()] = Some(at);
    }

    fn clear_compare(&mut self, channel: ChannelId) {
        self.compares[channel.slot()] = None;
    }
}

/// Per-channel pulse counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ChannelActivity {
    pub pulses: u32,
    pub last_width: Option<Duration>,
    energized_at: Option<Ticks>,
}

/// Output stage that measures every pulse instead of driving a pin.
#[derive(Debug, Default)]
pub struct SimOutputs {
    now: Ticks,
    channels: [ChannelActivity; CHANNEL_COUNT],
}

impl SimOutputs {
    #[must_use]
    pub fn activity(&self, channel: ChannelId) -> ChannelActivity {
        self.channels[channel.slot()]
    }

    #[must_use]
    pub fn total_pulses(&self) -> u32 {
        self.channels.iter().map(|channel| channel.pulses).sum()
    }
}

impl OutputDriver for SimOutputs {
    fn apply(&mut self, channel: ChannelId, action: OutputAction) {
        let now = self.now;
        let activity = &mut self.channels[channel.slot()];
        match action {
            OutputAction::Energize => activity.energized_at = Some(now),
            OutputAction::Release => {
                if let Some(start) = activity.energized_at.take() {
                    activity.pulses += 1;
                    activity.last_width = Some(now.wrapping_since(start));
                }
            }
        }
    }

    fn release_all(&mut self) {
        for activity in &mut self.channels {
            activity.energized_at = None;
        }
    }
}

/// Compare unit and outputs advanced together.
#[derive(Debug, Default)]
pub struct Bench {
    pub compare: SimCompare,
    pub outputs: SimOutputs,
}

impl Bench {
    #[must_use]
    pub fn starting_at(now: Ticks) -> Self {
        Self {
            compare: SimCompare::starting_at(now),
            outputs: SimOutputs {
                now,
                ..SimOutputs::default()
            },
        }
    }

    #[must_use]
    pub fn now(&self) -> Ticks {
        self.compare.now
    }

    /// Advances the clock to `until`, servicing compares in time order.
    pub fn run_until(&mut self, scheduler: &EventScheduler, until: Ticks) {
        while let Some((channel, at)) = self.compare.next_due(until) {
            self.compare.now = at;
            self.outputs.now = at;
            self.compare.compares[channel.slot()] = None;
            scheduler.on_compare_match(&mut self.compare, &mut self.outputs, channel);
        }
        self.compare.now = until;
        self.outputs.now = until;
    }

    /// Advances the clock by `span`.
    pub fn advance(&mut self, scheduler: &EventScheduler, span: Duration) {
        let micros = u32::try_from(span.as_micros()).unwrap_or(u32::MAX);
        let until = Ticks(self.now().as_micros().wrapping_add(micros));
        self.run_until(scheduler, until);
    }

    pub fn shutdown(&mut self, scheduler: &EventScheduler) {
        scheduler.shutdown(&mut self.compare, &mut self.outputs);
    }
}
