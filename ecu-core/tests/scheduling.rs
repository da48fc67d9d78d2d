use core::time::Duration;

use ecu_core::engine::{
    CHANNEL_COUNT, ChannelId, CrankAngle, EngineCycle, EnginePosition, Ticks, TimePerDegree,
};
use ecu_core::scheduler::{
    ChannelState, CompareHardware, EventRequest, EventScheduler, OutputAction, OutputDriver,
    RefusalReason, ScheduleOutcome, SchedulerConfig,
};
use heapless::Vec as HeaplessVec;

const INJ1: ChannelId = ChannelId::Injector(0);
const IGN1: ChannelId = ChannelId::Coil(0);

#[test]
fn identical_requests_arm_a_single_event() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);
    let position = position(0, 50, 0);
    let request = request(INJ1, 100, 2_000);

    let first = scheduler.schedule(&mut rig.hw, &request, &position);
    let second = scheduler.schedule(&mut rig.hw, &request, &position);

    assert_eq!(first.fire_at(), Some(Ticks(5_000)));
    assert_eq!(
        second,
        ScheduleOutcome::Armed {
            fire_at: Ticks(5_000),
            replaced: true,
        },
        "re-submitting the same request should only move the event onto itself"
    );

    rig.run_until(&scheduler, Ticks(20_000));
    assert_eq!(
        rig.energized(INJ1).as_slice(),
        &[Ticks(5_000)],
        "exactly one pulse should start"
    );
    assert_eq!(rig.released(INJ1).as_slice(), &[Ticks(7_000)]);
}

#[test]
fn replacement_fires_only_the_newer_event() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 2_000), &position(0, 50, 0));
    let outcome = scheduler.schedule(&mut rig.hw, &request(INJ1, 150, 2_000), &position(0, 50, 0));
    assert_eq!(
        outcome,
        ScheduleOutcome::Armed {
            fire_at: Ticks(7_500),
            replaced: true,
        }
    );

    rig.run_until(&scheduler, Ticks(20_000));
    assert_eq!(rig.energized(INJ1).as_slice(), &[Ticks(7_500)]);
    assert_eq!(scheduler.snapshot(INJ1).cancelled, 1);
    assert_eq!(scheduler.snapshot(INJ1).fired, 1);
}

#[test]
fn targets_behind_the_crank_wrap_into_the_next_cycle() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(40_000);

    let outcome = scheduler.schedule(
        &mut rig.hw,
        &request(INJ1, 10, 1_000),
        &position(700, 50, 40_000),
    );
    assert_eq!(outcome.fire_at(), Some(Ticks(41_500)));

    rig.run_until(&scheduler, Ticks(50_000));
    assert_eq!(rig.energized(INJ1).as_slice(), &[Ticks(41_500)]);
}

#[test]
fn timer_wrap_does_not_disturb_fire_times() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let start = u32::MAX - 1_000;
    let mut rig = Rig::new(start);

    let outcome = scheduler.schedule(
        &mut rig.hw,
        &request(IGN1, 60, 3_000),
        &position(0, 50, start),
    );
    let expected = Ticks(start.wrapping_add(3_000));
    assert_eq!(outcome.fire_at(), Some(expected));

    rig.run_until(&scheduler, Ticks(10_000));
    assert_eq!(rig.energized(IGN1).as_slice(), &[expected]);
    assert_eq!(rig.released(IGN1).as_slice(), &[Ticks(expected.0.wrapping_add(3_000))]);
}

#[test]
fn stale_positions_are_refused_and_cancel_the_pending_event() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 2_000), &position(0, 50, 0));
    rig.hw.now = Ticks(150_000);
    let outcome = scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 2_000), &position(0, 50, 0));

    assert_eq!(outcome, ScheduleOutcome::Refused(RefusalReason::SampleExpired));
    assert_eq!(scheduler.state(INJ1), ChannelState::Idle);
    assert_eq!(rig.hw.compares[INJ1.slot()], None);
}

#[test]
fn stopped_or_crawling_engines_are_refused() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    let stopped = EnginePosition::new(CrankAngle::new(0), TimePerDegree::STOPPED, 30, Ticks(0));
    assert_eq!(
        scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 2_000), &stopped),
        ScheduleOutcome::Refused(RefusalReason::EngineStopped)
    );
    assert_eq!(
        scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 2_000), &position(0, 5_000, 0)),
        ScheduleOutcome::Refused(RefusalReason::TimePerDegreeCeiling)
    );
}

#[test]
fn requests_during_a_pulse_are_queued_until_release() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    scheduler.schedule(&mut rig.hw, &request(INJ1, 20, 2_000), &position(0, 50, 0));
    rig.run_until(&scheduler, Ticks(1_500));
    assert_eq!(scheduler.state(INJ1), ChannelState::Fired);

    let outcome = scheduler.schedule(&mut rig.hw, &request(INJ1, 200, 2_000), &position(30, 50, 1_500));
    assert_eq!(outcome, ScheduleOutcome::Queued { fire_at: Ticks(10_000) });

    rig.run_until(&scheduler, Ticks(20_000));
    assert_eq!(
        rig.energized(INJ1).as_slice(),
        &[Ticks(1_000), Ticks(10_000)],
        "the queued pulse should start after the first one ends"
    );
    assert_eq!(rig.released(INJ1).as_slice(), &[Ticks(3_000), Ticks(12_000)]);
}

#[test]
fn late_start_service_keeps_the_end_edge_ahead_of_the_counter() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    scheduler.schedule(&mut rig.hw, &request(INJ1, 20, 1_000), &position(0, 50, 0));
    assert_eq!(rig.hw.compares[INJ1.slot()], Some(Ticks(1_000)));

    // Start interrupt serviced after the nominal end of the pulse.
    rig.hw.now = Ticks(2_200);
    let action = scheduler.on_compare_match(&mut rig.hw, &mut rig.outputs, INJ1);
    assert_eq!(action, Some(OutputAction::Energize));

    let end = rig.hw.compares[INJ1.slot()].expect("end edge armed");
    assert!(
        !end.is_before(rig.hw.now),
        "end compare {end:?} is behind the counter at {:?}",
        rig.hw.now
    );
    assert_eq!(end, Ticks(2_200 + 10));

    rig.run_until(&scheduler, Ticks(5_000));
    assert!(!rig.outputs.energized[INJ1.slot()]);
    assert_eq!(scheduler.state(INJ1), ChannelState::Idle);
}

#[test]
fn zero_width_cancels_the_channel() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 2_000), &position(0, 50, 0));
    let outcome = scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 0), &position(0, 50, 0));
    assert_eq!(outcome, ScheduleOutcome::Cancelled);

    rig.run_until(&scheduler, Ticks(20_000));
    assert!(rig.energized(INJ1).is_empty());
}

#[test]
fn shutdown_releases_outputs_in_progress() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    scheduler.schedule(&mut rig.hw, &request(IGN1, 20, 4_000), &position(0, 50, 0));
    rig.run_until(&scheduler, Ticks(2_000));
    assert!(rig.outputs.energized[IGN1.slot()]);

    scheduler.shutdown(&mut rig.hw, &mut rig.outputs);
    assert!(!rig.outputs.energized[IGN1.slot()]);
    assert_eq!(scheduler.state(IGN1), ChannelState::Idle);
    assert!(rig.hw.compares.iter().all(Option::is_none));
}

#[test]
fn every_mask_is_paired_with_an_unmask() {
    let scheduler = EventScheduler::new(SchedulerConfig::DEFAULT);
    let mut rig = Rig::new(0);

    scheduler.schedule(&mut rig.hw, &request(INJ1, 100, 2_000), &position(0, 50, 0));
    scheduler.schedule(&mut rig.hw, &request(INJ1, 120, 2_000), &position(0, 50, 0));
    scheduler.cancel(&mut rig.hw, INJ1);

    assert!(rig.hw.masked.iter().all(|masked| !masked));
    assert_eq!(rig.hw.mask_calls, rig.hw.unmask_calls);
    assert!(rig.hw.mask_calls >= 3);
}

fn position(angle: u16, tpd_us: u32, at: u32) -> EnginePosition {
    EnginePosition::new(
        CrankAngle::new(angle),
        TimePerDegree::from_micros(tpd_us),
        30,
        Ticks(at),
    )
}

fn request(channel: ChannelId, angle: u16, width_us: u64) -> EventRequest {
    EventRequest {
        channel,
        angle: CrankAngle::new(angle),
        width: Duration::from_micros(width_us),
        cycle: EngineCycle::FourStroke,
        guard_degrees: 0,
    }
}

#[derive(Default)]
struct MockCompare {
    now: Ticks,
    compares: [Option<Ticks>; CHANNEL_COUNT],
    masked: [bool; CHANNEL_COUNT],
    mask_calls: usize,
    unmask_calls: usize,
}

impl CompareHardware for MockCompare {
    fn now(&self) -> Ticks {
        self.now
    }

    fn mask(&mut self, channel: ChannelId) {
        self.masked[channel.slot()] = true;
        self.mask_calls += 1;
    }

    fn unmask(&mut self, channel: ChannelId) {
        self.masked[channel.slot()] = false;
        self.unmask_calls += 1;
    }

    fn set_compare(&mut self, channel: ChannelId, at: Ticks) {
        self.compares[channel.slot()] = Some(at);
    }

    fn clear_compare(&mut self, channel: ChannelId) {
        self.compares[channel.slot()] = None;
    }
}

#[derive(Default)]
struct MockOutputs {
    energized: [bool; CHANNEL_COUNT],
}

impl OutputDriver for MockOutputs {
    fn apply(&mut self, channel: ChannelId, action: OutputAction) {
        self.energized[channel.slot()] = action == OutputAction::Energize;
    }

    fn release_all(&mut self) {
        self.energized = [false; CHANNEL_COUNT];
    }
}

/// Mock compare unit plus a log of every edge it produced.
struct Rig {
    hw: MockCompare,
    outputs: MockOutputs,
    edges: HeaplessVec<(ChannelId, OutputAction, Ticks), 32>,
}

impl Rig {
    fn new(now: u32) -> Self {
        Self {
            hw: MockCompare {
                now: Ticks(now),
                ..MockCompare::default()
            },
            outputs: MockOutputs::default(),
            edges: HeaplessVec::new(),
        }
    }

    /// Advances the clock, servicing compares in time order.
    fn run_until(&mut self, scheduler: &EventScheduler, until: Ticks) {
        loop {
            let now = self.hw.now;
            let due = self
                .hw
                .compares
                .iter()
                .enumerate()
                .filter_map(|(slot, at)| at.map(|at| (slot, at)))
                .filter(|(_, at)| !until.is_before(*at))
                .min_by_key(|(_, at)| at.wrapping_since(now));
            let Some((slot, at)) = due else {
                self.hw.now = until;
                return;
            };
            let channel = ChannelId::from_slot(slot).expect("valid slot");
            self.hw.now = at;
            if let Some(action) = scheduler.on_compare_match(&mut self.hw, &mut self.outputs, channel)
            {
                self.edges.push((channel, action, at)).expect("edge log capacity");
            }
        }
    }

    fn edges(&self, channel: ChannelId, action: OutputAction) -> HeaplessVec<Ticks, 16> {
        self.edges
            .iter()
            .filter(|(ch, act, _)| *ch == channel && *act == action)
            .map(|(_, _, at)| *at)
            .collect()
    }

    fn energized(&self, channel: ChannelId) -> HeaplessVec<Ticks, 16> {
        self.edges(channel, OutputAction::Energize)
    }

    fn released(&self, channel: ChannelId) -> HeaplessVec<Ticks, 16> {
        self.edges(channel, OutputAction::Release)
    }
}
