//! Angle-to-time event scheduler driving the injector and coil outputs.
//!
//! Each channel owns one slot that moves through `Idle → Armed → Fired → Idle`.
//! The main loop writes a slot only while that channel's compare interrupt is
//! masked, and the interrupt handler writes it only from
//! [`EventScheduler::on_compare_match`], so every field has a single writer at a
//! time. Slots are plain atomics, which lets the scheduler live in a `static`
//! shared with interrupt handlers without a global critical section.
//!
//! A channel has one compare unit. The start edge is armed first; when it
//! matches, the handler raises the output and re-arms the same compare for the
//! end edge. Rescheduling an armed channel rewrites that single register, so
//! there is never a moment where the old and the new target are both live.

use core::{fmt, time::Duration};

use portable_atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, Ordering};

use crate::engine::{
    CHANNEL_COUNT, ChannelId, ChannelMask, CrankAngle, EngineCycle, EnginePosition, Ticks,
    TimePerDegree,
};

mod hardware;

pub use hardware::{CompareHardware, NoopOutputDriver, OutputAction, OutputDriver};
use hardware::MaskedChannel;

/// Slowest engine speed the scheduler accepts (about 100 RPM).
pub const DEFAULT_MAX_TIME_PER_DEGREE: TimePerDegree = TimePerDegree::from_micros(1_667);
/// Oldest position sample the scheduler will extrapolate from.
pub const DEFAULT_MAX_SAMPLE_AGE: Duration = Duration::from_millis(100);
/// Furthest into the future an event may be armed.
pub const DEFAULT_MAX_FIRE_HORIZON: Duration = Duration::from_millis(1_250);
/// Minimum distance between programming a compare and its match.
pub const DEFAULT_MIN_LEAD: Duration = Duration::from_micros(10);

/// Plausibility limits applied before any compare is armed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SchedulerConfig {
    pub max_time_per_degree: TimePerDegree,
    pub max_sample_age: Duration,
    pub max_fire_horizon: Duration,
    pub min_lead: Duration,
}

impl SchedulerConfig {
    pub const DEFAULT: Self = Self {
        max_time_per_degree: DEFAULT_MAX_TIME_PER_DEGREE,
        max_sample_age: DEFAULT_MAX_SAMPLE_AGE,
        max_fire_horizon: DEFAULT_MAX_FIRE_HORIZON,
        min_lead: DEFAULT_MIN_LEAD,
    };
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One output pulse expressed in the angle domain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EventRequest {
    pub channel: ChannelId,
    /// Angle at which the output is energised.
    pub angle: CrankAngle,
    /// How long the output stays energised.
    pub width: Duration,
    pub cycle: EngineCycle,
    /// An armed event closer than this many degrees is left untouched.
    pub guard_degrees: u16,
}

/// Why a request was not armed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RefusalReason {
    /// Time-per-degree is zero.
    EngineStopped,
    /// Time-per-degree exceeds the configured ceiling.
    TimePerDegreeCeiling,
    /// The position sample is older than the configured limit.
    SampleExpired,
    /// The computed fire time lies beyond the configured horizon.
    FireHorizon,
}

impl RefusalReason {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            RefusalReason::EngineStopped => 0,
            RefusalReason::TimePerDegreeCeiling => 1,
            RefusalReason::SampleExpired => 2,
            RefusalReason::FireHorizon => 3,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(RefusalReason::EngineStopped),
            1 => Some(RefusalReason::TimePerDegreeCeiling),
            2 => Some(RefusalReason::SampleExpired),
            3 => Some(RefusalReason::FireHorizon),
            _ => None,
        }
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefusalReason::EngineStopped => f.write_str("engine stopped"),
            RefusalReason::TimePerDegreeCeiling => f.write_str("time-per-degree above ceiling"),
            RefusalReason::SampleExpired => f.write_str("position sample expired"),
            RefusalReason::FireHorizon => f.write_str("fire time beyond horizon"),
        }
    }
}

/// Result of [`EventScheduler::schedule`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScheduleOutcome {
    /// The compare is armed; `replaced` is set when an armed event was superseded.
    Armed { fire_at: Ticks, replaced: bool },
    /// The channel is mid-pulse; the event starts once the pulse ends.
    Queued { fire_at: Ticks },
    /// An imminent armed event was left in place.
    Retained,
    /// A zero-width request cancelled the channel.
    Cancelled,
    /// Nothing was armed and any pending event was cancelled.
    Refused(RefusalReason),
}

impl ScheduleOutcome {
    #[must_use]
    pub const fn refusal(self) -> Option<RefusalReason> {
        match self {
            ScheduleOutcome::Refused(reason) => Some(reason),
            _ => None,
        }
    }

    #[must_use]
    pub const fn fire_at(self) -> Option<Ticks> {
        match self {
            ScheduleOutcome::Armed { fire_at, .. } | ScheduleOutcome::Queued { fire_at } => {
                Some(fire_at)
            }
            _ => None,
        }
    }
}

/// Outcomes of one command's delivery, one entry per channel submitted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeliveryReport {
    entries: [Option<(ChannelId, ScheduleOutcome)>; DELIVERY_CAPACITY],
}

/// Channels a single command can address.
pub const DELIVERY_CAPACITY: usize = 4;

impl DeliveryReport {
    pub const EMPTY: Self = Self {
        entries: [None; DELIVERY_CAPACITY],
    };

    /// Stores the outcome for `channel`; extra entries beyond capacity are dropped.
    pub fn push(&mut self, channel: ChannelId, outcome: ScheduleOutcome) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.is_none()) {
            *entry = Some((channel, outcome));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, ScheduleOutcome)> + '_ {
        self.entries.iter().flatten().copied()
    }

    /// Channels whose request was refused, with the reason.
    pub fn refusals(&self) -> impl Iterator<Item = (ChannelId, RefusalReason)> + '_ {
        self.iter()
            .filter_map(|(channel, outcome)| outcome.refusal().map(|reason| (channel, reason)))
    }

    /// Number of channels armed or queued by this delivery.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.iter()
            .filter(|(_, outcome)| {
                matches!(
                    outcome,
                    ScheduleOutcome::Armed { .. }
                        | ScheduleOutcome::Queued { .. }
                        | ScheduleOutcome::Retained
                )
            })
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }
}

/// Lifecycle of a channel slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelState {
    Idle,
    /// The start edge is programmed.
    Armed,
    /// The output is energised and the end edge is programmed.
    Fired,
}

impl ChannelState {
    const fn to_raw(self) -> u8 {
        match self {
            ChannelState::Idle => 0,
            ChannelState::Armed => 1,
            ChannelState::Fired => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ChannelState::Armed,
            2 => ChannelState::Fired,
            _ => ChannelState::Idle,
        }
    }
}

/// Point-in-time copy of a channel slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelSnapshot {
    pub state: ChannelState,
    pub fire_at: Ticks,
    pub width: Duration,
    pub angle: CrankAngle,
    pub queued: bool,
    pub fired: u32,
    pub cancelled: u32,
}

struct ChannelSlot {
    state: AtomicU8,
    fire_at: AtomicU32,
    width_us: AtomicU32,
    angle: AtomicU16,
    queued: AtomicBool,
    queued_fire_at: AtomicU32,
    queued_width_us: AtomicU32,
    queued_angle: AtomicU16,
    fired: AtomicU32,
    cancelled: AtomicU32,
}

#[allow(clippy::declare_interior_mutable_const)]
const IDLE_SLOT: ChannelSlot = ChannelSlot::new();

impl ChannelSlot {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            fire_at: AtomicU32::new(0),
            width_us: AtomicU32::new(0),
            angle: AtomicU16::new(0),
            queued: AtomicBool::new(false),
            queued_fire_at: AtomicU32::new(0),
            queued_width_us: AtomicU32::new(0),
            queued_angle: AtomicU16::new(0),
            fired: AtomicU32::new(0),
            cancelled: AtomicU32::new(0),
        }
    }

    fn state(&self) -> ChannelState {
        ChannelState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state.to_raw(), Ordering::Release);
    }

    fn arm(&self, fire_at: Ticks, width_us: u32, angle: CrankAngle) {
        self.fire_at.store(fire_at.as_micros(), Ordering::Relaxed);
        self.width_us.store(width_us, Ordering::Relaxed);
        self.angle.store(angle.degrees(), Ordering::Relaxed);
        self.set_state(ChannelState::Armed);
    }

    fn queue(&self, fire_at: Ticks, width_us: u32, angle: CrankAngle) {
        self.queued_fire_at
            .store(fire_at.as_micros(), Ordering::Relaxed);
        self.queued_width_us.store(width_us, Ordering::Relaxed);
        self.queued_angle.store(angle.degrees(), Ordering::Relaxed);
        self.queued.store(true, Ordering::Release);
    }

    fn take_queued(&self) -> Option<(Ticks, u32, CrankAngle)> {
        if !self.queued.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some((
            Ticks(self.queued_fire_at.load(Ordering::Relaxed)),
            self.queued_width_us.load(Ordering::Relaxed),
            CrankAngle::new(self.queued_angle.load(Ordering::Relaxed)),
        ))
    }

    fn fire_at(&self) -> Ticks {
        Ticks(self.fire_at.load(Ordering::Relaxed))
    }
}

/// Owner of every pending output event.
pub struct EventScheduler {
    config: SchedulerConfig,
    slots: [ChannelSlot; CHANNEL_COUNT],
}

impl EventScheduler {
    /// Creates a scheduler with every channel idle.
    #[must_use]
    pub const fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            slots: [IDLE_SLOT; CHANNEL_COUNT],
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Converts `request` into a fire time and arms, re-arms or queues it.
    ///
    /// Any earlier pending event on the channel is superseded. A refused request
    /// cancels the pending event so the output stays off for this cycle; a pulse
    /// already in progress is allowed to finish.
    pub fn schedule<H>(
        &self,
        hw: &mut H,
        request: &EventRequest,
        position: &EnginePosition,
    ) -> ScheduleOutcome
    where
        H: CompareHardware,
    {
        let channel = request.channel;
        if request.width.is_zero() {
            self.cancel(hw, channel);
            return ScheduleOutcome::Cancelled;
        }

        let now = hw.now();
        let fire_at = match self.fire_time(request, position, now) {
            Ok(fire_at) => fire_at,
            Err(reason) => {
                self.cancel(hw, channel);
                return ScheduleOutcome::Refused(reason);
            }
        };
        let width_us = u32::try_from(request.width.as_micros()).unwrap_or(u32::MAX);

        let slot = &self.slots[channel.slot()];
        let mut hw = MaskedChannel::new(hw, channel);
        match slot.state() {
            ChannelState::Idle => {
                slot.arm(fire_at, width_us, request.angle);
                hw.set_compare(channel, fire_at);
                ScheduleOutcome::Armed {
                    fire_at,
                    replaced: false,
                }
            }
            ChannelState::Armed => {
                if self.is_imminent(slot, request, position.time_per_degree, now) {
                    return ScheduleOutcome::Retained;
                }
                hw.clear_compare(channel);
                slot.cancelled.fetch_add(1, Ordering::Relaxed);
                slot.arm(fire_at, width_us, request.angle);
                hw.set_compare(channel, fire_at);
                ScheduleOutcome::Armed {
                    fire_at,
                    replaced: true,
                }
            }
            ChannelState::Fired => {
                slot.queue(fire_at, width_us, request.angle);
                ScheduleOutcome::Queued { fire_at }
            }
        }
    }

    /// Drops the pending event of `channel`. Returns `true` when an armed event
    /// was removed; an energised output still completes its pulse.
    pub fn cancel<H>(&self, hw: &mut H, channel: ChannelId) -> bool
    where
        H: CompareHardware,
    {
        let slot = &self.slots[channel.slot()];
        let mut hw = MaskedChannel::new(hw, channel);
        match slot.state() {
            ChannelState::Armed => {
                hw.clear_compare(channel);
                slot.set_state(ChannelState::Idle);
                slot.cancelled.fetch_add(1, Ordering::Relaxed);
                true
            }
            ChannelState::Fired => {
                slot.queued.store(false, Ordering::Release);
                false
            }
            ChannelState::Idle => false,
        }
    }

    /// Cancels every channel in `mask`.
    pub fn cancel_all<H>(&self, hw: &mut H, mask: ChannelMask)
    where
        H: CompareHardware,
    {
        for channel in mask.iter() {
            self.cancel(hw, channel);
        }
    }

    /// Stops everything immediately, including pulses in progress.
    pub fn shutdown<H, O>(&self, hw: &mut H, outputs: &mut O)
    where
        H: CompareHardware,
        O: OutputDriver,
    {
        for slot in 0..CHANNEL_COUNT {
            let Some(channel) = ChannelId::from_slot(slot) else {
                continue;
            };
            let mut hw = MaskedChannel::new(hw, channel);
            hw.clear_compare(channel);
            self.slots[slot].queued.store(false, Ordering::Release);
            self.slots[slot].set_state(ChannelState::Idle);
        }
        outputs.release_all();
    }

    /// Compare-match handler for `channel`, called from its interrupt.
    ///
    /// Returns the output action taken, or `None` for a spurious match.
    pub fn on_compare_match<H, O>(
        &self,
        hw: &mut H,
        outputs: &mut O,
        channel: ChannelId,
    ) -> Option<OutputAction>
    where
        H: CompareHardware,
        O: OutputDriver,
    {
        let slot = &self.slots[channel.slot()];
        match slot.state() {
            ChannelState::Armed => {
                outputs.apply(channel, OutputAction::Energize);
                let width = Duration::from_micros(u64::from(slot.width_us.load(Ordering::Relaxed)));
                // A late start interrupt must not leave the end compare behind
                // the counter, where it would only match after a full wrap.
                let end = slot.fire_at() + width;
                let earliest = hw.now() + self.config.min_lead;
                let end = if end.is_before(earliest) { earliest } else { end };
                slot.set_state(ChannelState::Fired);
                slot.fired.fetch_add(1, Ordering::Relaxed);
                hw.set_compare(channel, end);
                Some(OutputAction::Energize)
            }
            ChannelState::Fired => {
                outputs.apply(channel, OutputAction::Release);
                if let Some((fire_at, width_us, angle)) = slot.take_queued() {
                    let earliest = hw.now() + self.config.min_lead;
                    let fire_at = if fire_at.is_before(earliest) {
                        earliest
                    } else {
                        fire_at
                    };
                    slot.arm(fire_at, width_us, angle);
                    hw.set_compare(channel, fire_at);
                } else {
                    slot.set_state(ChannelState::Idle);
                    hw.clear_compare(channel);
                }
                Some(OutputAction::Release)
            }
            ChannelState::Idle => {
                hw.clear_compare(channel);
                None
            }
        }
    }

    /// Copies the current slot of `channel`.
    #[must_use]
    pub fn snapshot(&self, channel: ChannelId) -> ChannelSnapshot {
        let slot = &self.slots[channel.slot()];
        ChannelSnapshot {
            state: slot.state(),
            fire_at: slot.fire_at(),
            width: Duration::from_micros(u64::from(slot.width_us.load(Ordering::Relaxed))),
            angle: CrankAngle::new(slot.angle.load(Ordering::Relaxed)),
            queued: slot.queued.load(Ordering::Acquire),
            fired: slot.fired.load(Ordering::Relaxed),
            cancelled: slot.cancelled.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn state(&self, channel: ChannelId) -> ChannelState {
        self.slots[channel.slot()].state()
    }

    /// Computes the absolute start time for `request`.
    ///
    /// The target is normalised forward from the sampled angle. When time spent
    /// since the sample has already carried the crank past the target, the event
    /// moves to the next cycle.
    fn fire_time(
        &self,
        request: &EventRequest,
        position: &EnginePosition,
        now: Ticks,
    ) -> Result<Ticks, RefusalReason> {
        let tpd = position.time_per_degree;
        if tpd.is_stopped() {
            return Err(RefusalReason::EngineStopped);
        }
        if tpd > self.config.max_time_per_degree {
            return Err(RefusalReason::TimePerDegreeCeiling);
        }
        let age = position.age(now);
        if age > self.config.max_sample_age {
            return Err(RefusalReason::SampleExpired);
        }

        let delta = position
            .crank_angle
            .degrees_until(request.angle, request.cycle);
        let mut offset = tpd.span(u32::from(delta)).as_nanos();
        let age_ns = age.as_nanos();
        if offset < age_ns {
            let cycle_ns = tpd.span(u32::from(request.cycle.degrees())).as_nanos();
            offset += (age_ns - offset).div_ceil(cycle_ns) * cycle_ns;
        }
        let earliest = age_ns + self.config.min_lead.as_nanos();
        offset = offset.max(earliest);

        let lead = offset - age_ns;
        if lead > self.config.max_fire_horizon.as_nanos() {
            return Err(RefusalReason::FireHorizon);
        }

        let offset = Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX));
        Ok(position.sampled_at + offset)
    }

    fn is_imminent(
        &self,
        slot: &ChannelSlot,
        request: &EventRequest,
        tpd: TimePerDegree,
        now: Ticks,
    ) -> bool {
        if request.guard_degrees == 0 {
            return false;
        }
        let armed_at = slot.fire_at();
        if !now.is_before(armed_at) {
            return true;
        }
        armed_at.wrapping_since(now) < tpd.span(u32::from(request.guard_degrees))
            || armed_at.wrapping_since(now) < self.config.min_lead
    }
}

/// Destination for commands produced by the calculation engines.
pub trait CommandSink {
    /// Arms `request` relative to `position`.
    fn submit(&mut self, request: &EventRequest, position: &EnginePosition) -> ScheduleOutcome;

    /// Drops any pending event on `channel`.
    fn cancel(&mut self, channel: ChannelId) -> bool;
}

/// Binds the shared scheduler to the compare hardware for one calculation pass.
pub struct SchedulerPort<'a, H>
where
    H: CompareHardware,
{
    scheduler: &'a EventScheduler,
    hw: &'a mut H,
}

impl<'a, H> SchedulerPort<'a, H>
where
    H: CompareHardware,
{
    pub fn new(scheduler: &'a EventScheduler, hw: &'a mut H) -> Self {
        Self { scheduler, hw }
    }
}

impl<H> CommandSink for SchedulerPort<'_, H>
where
    H: CompareHardware,
{
    fn submit(&mut self, request: &EventRequest, position: &EnginePosition) -> ScheduleOutcome {
        self.scheduler.schedule(self.hw, request, position)
    }

    fn cancel(&mut self, channel: ChannelId) -> bool {
        self.scheduler.cancel(self.hw, channel)
    }
}
