#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! The calculation task publishes the outcome of every engine event into
//! lightweight atomics so the display and logging tasks can read a consistent
//! enough [`EngineStatus`] without sharing the controller itself.

use core::time::Duration;

use ecu_core::controller::CycleReport;
use portable_atomic::{AtomicI16, AtomicU8, AtomicU16, AtomicU32, Ordering};

const FUEL_CUT: u8 = 1 << 0;
const SPARK_CUT: u8 = 1 << 1;
const CLOSED_LOOP: u8 = 1 << 2;
const WIDEBAND_FALLBACK: u8 = 1 << 3;

static RPM: AtomicU16 = AtomicU16::new(0);
static PULSE_WIDTH_US: AtomicU32 = AtomicU32::new(0);
static ADVANCE: AtomicI16 = AtomicI16::new(0);
static DWELL_US: AtomicU32 = AtomicU32::new(0);
static FLAGS: AtomicU8 = AtomicU8::new(FUEL_CUT | SPARK_CUT);
/// Schedules refused since boot.
static REFUSALS: AtomicU32 = AtomicU32::new(0);
/// Engine events processed since boot.
static EVENTS: AtomicU32 = AtomicU32::new(0);
static CALIBRATION_EPOCH: AtomicU32 = AtomicU32::new(0);

/// Point-in-time view of the engine outputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineStatus {
    pub rpm: u16,
    pub pulse_width: Duration,
    pub advance: i16,
    pub dwell: Duration,
    pub fuel_cut: bool,
    pub spark_cut: bool,
    pub closed_loop: bool,
    pub wideband_fallback: bool,
    pub refusals: u32,
    pub events: u32,
    pub calibration_epoch: u32,
}

fn micros(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros()).unwrap_or(u32::MAX)
}

/// Stores the results of one engine event.
pub fn record_cycle(report: &CycleReport) {
    let mut flags = 0;
    if report.fuel.cut.is_some() {
        flags |= FUEL_CUT;
    }
    if report.ignition.cut.is_some() {
        flags |= SPARK_CUT;
    }
    if report.fuel.closed_loop {
        flags |= CLOSED_LOOP;
    }
    if report.fuel.wideband_fallback {
        flags |= WIDEBAND_FALLBACK;
    }

    let refused = report.fuel.delivery.refusals().count() + report.ignition.delivery.refusals().count();

    RPM.store(report.frame.rpm, Ordering::Relaxed);
    PULSE_WIDTH_US.store(micros(report.fuel.pulse_width), Ordering::Relaxed);
    ADVANCE.store(report.ignition.advance, Ordering::Relaxed);
    DWELL_US.store(micros(report.ignition.dwell), Ordering::Relaxed);
    FLAGS.store(flags, Ordering::Relaxed);
    REFUSALS.fetch_add(u32::try_from(refused).unwrap_or(u32::MAX), Ordering::Relaxed);
    EVENTS.fetch_add(1, Ordering::Relaxed);
}

/// Records the epoch of the calibration now in use.
pub fn record_calibration_epoch(epoch: u32) {
    CALIBRATION_EPOCH.store(epoch, Ordering::Relaxed);
}

/// Marks the engine stopped after a trigger stall.
pub fn record_stall() {
    RPM.store(0, Ordering::Relaxed);
    PULSE_WIDTH_US.store(0, Ordering::Relaxed);
    DWELL_US.store(0, Ordering::Relaxed);
}

/// Builds an [`EngineStatus`] from the stored values.
pub fn snapshot() -> EngineStatus {
    let flags = FLAGS.load(Ordering::Relaxed);
    EngineStatus {
        rpm: RPM.load(Ordering::Relaxed),
        pulse_width: Duration::from_micros(u64::from(PULSE_WIDTH_US.load(Ordering::Relaxed))),
        advance: ADVANCE.load(Ordering::Relaxed),
        dwell: Duration::from_micros(u64::from(DWELL_US.load(Ordering::Relaxed))),
        fuel_cut: flags & FUEL_CUT != 0,
        spark_cut: flags & SPARK_CUT != 0,
        closed_loop: flags & CLOSED_LOOP != 0,
        wideband_fallback: flags & WIDEBAND_FALLBACK != 0,
        refusals: REFUSALS.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        calibration_epoch: CALIBRATION_EPOCH.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecu_core::display::DisplayFrame;
    use ecu_core::engine::{ChannelId, ChannelMask};
    use ecu_core::fuel::{FuelCommand, FuelCut};
    use ecu_core::ignition::{IgnitionCommand, SparkCut};
    use ecu_core::scheduler::{RefusalReason, ScheduleOutcome};
    use ecu_core::sensors::AfrReading;

    #[test]
    fn cycle_results_round_trip_through_the_atomics() {
        let mut fuel = FuelCommand::cut(FuelCut::OverRev, ChannelMask::injectors(4));
        fuel.delivery.push(
            ChannelId::Injector(0),
            ScheduleOutcome::Refused(RefusalReason::SampleExpired),
        );
        let mut ignition = IgnitionCommand::cut(SparkCut::Disabled, ChannelMask::coils(4));
        ignition.cut = None;
        ignition.advance = 18;
        ignition.dwell = Duration::from_micros(2_500);
        let frame = DisplayFrame::from_commands(7100, &fuel, &ignition, AfrReading::Unavailable, 0);

        let before = snapshot();
        record_cycle(&CycleReport {
            fuel,
            ignition,
            frame,
        });
        let status = snapshot();

        assert_eq!(status.rpm, 7100);
        assert_eq!(status.advance, 18);
        assert_eq!(status.dwell, Duration::from_micros(2_500));
        assert!(status.fuel_cut);
        assert!(!status.spark_cut);
        assert_eq!(status.refusals, before.refusals + 1);
        assert_eq!(status.events, before.events + 1);
    }
}
