//! Spark advance and dwell calculation.

use core::time::Duration;

use crate::calibration::CalibrationSet;
use crate::engine::{
    ChannelId, ChannelMask, CrankAngle, EngineLayout, EnginePosition, SensorSnapshot,
};
use crate::scheduler::{CommandSink, DeliveryReport, EventRequest};

mod corrections;

pub use corrections::{
    DEFAULT_IDLE_TARGET_RPM, DEFAULT_IDLE_TPS, DEFAULT_MAX_KNOCK_RETARD, DWELL_VOLTAGE_BINS,
    DWELL_VOLTAGE_PERCENT, IDLE_ADVANCE, IDLE_ERROR_BINS, IgnitionCorrections,
    NO_DWELL_CORRECTION, NoIgnitionCorrections, StandardIgnitionCorrections,
};
use corrections::round_degrees;

pub const DEFAULT_MIN_ADVANCE: i16 = -10;
pub const DEFAULT_MAX_ADVANCE: i16 = 45;
pub const DEFAULT_REV_LIMIT_RPM: u16 = 7_200;
pub const DEFAULT_BASE_DWELL: Duration = Duration::from_micros(3_000);
pub const DEFAULT_MIN_DWELL: Duration = Duration::from_micros(1_200);
pub const DEFAULT_MAX_DWELL: Duration = Duration::from_micros(8_000);
/// Share of the time between sparks a coil may spend charging.
pub const DEFAULT_MAX_DWELL_DUTY: u8 = 50;

/// Ignition calculation settings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IgnitionConfig {
    pub min_advance: i16,
    pub max_advance: i16,
    pub rev_limit_rpm: u16,
    pub base_dwell: Duration,
    pub min_dwell: Duration,
    pub max_dwell: Duration,
    pub max_dwell_duty_percent: u8,
}

impl IgnitionConfig {
    pub const DEFAULT: Self = Self {
        min_advance: DEFAULT_MIN_ADVANCE,
        max_advance: DEFAULT_MAX_ADVANCE,
        rev_limit_rpm: DEFAULT_REV_LIMIT_RPM,
        base_dwell: DEFAULT_BASE_DWELL,
        min_dwell: DEFAULT_MIN_DWELL,
        max_dwell: DEFAULT_MAX_DWELL,
        max_dwell_duty_percent: DEFAULT_MAX_DWELL_DUTY,
    };
}

impl Default for IgnitionConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Why spark is suppressed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SparkCut {
    Disabled,
    /// Engine speed reached the hard rev limit.
    RevLimit,
    NoCalibration,
}

impl SparkCut {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            SparkCut::Disabled => 0,
            SparkCut::RevLimit => 1,
            SparkCut::NoCalibration => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(SparkCut::Disabled),
            1 => Some(SparkCut::RevLimit),
            2 => Some(SparkCut::NoCalibration),
            _ => None,
        }
    }
}

/// Result of one ignition calculation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IgnitionCommand {
    /// Degrees before TDC.
    pub advance: i16,
    pub dwell: Duration,
    /// Spark angle of the first coil.
    pub spark_angle: CrankAngle,
    /// Charge start angle of the first coil.
    pub charge_angle: CrankAngle,
    pub channels: ChannelMask,
    pub enabled: bool,
    pub advance_clamped: bool,
    pub table_clamped: bool,
    pub cut: Option<SparkCut>,
    pub delivery: DeliveryReport,
}

impl IgnitionCommand {
    /// A command that charges no coil.
    #[must_use]
    pub const fn cut(reason: SparkCut, channels: ChannelMask) -> Self {
        Self {
            advance: 0,
            dwell: Duration::ZERO,
            spark_angle: CrankAngle::new(0),
            charge_angle: CrankAngle::new(0),
            channels,
            enabled: false,
            advance_clamped: false,
            table_clamped: false,
            cut: Some(reason),
            delivery: DeliveryReport::EMPTY,
        }
    }
}

/// Ignition calculation engine.
pub struct IgnitionEngine<C = StandardIgnitionCorrections>
where
    C: IgnitionCorrections,
{
    config: IgnitionConfig,
    layout: EngineLayout,
    corrections: C,
}

impl<C> IgnitionEngine<C>
where
    C: IgnitionCorrections,
{
    pub fn new(config: IgnitionConfig, layout: EngineLayout, corrections: C) -> Self {
        Self {
            config,
            layout,
            corrections,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &IgnitionConfig {
        &self.config
    }

    pub fn corrections_mut(&mut self) -> &mut C {
        &mut self.corrections
    }

    /// Checks the kill conditions; `None` when spark may proceed.
    #[must_use]
    pub fn cut_reason(&self, position: &EnginePosition, ignition_enabled: bool) -> Option<SparkCut> {
        if !ignition_enabled {
            Some(SparkCut::Disabled)
        } else if position.rpm() >= self.config.rev_limit_rpm {
            Some(SparkCut::RevLimit)
        } else {
            None
        }
    }

    /// Calculates advance and dwell for this engine event and schedules the coils.
    pub fn ignition_calc<S>(
        &mut self,
        tables: &CalibrationSet,
        position: &EnginePosition,
        sensors: &SensorSnapshot,
        ignition_enabled: bool,
        sink: &mut S,
    ) -> IgnitionCommand
    where
        S: CommandSink,
    {
        let channels = self.layout.coil_mask();
        if let Some(reason) = self.cut_reason(position, ignition_enabled) {
            for channel in channels.iter() {
                sink.cancel(channel);
            }
            return IgnitionCommand::cut(reason, channels);
        }

        let mut command = self.compute(tables, position, sensors);
        let mut report = DeliveryReport::EMPTY;
        for index in 0..self.layout.coil_channels() {
            let channel = ChannelId::Coil(index);
            let request = EventRequest {
                channel,
                angle: self.charge_angle(index, command.advance, command.dwell, position),
                width: command.dwell,
                cycle: self.layout.spark_cycle(),
                guard_degrees: 0,
            };
            report.push(channel, sink.submit(&request, position));
        }
        command.delivery = report;
        command
    }

    /// Advance and dwell calculation without delivery.
    pub fn compute(
        &mut self,
        tables: &CalibrationSet,
        position: &EnginePosition,
        sensors: &SensorSnapshot,
    ) -> IgnitionCommand {
        let rpm = position.rpm();
        let table = tables.ignition.lookup(rpm, sensors.map_kpa);
        let trim = self.corrections.advance_trim(rpm, sensors);
        let requested = round_degrees(table.value).saturating_add(trim);
        let ceiling = self.config.max_advance.max(self.config.min_advance);
        let advance = requested.clamp(self.config.min_advance, ceiling);

        let dwell_percent = self.corrections.dwell_percent(sensors);
        let dwell = self.dwell(position, dwell_percent);

        IgnitionCommand {
            advance,
            dwell,
            spark_angle: self.spark_angle(0, advance),
            charge_angle: self.charge_angle(0, advance, dwell, position),
            channels: self.layout.coil_mask(),
            enabled: true,
            advance_clamped: advance != requested,
            table_clamped: table.clamped,
            cut: None,
            delivery: DeliveryReport::EMPTY,
        }
    }

    /// Dwell scaled by `percent`, capped by the duty limit, then clamped.
    #[allow(clippy::cast_possible_truncation)]
    fn dwell(&self, position: &EnginePosition, percent: u16) -> Duration {
        let base_us = self.config.base_dwell.as_micros() * u128::from(percent) / 100;
        let mut dwell_us = base_us.min(self.config.max_dwell.as_micros());

        let tpd = position.time_per_degree;
        if !tpd.is_stopped() {
            let spacing = tpd.span(u32::from(self.layout.firing_interval()));
            let cap = spacing.as_micros() * u128::from(self.config.max_dwell_duty_percent) / 100;
            dwell_us = dwell_us.min(cap);
        }
        dwell_us = dwell_us.max(self.config.min_dwell.as_micros());

        Duration::from_micros(dwell_us as u64)
    }

    fn spark_angle(&self, index: u8, advance: i16) -> CrankAngle {
        let tdc = i32::from(self.layout.coil_tdc(index).degrees());
        CrankAngle::wrapping(tdc - i32::from(advance))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn charge_angle(
        &self,
        index: u8,
        advance: i16,
        dwell: Duration,
        position: &EnginePosition,
    ) -> CrankAngle {
        let spark = i32::from(self.spark_angle(index, advance).degrees());
        let cycle = u32::from(self.layout.spark_cycle().degrees());
        let dwell_degrees = position.time_per_degree.degrees_in(dwell).min(cycle) as i32;
        CrankAngle::wrapping(spark - dwell_degrees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CALIBRATION_VERSION, Map8, Map16};
    use crate::engine::{Ticks, TimePerDegree};
    use crate::scheduler::ScheduleOutcome;
    use heapless::Vec;

    #[derive(Default)]
    struct RecordingSink {
        submitted: Vec<EventRequest, 8>,
        cancelled: Vec<ChannelId, 8>,
    }

    impl CommandSink for RecordingSink {
        fn submit(&mut self, request: &EventRequest, _position: &EnginePosition) -> ScheduleOutcome {
            self.submitted.push(*request).expect("submit capacity");
            ScheduleOutcome::Armed {
                fire_at: Ticks(0),
                replaced: false,
            }
        }

        fn cancel(&mut self, channel: ChannelId) -> bool {
            self.cancelled.push(channel).expect("cancel capacity");
            true
        }
    }

    const RPM: [u16; 2] = [1000, 6000];
    const LOAD: [u16; 2] = [20, 100];

    fn tables(advance: f32) -> CalibrationSet {
        CalibrationSet {
            version: CALIBRATION_VERSION,
            ve: Map16::uniform(&RPM, &LOAD, 80.0).expect("ve"),
            ignition: Map16::uniform(&RPM, &LOAD, advance).expect("ignition"),
            afr_target: Map16::uniform(&RPM, &LOAD, 14.7).expect("afr"),
            boost_target: Map8::uniform(&RPM, &LOAD, 100.0).expect("boost"),
        }
    }

    fn engine() -> IgnitionEngine<NoIgnitionCorrections> {
        IgnitionEngine::new(
            IgnitionConfig::DEFAULT,
            EngineLayout::FOUR_CYLINDER_SEQUENTIAL,
            NoIgnitionCorrections,
        )
    }

    fn position(rpm: u16) -> EnginePosition {
        EnginePosition::new(CrankAngle::new(0), TimePerDegree::from_rpm(rpm), 30, Ticks(0))
    }

    #[test]
    fn advance_comes_from_table_and_is_clamped() {
        let mut ignition = engine();
        let sensors = SensorSnapshot::DEFAULT;
        let normal = ignition.compute(&tables(20.0), &position(3000), &sensors);
        assert_eq!(normal.advance, 20);
        assert!(!normal.advance_clamped);

        let excessive = ignition.compute(&tables(60.0), &position(3000), &sensors);
        assert_eq!(excessive.advance, DEFAULT_MAX_ADVANCE);
        assert!(excessive.advance_clamped);
    }

    #[test]
    fn dwell_shrinks_as_rpm_rises() {
        let mut ignition = engine();
        let sensors = SensorSnapshot::DEFAULT;
        let idle = ignition.compute(&tables(15.0), &position(1000), &sensors).dwell;
        let high = ignition.compute(&tables(15.0), &position(7000), &sensors).dwell;
        assert_eq!(idle, DEFAULT_BASE_DWELL);
        // 180° at 7000 RPM is about 4.29 ms; half of it is the cap.
        assert_eq!(high, Duration::from_micros(2_142));
        assert!(high < idle);
    }

    #[test]
    fn charge_starts_dwell_degrees_before_the_spark() {
        let mut ignition = engine();
        let pos = EnginePosition::new(CrankAngle::new(0), TimePerDegree::from_micros(50), 30, Ticks(0));
        let command = ignition.compute(&tables(10.0), &pos, &SensorSnapshot::DEFAULT);
        assert_eq!(command.spark_angle.degrees(), 710);
        // 3 ms at 50 µs/° is 60°.
        assert_eq!(command.charge_angle.degrees(), 650);
    }

    #[test]
    fn kill_arms_no_coil() {
        let mut ignition = engine();
        let mut sink = RecordingSink::default();
        let command = ignition.ignition_calc(
            &tables(15.0),
            &position(3000),
            &SensorSnapshot::DEFAULT,
            false,
            &mut sink,
        );
        assert!(!command.enabled);
        assert_eq!(command.cut, Some(SparkCut::Disabled));
        assert!(sink.submitted.is_empty());
        assert_eq!(sink.cancelled.len(), 4);
    }

    #[test]
    fn rev_limit_is_rechecked_each_call() {
        let mut ignition = engine();
        let mut sink = RecordingSink::default();
        let tables = tables(15.0);
        let sensors = SensorSnapshot::DEFAULT;

        let over = ignition.ignition_calc(&tables, &position(7300), &sensors, true, &mut sink);
        assert_eq!(over.cut, Some(SparkCut::RevLimit));
        let below = ignition.ignition_calc(&tables, &position(6000), &sensors, true, &mut sink);
        assert!(below.enabled);
        assert_eq!(sink.submitted.len(), 4);
    }

    #[test]
    fn coil_requests_follow_firing_order_spacing() {
        let mut ignition = engine();
        let mut sink = RecordingSink::default();
        let pos = EnginePosition::new(CrankAngle::new(0), TimePerDegree::from_micros(50), 30, Ticks(0));
        ignition.ignition_calc(&tables(10.0), &pos, &SensorSnapshot::DEFAULT, true, &mut sink);

        let angles: Vec<u16, 8> = sink
            .submitted
            .iter()
            .map(|request| request.angle.degrees())
            .collect();
        assert_eq!(angles.as_slice(), &[650, 110, 290, 470]);
        assert!(sink.submitted.iter().all(|request| request.width == DEFAULT_BASE_DWELL));
    }
}
