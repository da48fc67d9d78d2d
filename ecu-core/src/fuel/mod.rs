//! Injector pulse-width calculation and delivery.
//!
//! [`FuelEngine::fuel_calc`] runs once per engine event: it looks up VE and the
//! AFR target, applies the enrichment and closed-loop trims, clamps the result
//! and hands one request per injector channel to the scheduler. Kill conditions
//! are evaluated on every call before anything else.

use core::time::Duration;

use crate::calibration::CalibrationSet;
use crate::engine::{
    ChannelId, ChannelMask, CrankAngle, EngineLayout, EnginePosition, SensorSnapshot,
};
use crate::scheduler::{CommandSink, DeliveryReport, EventRequest};
use crate::sensors::AfrReading;

mod corrections;

pub use corrections::{
    ACCEL_BINS, ACCEL_PERCENT, DEFAULT_ACCEL_THRESHOLD, DEFAULT_MAX_ENRICHMENT, FuelCorrections,
    NO_ENRICHMENT, NoFuelCorrections, StandardFuelCorrections, WARMUP_BINS, WARMUP_PERCENT,
};

/// Pulse width at 100 % VE, stoichiometric target and 100 kPa.
pub const DEFAULT_REQ_FUEL: Duration = Duration::from_micros(9_500);
/// Time an injector needs to open.
pub const DEFAULT_INJECTOR_OPEN_TIME: Duration = Duration::from_micros(1_000);
pub const DEFAULT_MIN_PULSE_WIDTH: Duration = Duration::from_micros(1_000);
pub const DEFAULT_MAX_PULSE_WIDTH: Duration = Duration::from_micros(25_000);
/// Share of the injection interval an injector may stay open.
pub const DEFAULT_MAX_INJECTOR_DUTY: u8 = 85;
pub const DEFAULT_STOICH_AFR: f32 = 14.7;
/// Degrees before each cylinder's TDC at which its pulse ends.
pub const DEFAULT_INJECTION_END_ANGLE: u16 = 355;
pub const DEFAULT_FUEL_CUT_RPM: u16 = 7_000;

/// Engine load axis used for table lookups.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadSource {
    /// Speed-density: manifold pressure in kPa.
    Map,
    /// Alpha-N: throttle position in percent.
    Tps,
}

/// Closed-loop oxygen trim settings.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EgoConfig {
    pub enabled: bool,
    /// Trim change per engine event, in percent.
    pub step_percent: f32,
    /// Largest trim applied in either direction, in percent.
    pub limit_percent: f32,
    /// Error band (AFR tenths) inside which the trim holds.
    pub deadband_tenths: u16,
    pub min_coolant_c: i16,
    pub min_rpm: u16,
}

impl EgoConfig {
    pub const DEFAULT: Self = Self {
        enabled: true,
        step_percent: 0.5,
        limit_percent: 15.0,
        deadband_tenths: 1,
        min_coolant_c: 60,
        min_rpm: 800,
    };
}

impl Default for EgoConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Fuel calculation settings.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FuelConfig {
    pub req_fuel: Duration,
    pub injector_open_time: Duration,
    pub min_pulse_width: Duration,
    pub max_pulse_width: Duration,
    pub max_duty_percent: u8,
    pub stoich_afr: f32,
    pub load_source: LoadSource,
    /// Scale the pulse by MAP/100 in speed-density mode.
    pub multiply_map: bool,
    pub injection_end_angle: u16,
    pub fuel_cut_rpm: u16,
    pub ego: EgoConfig,
}

impl FuelConfig {
    pub const DEFAULT: Self = Self {
        req_fuel: DEFAULT_REQ_FUEL,
        injector_open_time: DEFAULT_INJECTOR_OPEN_TIME,
        min_pulse_width: DEFAULT_MIN_PULSE_WIDTH,
        max_pulse_width: DEFAULT_MAX_PULSE_WIDTH,
        max_duty_percent: DEFAULT_MAX_INJECTOR_DUTY,
        stoich_afr: DEFAULT_STOICH_AFR,
        load_source: LoadSource::Map,
        multiply_map: true,
        injection_end_angle: DEFAULT_INJECTION_END_ANGLE,
        fuel_cut_rpm: DEFAULT_FUEL_CUT_RPM,
        ego: EgoConfig::DEFAULT,
    };
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Why injection is suppressed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FuelCut {
    /// The fuel enable input is off.
    Disabled,
    /// Engine speed reached the fuel cut limit.
    OverRev,
    /// No calibration is loaded.
    NoCalibration,
}

impl FuelCut {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            FuelCut::Disabled => 0,
            FuelCut::OverRev => 1,
            FuelCut::NoCalibration => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0 => Some(FuelCut::Disabled),
            1 => Some(FuelCut::OverRev),
            2 => Some(FuelCut::NoCalibration),
            _ => None,
        }
    }
}

/// Result of one fuel calculation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FuelCommand {
    pub pulse_width: Duration,
    pub channels: ChannelMask,
    pub enabled: bool,
    /// Start angle of the first injector channel.
    pub start_angle: CrankAngle,
    pub ve: f32,
    /// AFR target after lookup, as a ratio.
    pub afr_target: f32,
    pub enrichment_percent: u16,
    pub ego_trim_percent: f32,
    pub closed_loop: bool,
    /// The wideband reading could not be used this event.
    pub wideband_fallback: bool,
    pub ve_clamped: bool,
    pub afr_clamped: bool,
    pub cut: Option<FuelCut>,
    pub delivery: DeliveryReport,
}

impl FuelCommand {
    /// A command that keeps every injector closed.
    #[must_use]
    pub const fn cut(reason: FuelCut, channels: ChannelMask) -> Self {
        Self {
            pulse_width: Duration::ZERO,
            channels,
            enabled: false,
            start_angle: CrankAngle::new(0),
            ve: 0.0,
            afr_target: 0.0,
            enrichment_percent: NO_ENRICHMENT,
            ego_trim_percent: 0.0,
            closed_loop: false,
            wideband_fallback: false,
            ve_clamped: false,
            afr_clamped: false,
            cut: Some(reason),
            delivery: DeliveryReport::EMPTY,
        }
    }
}

/// Fuel calculation engine with its closed-loop state.
pub struct FuelEngine<C = StandardFuelCorrections>
where
    C: FuelCorrections,
{
    config: FuelConfig,
    layout: EngineLayout,
    corrections: C,
    ego_trim: f32,
}

impl<C> FuelEngine<C>
where
    C: FuelCorrections,
{
    pub fn new(config: FuelConfig, layout: EngineLayout, corrections: C) -> Self {
        Self {
            config,
            layout,
            corrections,
            ego_trim: 0.0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &FuelConfig {
        &self.config
    }

    /// Current closed-loop trim in percent.
    #[must_use]
    pub const fn ego_trim(&self) -> f32 {
        self.ego_trim
    }

    pub fn corrections_mut(&mut self) -> &mut C {
        &mut self.corrections
    }

    /// Checks the kill conditions; `None` when injection may proceed.
    #[must_use]
    pub fn cut_reason(&self, position: &EnginePosition, fuel_enabled: bool) -> Option<FuelCut> {
        if !fuel_enabled {
            Some(FuelCut::Disabled)
        } else if position.rpm() >= self.config.fuel_cut_rpm {
            Some(FuelCut::OverRev)
        } else {
            None
        }
    }

    /// Calculates the pulse width for this engine event and schedules it.
    pub fn fuel_calc<S>(
        &mut self,
        tables: &CalibrationSet,
        position: &EnginePosition,
        sensors: &SensorSnapshot,
        fuel_enabled: bool,
        sink: &mut S,
    ) -> FuelCommand
    where
        S: CommandSink,
    {
        let channels = self.layout.injector_mask();
        if let Some(reason) = self.cut_reason(position, fuel_enabled) {
            self.ego_trim = 0.0;
            return cut_channels(reason, channels, sink);
        }

        let mut command = self.compute(tables, position, sensors);
        command.delivery = self.deliver(command.pulse_width, position, sink);
        command
    }

    /// Pulse-width calculation without delivery.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn compute(
        &mut self,
        tables: &CalibrationSet,
        position: &EnginePosition,
        sensors: &SensorSnapshot,
    ) -> FuelCommand {
        let rpm = position.rpm();
        let load = match self.config.load_source {
            LoadSource::Map => sensors.map_kpa,
            LoadSource::Tps => u16::from(sensors.tps_percent),
        };

        let ve = tables.ve.lookup(rpm, load);
        let afr = tables.afr_target.lookup(rpm, load);
        let afr_target = if afr.value > 0.0 {
            afr.value
        } else {
            self.config.stoich_afr
        };
        let closed_loop = self.update_ego(rpm, sensors, afr_target);
        let enrichment = self.corrections.enrichment(rpm, sensors);

        let mut fuel = micros(self.config.req_fuel) * ve.value.max(0.0) / 100.0;
        if self.config.load_source == LoadSource::Map && self.config.multiply_map {
            fuel *= f32::from(sensors.map_kpa) / 100.0;
        }
        fuel *= self.config.stoich_afr / afr_target;
        fuel *= f32::from(enrichment) / 100.0;
        fuel *= 1.0 + self.ego_trim / 100.0;
        fuel /= f32::from(self.layout.squirts_per_cycle());

        let open = micros(self.config.injector_open_time);
        let min = micros(self.config.min_pulse_width);
        let max = self.max_pulse_width(position).max(min);
        let pulse_us = (fuel.max(0.0) + open).max(min).min(max);

        let pulse_width = Duration::from_micros(pulse_us as u64);
        FuelCommand {
            pulse_width,
            channels: self.layout.injector_mask(),
            enabled: true,
            start_angle: self.start_angle(0, pulse_width, position),
            ve: ve.value,
            afr_target,
            enrichment_percent: enrichment,
            ego_trim_percent: self.ego_trim,
            closed_loop,
            wideband_fallback: sensors.wideband.valid().is_none(),
            ve_clamped: ve.clamped,
            afr_clamped: afr.clamped,
            cut: None,
            delivery: DeliveryReport::EMPTY,
        }
    }

    /// Longest pulse allowed by the duty limit at the current speed.
    fn max_pulse_width(&self, position: &EnginePosition) -> f32 {
        let configured = micros(self.config.max_pulse_width);
        let tpd = position.time_per_degree;
        if tpd.is_stopped() {
            return configured;
        }
        let cycle = u32::from(self.layout.injection_cycle().degrees());
        let interval = micros(tpd.span(cycle));
        let duty = interval * f32::from(self.config.max_duty_percent) / 100.0;
        configured.min(duty)
    }

    /// Angle at which injector `index` opens so it closes at the end angle.
    #[allow(clippy::cast_possible_wrap)]
    fn start_angle(&self, index: u8, pulse_width: Duration, position: &EnginePosition) -> CrankAngle {
        let tdc = i32::from(self.layout.injector_tdc(index).degrees());
        let end = tdc - i32::from(self.config.injection_end_angle);
        let cycle = u32::from(self.layout.injection_cycle().degrees());
        let pulse_degrees = position.time_per_degree.degrees_in(pulse_width).min(cycle) as i32;
        CrankAngle::wrapping(end - pulse_degrees)
    }

    fn deliver<S>(
        &self,
        pulse_width: Duration,
        position: &EnginePosition,
        sink: &mut S,
    ) -> DeliveryReport
    where
        S: CommandSink,
    {
        let mut report = DeliveryReport::EMPTY;
        for index in 0..self.layout.injector_channels() {
            let channel = ChannelId::Injector(index);
            let request = EventRequest {
                channel,
                angle: self.start_angle(index, pulse_width, position),
                width: pulse_width,
                cycle: self.layout.injection_cycle(),
                guard_degrees: position.trigger_tooth_angle,
            };
            report.push(channel, sink.submit(&request, position));
        }
        report
    }

    /// Steps the closed-loop trim; returns `true` while in closed loop.
    fn update_ego(&mut self, rpm: u16, sensors: &SensorSnapshot, afr_target: f32) -> bool {
        let ego = self.config.ego;
        let measured = match sensors.wideband {
            AfrReading::Valid(afr) => afr.ratio(),
            AfrReading::Unavailable | AfrReading::OutOfRange => {
                self.ego_trim = 0.0;
                return false;
            }
        };
        if !ego.enabled || sensors.coolant_c < ego.min_coolant_c || rpm < ego.min_rpm {
            self.ego_trim = 0.0;
            return false;
        }

        let deadband = f32::from(ego.deadband_tenths) / 10.0;
        if measured > afr_target + deadband {
            self.ego_trim += ego.step_percent;
        } else if measured < afr_target - deadband {
            self.ego_trim -= ego.step_percent;
        }
        self.ego_trim = self
            .ego_trim
            .max(-ego.limit_percent)
            .min(ego.limit_percent);
        true
    }
}

fn cut_channels<S>(reason: FuelCut, channels: ChannelMask, sink: &mut S) -> FuelCommand
where
    S: CommandSink,
{
    for channel in channels.iter() {
        sink.cancel(channel);
    }
    FuelCommand::cut(reason, channels)
}

#[allow(clippy::cast_precision_loss)]
fn micros(duration: Duration) -> f32 {
    duration.as_micros() as f32
}
