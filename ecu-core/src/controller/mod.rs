//! Per-engine-event orchestration of the calculation engines.
//!
//! [`EcuController`] owns the calibration store, both engines and the
//! telemetry ring. Targets call [`EcuController::on_position`] whenever trigger
//! decoding produces a new engine position and supply a [`CommandSink`] bound
//! to their scheduler and compare hardware.

use crate::calibration::{CalibrationError, CalibrationSet, CalibrationStore, TableKind};
use crate::display::{DisplayFrame, DisplaySink};
use crate::engine::{
    CHANNEL_COUNT, ChannelMask, EngineLayout, EnginePosition, OutputEnables, SensorSnapshot,
    Ticks,
};
use crate::fuel::{
    FuelCommand, FuelConfig, FuelCorrections, FuelCut, FuelEngine, StandardFuelCorrections,
};
use crate::ignition::{
    IgnitionCommand, IgnitionConfig, IgnitionCorrections, IgnitionEngine, SparkCut,
    StandardIgnitionCorrections,
};
use crate::scheduler::{CommandSink, DeliveryReport, RefusalReason, SchedulerConfig};
use crate::telemetry::TelemetryRecorder;

/// Start-up configuration for the whole core.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EcuConfig {
    pub layout: EngineLayout,
    pub fuel: FuelConfig,
    pub ignition: IgnitionConfig,
    pub scheduler: SchedulerConfig,
}

impl EcuConfig {
    pub const DEFAULT: Self = Self {
        layout: EngineLayout::FOUR_CYLINDER_SEQUENTIAL,
        fuel: FuelConfig::DEFAULT,
        ignition: IgnitionConfig::DEFAULT,
        scheduler: SchedulerConfig::DEFAULT,
    };
}

impl Default for EcuConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything produced for one engine event.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub fuel: FuelCommand,
    pub ignition: IgnitionCommand,
    pub frame: DisplayFrame,
}

const TABLE_KINDS: usize = 4;

/// Fuel and ignition control for one engine.
pub struct EcuController<FC = StandardFuelCorrections, IC = StandardIgnitionCorrections>
where
    FC: FuelCorrections,
    IC: IgnitionCorrections,
{
    layout: EngineLayout,
    calibration: CalibrationStore,
    fuel: FuelEngine<FC>,
    ignition: IgnitionEngine<IC>,
    telemetry: TelemetryRecorder<Ticks>,
    last_fuel_cut: Option<FuelCut>,
    last_spark_cut: Option<SparkCut>,
    wideband_fallback: bool,
    clamped: [bool; TABLE_KINDS],
    refusals: [Option<RefusalReason>; CHANNEL_COUNT],
}

impl<FC, IC> EcuController<FC, IC>
where
    FC: FuelCorrections,
    IC: IgnitionCorrections,
{
    /// Creates a controller with no calibration loaded; outputs stay disabled
    /// until [`EcuController::load_calibration`] succeeds.
    pub fn new(config: EcuConfig, fuel_corrections: FC, ignition_corrections: IC) -> Self {
        Self {
            layout: config.layout,
            calibration: CalibrationStore::new(),
            fuel: FuelEngine::new(config.fuel, config.layout, fuel_corrections),
            ignition: IgnitionEngine::new(config.ignition, config.layout, ignition_corrections),
            telemetry: TelemetryRecorder::new(),
            last_fuel_cut: None,
            last_spark_cut: None,
            wideband_fallback: false,
            clamped: [false; TABLE_KINDS],
            refusals: [None; CHANNEL_COUNT],
        }
    }

    #[must_use]
    pub const fn layout(&self) -> &EngineLayout {
        &self.layout
    }

    #[must_use]
    pub const fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder<Ticks> {
        &self.telemetry
    }

    #[must_use]
    pub const fn fuel(&self) -> &FuelEngine<FC> {
        &self.fuel
    }

    #[must_use]
    pub const fn ignition(&self) -> &IgnitionEngine<IC> {
        &self.ignition
    }

    /// Validates and activates a calibration set, recording the outcome.
    pub fn load_calibration(
        &mut self,
        set: CalibrationSet,
        engine_running: bool,
        now: Ticks,
    ) -> Result<u32, CalibrationError> {
        let version = set.version;
        let result = self.calibration.load(set, engine_running);
        self.telemetry.record_calibration(version, result, now);
        result
    }

    /// Runs fuel and ignition for one engine event.
    pub fn on_position<S, D>(
        &mut self,
        position: &EnginePosition,
        sensors: &SensorSnapshot,
        enables: OutputEnables,
        sink: &mut S,
        display: &mut D,
    ) -> CycleReport
    where
        S: CommandSink,
        D: DisplaySink,
    {
        let rpm = position.rpm();
        let injectors = self.layout.injector_mask();
        let coils = self.layout.coil_mask();

        let (fuel, ignition, boost_target) = if let Some(tables) = self.calibration.active() {
            let fuel = self
                .fuel
                .fuel_calc(tables, position, sensors, enables.fuel, sink);
            let ignition = self
                .ignition
                .ignition_calc(tables, position, sensors, enables.ignition, sink);
            let boost = tables
                .boost_target
                .lookup(rpm, u16::from(sensors.tps_percent));
            let clamped = [
                fuel.enabled && fuel.ve_clamped,
                ignition.enabled && ignition.table_clamped,
                fuel.enabled && fuel.afr_clamped,
                boost.clamped,
            ];
            self.note_clamps(clamped, rpm, sensors, position.sampled_at);
            (fuel, ignition, boost_kpa(boost.value))
        } else {
            for channel in injectors.iter().chain(coils.iter()) {
                sink.cancel(channel);
            }
            (
                FuelCommand::cut(FuelCut::NoCalibration, injectors),
                IgnitionCommand::cut(SparkCut::NoCalibration, coils),
                0,
            )
        };

        self.note_transitions(&fuel, &ignition, rpm, position.sampled_at);
        self.note_refusals(&fuel.delivery, rpm, position.sampled_at);
        self.note_refusals(&ignition.delivery, rpm, position.sampled_at);

        let frame = DisplayFrame::from_commands(rpm, &fuel, &ignition, sensors.wideband, boost_target);
        display.publish(&frame);

        CycleReport {
            fuel,
            ignition,
            frame,
        }
    }

    /// Channels currently driven by the layout.
    #[must_use]
    pub fn channels(&self) -> ChannelMask {
        ChannelMask::from_bits(self.layout.injector_mask().bits() | self.layout.coil_mask().bits())
    }

    fn note_transitions(
        &mut self,
        fuel: &FuelCommand,
        ignition: &IgnitionCommand,
        rpm: u16,
        now: Ticks,
    ) {
        if fuel.cut != self.last_fuel_cut {
            self.telemetry.record_fuel_cut(fuel.cut, rpm, now);
            self.last_fuel_cut = fuel.cut;
        }
        if ignition.cut != self.last_spark_cut {
            self.telemetry.record_spark_cut(ignition.cut, rpm, now);
            self.last_spark_cut = ignition.cut;
        }
        if fuel.enabled && fuel.wideband_fallback != self.wideband_fallback {
            self.telemetry.record_wideband(fuel.wideband_fallback, now);
            self.wideband_fallback = fuel.wideband_fallback;
        }
    }

    fn note_clamps(
        &mut self,
        clamped: [bool; TABLE_KINDS],
        rpm: u16,
        sensors: &SensorSnapshot,
        now: Ticks,
    ) {
        let kinds = [
            (TableKind::Ve, sensors.map_kpa),
            (TableKind::Ignition, sensors.map_kpa),
            (TableKind::AfrTarget, sensors.map_kpa),
            (TableKind::BoostTarget, u16::from(sensors.tps_percent)),
        ];
        for ((kind, load), (now_clamped, was_clamped)) in kinds
            .into_iter()
            .zip(clamped.into_iter().zip(self.clamped.iter_mut()))
        {
            if now_clamped && !*was_clamped {
                self.telemetry.record_query_clamped(kind, rpm, load, now);
            }
            *was_clamped = now_clamped;
        }
    }

    fn note_refusals(&mut self, delivery: &DeliveryReport, rpm: u16, now: Ticks) {
        for (channel, outcome) in delivery.iter() {
            let slot = &mut self.refusals[channel.slot()];
            let refusal = outcome.refusal();
            if let Some(reason) = refusal {
                if *slot != Some(reason) {
                    self.telemetry
                        .record_schedule_refused(channel, reason, rpm, now);
                }
            }
            *slot = refusal;
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn boost_kpa(value: f32) -> u16 {
    value.max(0.0).min(f32::from(u16::MAX)) as u16
}
