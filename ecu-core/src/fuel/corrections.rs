//! Short-term fuel corrections.

use crate::calibration::{Curve1d, TableError};
use crate::engine::SensorSnapshot;

/// Neutral correction, in percent.
pub const NO_ENRICHMENT: u16 = 100;

/// Pluggable enrichment applied on top of the base pulse width.
///
/// Implementations return a percentage where 100 leaves the pulse unchanged.
/// Larger values must never reduce fuel.
pub trait FuelCorrections {
    fn enrichment(&mut self, rpm: u16, sensors: &SensorSnapshot) -> u16;
}

/// Corrections disabled.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoFuelCorrections;

impl FuelCorrections for NoFuelCorrections {
    fn enrichment(&mut self, _rpm: u16, _sensors: &SensorSnapshot) -> u16 {
        NO_ENRICHMENT
    }
}

/// Warm-up curve bins (°C).
pub const WARMUP_BINS: [i16; 8] = [-40, -20, 0, 20, 40, 60, 70, 80];
/// Warm-up enrichment per bin (percent).
pub const WARMUP_PERCENT: [f32; 8] = [180.0, 160.0, 145.0, 130.0, 118.0, 108.0, 103.0, 100.0];
/// Throttle-rate bins (%/s) for acceleration enrichment.
pub const ACCEL_BINS: [i16; 4] = [40, 100, 200, 400];
/// Extra fuel per throttle-rate bin (percent added).
pub const ACCEL_PERCENT: [f32; 4] = [10.0, 30.0, 60.0, 100.0];
/// Throttle rate below which no acceleration enrichment is applied.
pub const DEFAULT_ACCEL_THRESHOLD: i16 = 40;
/// Upper bound on the combined enrichment.
pub const DEFAULT_MAX_ENRICHMENT: u16 = 300;

/// Coolant warm-up and throttle acceleration enrichment.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardFuelCorrections {
    warmup: Curve1d<8>,
    accel: Curve1d<4>,
    accel_threshold: i16,
    max_enrichment: u16,
}

impl StandardFuelCorrections {
    pub fn new(
        warmup: Curve1d<8>,
        accel: Curve1d<4>,
        accel_threshold: i16,
        max_enrichment: u16,
    ) -> Self {
        Self {
            warmup,
            accel,
            accel_threshold,
            max_enrichment: max_enrichment.max(NO_ENRICHMENT),
        }
    }

    /// Builds the corrections from the stock curves.
    pub fn stock() -> Result<Self, TableError> {
        Ok(Self::new(
            Curve1d::new(WARMUP_BINS, WARMUP_PERCENT)?,
            Curve1d::new(ACCEL_BINS, ACCEL_PERCENT)?,
            DEFAULT_ACCEL_THRESHOLD,
            DEFAULT_MAX_ENRICHMENT,
        ))
    }

    /// Warm-up percentage at `coolant_c`, never below 100.
    #[must_use]
    pub fn warmup_percent(&self, coolant_c: i16) -> f32 {
        self.warmup.lookup(coolant_c).max(100.0)
    }

    /// Extra percentage added for a throttle opening at `tps_rate`.
    #[must_use]
    pub fn accel_percent(&self, tps_rate: i16) -> f32 {
        if tps_rate < self.accel_threshold {
            0.0
        } else {
            self.accel.lookup(tps_rate).max(0.0)
        }
    }
}

impl FuelCorrections for StandardFuelCorrections {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn enrichment(&mut self, _rpm: u16, sensors: &SensorSnapshot) -> u16 {
        let warm = self.warmup_percent(sensors.coolant_c);
        let accel = self.accel_percent(sensors.tps_rate);
        let total = warm * (100.0 + accel) / 100.0;
        let capped = total.min(f32::from(self.max_enrichment));
        capped as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensors(coolant_c: i16, tps_rate: i16) -> SensorSnapshot {
        SensorSnapshot {
            coolant_c,
            tps_rate,
            ..SensorSnapshot::DEFAULT
        }
    }

    #[test]
    fn warm_engine_at_steady_throttle_is_neutral() {
        let mut corrections = StandardFuelCorrections::stock().expect("stock curves");
        assert_eq!(corrections.enrichment(2000, &sensors(90, 0)), 100);
    }

    #[test]
    fn cold_engine_gets_more_fuel() {
        let mut corrections = StandardFuelCorrections::stock().expect("stock curves");
        let cold = corrections.enrichment(1000, &sensors(0, 0));
        let warm = corrections.enrichment(1000, &sensors(60, 0));
        assert_eq!(cold, 145);
        assert!(cold > warm);
    }

    #[test]
    fn throttle_tip_in_adds_fuel_above_threshold() {
        let mut corrections = StandardFuelCorrections::stock().expect("stock curves");
        assert_eq!(corrections.enrichment(3000, &sensors(90, 39)), 100);
        assert_eq!(corrections.enrichment(3000, &sensors(90, 100)), 130);
    }

    #[test]
    fn combined_enrichment_is_capped() {
        let mut corrections = StandardFuelCorrections::stock().expect("stock curves");
        assert_eq!(
            corrections.enrichment(800, &sensors(-40, 400)),
            DEFAULT_MAX_ENRICHMENT
        );
    }
}
