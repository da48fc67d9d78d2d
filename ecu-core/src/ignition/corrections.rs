//! Advance trims and dwell scaling.

use crate::calibration::{Curve1d, TableError};
use crate::engine::SensorSnapshot;

/// Neutral dwell scale, in percent.
pub const NO_DWELL_CORRECTION: u16 = 100;

/// Pluggable adjustments applied around the ignition table.
pub trait IgnitionCorrections {
    /// Degrees added to the table advance; negative values retard.
    fn advance_trim(&mut self, rpm: u16, sensors: &SensorSnapshot) -> i16;

    /// Dwell scale in percent; lower supply voltage must not lower it.
    fn dwell_percent(&mut self, sensors: &SensorSnapshot) -> u16;
}

/// Corrections disabled.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoIgnitionCorrections;

impl IgnitionCorrections for NoIgnitionCorrections {
    fn advance_trim(&mut self, _rpm: u16, _sensors: &SensorSnapshot) -> i16 {
        0
    }

    fn dwell_percent(&mut self, _sensors: &SensorSnapshot) -> u16 {
        NO_DWELL_CORRECTION
    }
}

/// Battery voltage bins (mV) for dwell correction.
pub const DWELL_VOLTAGE_BINS: [i16; 6] = [6_000, 8_000, 10_000, 12_000, 14_000, 16_000];
/// Dwell scale per voltage bin (percent).
pub const DWELL_VOLTAGE_PERCENT: [f32; 6] = [200.0, 160.0, 130.0, 110.0, 100.0, 90.0];
/// RPM error bins (target minus actual) for idle advance.
pub const IDLE_ERROR_BINS: [i16; 4] = [-200, 0, 100, 300];
/// Idle advance per error bin (degrees).
pub const IDLE_ADVANCE: [f32; 4] = [-4.0, 0.0, 3.0, 6.0];
pub const DEFAULT_IDLE_TARGET_RPM: u16 = 850;
/// Throttle position at or below which the engine is considered idling.
pub const DEFAULT_IDLE_TPS: u8 = 2;
pub const DEFAULT_MAX_KNOCK_RETARD: u8 = 10;

/// Knock retard, idle advance trim and voltage-compensated dwell.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardIgnitionCorrections {
    dwell_voltage: Curve1d<6>,
    idle_advance: Curve1d<4>,
    idle_target_rpm: u16,
    idle_tps: u8,
    max_knock_retard: u8,
}

impl StandardIgnitionCorrections {
    pub fn new(
        dwell_voltage: Curve1d<6>,
        idle_advance: Curve1d<4>,
        idle_target_rpm: u16,
        idle_tps: u8,
        max_knock_retard: u8,
    ) -> Self {
        Self {
            dwell_voltage,
            idle_advance,
            idle_target_rpm,
            idle_tps,
            max_knock_retard,
        }
    }

    /// Builds the corrections from the stock curves.
    pub fn stock() -> Result<Self, TableError> {
        Ok(Self::new(
            Curve1d::new(DWELL_VOLTAGE_BINS, DWELL_VOLTAGE_PERCENT)?,
            Curve1d::new(IDLE_ERROR_BINS, IDLE_ADVANCE)?,
            DEFAULT_IDLE_TARGET_RPM,
            DEFAULT_IDLE_TPS,
            DEFAULT_MAX_KNOCK_RETARD,
        ))
    }

    /// Idle trim in degrees; zero off idle.
    #[must_use]
    pub fn idle_trim(&self, rpm: u16, tps_percent: u8) -> i16 {
        if tps_percent > self.idle_tps || rpm == 0 {
            return 0;
        }
        let error = i32::from(self.idle_target_rpm) - i32::from(rpm);
        let clamped = error.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        let error = i16::try_from(clamped).unwrap_or_default();
        round_degrees(self.idle_advance.lookup(error))
    }
}

impl IgnitionCorrections for StandardIgnitionCorrections {
    fn advance_trim(&mut self, rpm: u16, sensors: &SensorSnapshot) -> i16 {
        let knock = i16::from(sensors.knock_retard.min(self.max_knock_retard));
        self.idle_trim(rpm, sensors.tps_percent) - knock
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn dwell_percent(&mut self, sensors: &SensorSnapshot) -> u16 {
        let millivolts = i16::try_from(sensors.battery_mv).unwrap_or(i16::MAX);
        self.dwell_voltage.lookup(millivolts).max(0.0) as u16
    }
}

/// Rounds to the nearest whole degree.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn round_degrees(value: f32) -> i16 {
    if value >= 0.0 {
        (value + 0.5) as i16
    } else {
        (value - 0.5) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensors(battery_mv: u16, knock_retard: u8, tps_percent: u8) -> SensorSnapshot {
        SensorSnapshot {
            battery_mv,
            knock_retard,
            tps_percent,
            ..SensorSnapshot::DEFAULT
        }
    }

    #[test]
    fn low_voltage_lengthens_dwell() {
        let mut corrections = StandardIgnitionCorrections::stock().expect("stock curves");
        let healthy = corrections.dwell_percent(&sensors(14_000, 0, 0));
        let weak = corrections.dwell_percent(&sensors(9_000, 0, 0));
        assert_eq!(healthy, 100);
        assert_eq!(weak, 145);
    }

    #[test]
    fn knock_retard_is_bounded() {
        let mut corrections = StandardIgnitionCorrections::stock().expect("stock curves");
        assert_eq!(corrections.advance_trim(3000, &sensors(14_000, 4, 50)), -4);
        assert_eq!(corrections.advance_trim(3000, &sensors(14_000, 40, 50)), -10);
    }

    #[test]
    fn idle_trim_only_applies_at_closed_throttle() {
        let corrections = StandardIgnitionCorrections::stock().expect("stock curves");
        assert_eq!(corrections.idle_trim(750, 0), 3);
        assert_eq!(corrections.idle_trim(1050, 0), -4);
        assert_eq!(corrections.idle_trim(750, 20), 0);
    }

    #[test]
    fn rounding_is_symmetric() {
        assert_eq!(round_degrees(2.5), 3);
        assert_eq!(round_degrees(-2.5), -3);
        assert_eq!(round_degrees(-0.4), 0);
    }
}
