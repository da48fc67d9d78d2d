#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Conversion of raw ADC counts into the engine sensor snapshot.

use ecu_core::calibration::{Curve1d, TableError};
use ecu_core::engine::{SensorSnapshot, Ticks};
use ecu_core::sensors::AfrReading;

/// Full-scale count of the 12-bit converter.
pub const ADC_FULL_SCALE: u32 = 4_095;
/// Reference voltage of the converter, in millivolts.
pub const ADC_REFERENCE_MV: u32 = 3_300;
/// Battery input divider (12 V rail to ADC pin).
pub const BATTERY_DIVIDER: u32 = 6;
/// MAP sensor output span, in kPa, over the converter range.
pub const MAP_MIN_KPA: u32 = 10;
pub const MAP_MAX_KPA: u32 = 260;
/// Throttle counts at the closed and wide-open stops.
pub const TPS_CLOSED_COUNTS: u16 = 400;
pub const TPS_OPEN_COUNTS: u16 = 3_700;

/// Coolant thermistor counts (falling with temperature) reversed into ascending bins.
const CLT_COUNT_BINS: [i16; 8] = [350, 600, 950, 1_450, 2_050, 2_700, 3_300, 3_800];
const CLT_DEGREES: [f32; 8] = [120.0, 100.0, 80.0, 60.0, 40.0, 20.0, 0.0, -20.0];

/// One pass over the analog inputs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RawAnalog {
    pub map: u16,
    pub tps: u16,
    pub coolant: u16,
    pub battery: u16,
}

/// Turns raw samples into [`SensorSnapshot`] values.
pub struct SensorConditioner {
    coolant: Curve1d<8>,
    last_tps: Option<(u8, Ticks)>,
    knock_retard: u8,
}

impl SensorConditioner {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            coolant: Curve1d::new(CLT_COUNT_BINS, CLT_DEGREES)?,
            last_tps: None,
            knock_retard: 0,
        })
    }

    /// Retard reported by the knock window, applied to later snapshots.
    pub fn set_knock_retard(&mut self, degrees: u8) {
        self.knock_retard = degrees;
    }

    pub fn condition(&mut self, raw: RawAnalog, wideband: AfrReading, now: Ticks) -> SensorSnapshot {
        let tps_percent = tps_percent(raw.tps);
        let tps_rate = self.tps_rate(tps_percent, now);
        SensorSnapshot {
            map_kpa: map_kpa(raw.map),
            tps_percent,
            tps_rate,
            coolant_c: self.coolant_c(raw.coolant),
            battery_mv: battery_mv(raw.battery),
            wideband,
            knock_retard: self.knock_retard,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn coolant_c(&self, counts: u16) -> i16 {
        let counts = i16::try_from(counts).unwrap_or(i16::MAX);
        self.coolant.lookup(counts) as i16
    }

    /// Throttle movement in percent per second since the previous sample.
    fn tps_rate(&mut self, tps_percent: u8, now: Ticks) -> i16 {
        let previous = self.last_tps.replace((tps_percent, now));
        let Some((last, at)) = previous else {
            return 0;
        };
        let elapsed_us = i64::from(now.as_micros().wrapping_sub(at.as_micros()));
        if elapsed_us == 0 {
            return 0;
        }
        let delta = i64::from(tps_percent) - i64::from(last);
        let rate = delta * 1_000_000 / elapsed_us;
        i16::try_from(rate.clamp(i64::from(i16::MIN), i64::from(i16::MAX))).unwrap_or_default()
    }
}

fn millivolts(counts: u16) -> u32 {
    u32::from(counts).min(ADC_FULL_SCALE) * ADC_REFERENCE_MV / ADC_FULL_SCALE
}

#[must_use]
pub fn map_kpa(counts: u16) -> u16 {
    let span = MAP_MAX_KPA - MAP_MIN_KPA;
    let kpa = MAP_MIN_KPA + u32::from(counts).min(ADC_FULL_SCALE) * span / ADC_FULL_SCALE;
    u16::try_from(kpa).unwrap_or(u16::MAX)
}

#[must_use]
pub fn tps_percent(counts: u16) -> u8 {
    let counts = counts.clamp(TPS_CLOSED_COUNTS, TPS_OPEN_COUNTS) - TPS_CLOSED_COUNTS;
    let span = u32::from(TPS_OPEN_COUNTS - TPS_CLOSED_COUNTS);
    u8::try_from(u32::from(counts) * 100 / span).unwrap_or(100)
}

#[must_use]
pub fn battery_mv(counts: u16) -> u16 {
    u16::try_from(millivolts(counts) * BATTERY_DIVIDER).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_spans_the_sensor_range() {
        assert_eq!(map_kpa(0), 10);
        assert_eq!(map_kpa(4_095), 260);
        assert_eq!(map_kpa(u16::MAX), 260);
    }

    #[test]
    fn throttle_is_clamped_to_the_stops() {
        assert_eq!(tps_percent(100), 0);
        assert_eq!(tps_percent(2_050), 50);
        assert_eq!(tps_percent(4_000), 100);
    }

    #[test]
    fn battery_divider_scales_to_the_rail() {
        // 2.3 V at the pin is 13.8 V at the battery.
        assert_eq!(battery_mv(2_855), 13_800);
    }

    #[test]
    fn throttle_rate_tracks_opening_speed() {
        let mut conditioner = SensorConditioner::new().expect("coolant curve");
        let closed = RawAnalog {
            tps: TPS_CLOSED_COUNTS,
            ..RawAnalog::default()
        };
        let half = RawAnalog {
            tps: 2_050,
            ..RawAnalog::default()
        };

        let first = conditioner.condition(closed, AfrReading::Unavailable, Ticks(0));
        assert_eq!(first.tps_rate, 0);
        let second = conditioner.condition(half, AfrReading::Unavailable, Ticks(100_000));
        assert_eq!(second.tps_rate, 500);
    }

    #[test]
    fn coolant_reads_warm_engine() {
        let mut conditioner = SensorConditioner::new().expect("coolant curve");
        let warm = RawAnalog {
            coolant: 950,
            ..RawAnalog::default()
        };
        assert_eq!(
            conditioner
                .condition(warm, AfrReading::Unavailable, Ticks(0))
                .coolant_c,
            80
        );
    }
}
