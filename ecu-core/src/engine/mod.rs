//! Engine position, timing and sensor inputs shared by every calculation.
//!
//! Trigger decoding is external; it hands the core an [`EnginePosition`] per
//! engine event. Angles are whole degrees in the 720° four-stroke cycle and the
//! engine speed travels as time-per-degree in nanoseconds so slow cranking and
//! high-RPM operation keep sub-microsecond resolution.

use core::{ops::Add, time::Duration};

use crate::sensors::AfrReading;

mod layout;

pub use layout::{
    CHANNEL_COUNT, ChannelId, ChannelMask, EngineLayout, InjectionStrategy, LayoutError,
    MAX_COIL_CHANNELS, MAX_CYLINDERS, MAX_INJECTOR_CHANNELS, SparkStrategy,
};

/// Degrees in a full four-stroke cycle.
pub const CYCLE_DEGREES: u16 = 720;
/// Degrees in a single crank revolution.
pub const REVOLUTION_DEGREES: u16 = 360;

/// Nanoseconds per minute divided by degrees per revolution.
const NANOS_PER_DEGREE_AT_ONE_RPM: u32 = 166_666_667;

/// Free-running microsecond timer value; wraps every ~71 minutes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Ticks(pub u32);

impl Ticks {
    #[must_use]
    pub const fn from_micros(micros: u32) -> Self {
        Self(micros)
    }

    #[must_use]
    pub const fn as_micros(self) -> u32 {
        self.0
    }

    /// Elapsed time since `earlier`, assuming less than one wrap in between.
    #[must_use]
    pub const fn wrapping_since(self, earlier: Ticks) -> Duration {
        Duration::from_micros(self.0.wrapping_sub(earlier.0) as u64)
    }

    /// `true` when `self` lies before `other` on the wrapping timeline.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn is_before(self, other: Ticks) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }
}

impl Add<Duration> for Ticks {
    type Output = Ticks;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u32::try_from(rhs.as_micros()).unwrap_or(u32::MAX);
        Ticks(self.0.wrapping_add(micros))
    }
}

/// Length of the angular cycle an output repeats on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineCycle {
    /// One event every 720°.
    FourStroke,
    /// One event every 360°.
    Revolution,
}

impl EngineCycle {
    #[must_use]
    pub const fn degrees(self) -> u16 {
        match self {
            EngineCycle::FourStroke => CYCLE_DEGREES,
            EngineCycle::Revolution => REVOLUTION_DEGREES,
        }
    }
}

/// Crank angle normalised into `[0, 720)`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct CrankAngle(u16);

impl CrankAngle {
    #[must_use]
    pub const fn new(degrees: u16) -> Self {
        Self(degrees % CYCLE_DEGREES)
    }

    /// Builds an angle from a signed offset, wrapping into the cycle.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub const fn wrapping(degrees: i32) -> Self {
        Self(degrees.rem_euclid(CYCLE_DEGREES as i32) as u16)
    }

    #[must_use]
    pub const fn degrees(self) -> u16 {
        self.0
    }

    /// Forward distance from `self` to `target` within `cycle`.
    #[must_use]
    pub const fn degrees_until(self, target: CrankAngle, cycle: EngineCycle) -> u16 {
        let span = cycle.degrees();
        (target.0 % span + span - self.0 % span) % span
    }
}

/// Engine speed expressed as the time the crank needs to turn one degree.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct TimePerDegree {
    nanos: u32,
}

impl TimePerDegree {
    /// A stopped engine.
    pub const STOPPED: Self = Self { nanos: 0 };

    #[must_use]
    pub const fn from_nanos(nanos: u32) -> Self {
        Self { nanos }
    }

    #[must_use]
    pub const fn from_micros(micros: u32) -> Self {
        Self {
            nanos: micros.saturating_mul(1_000),
        }
    }

    /// Time-per-degree for a steady `rpm`.
    #[must_use]
    pub const fn from_rpm(rpm: u16) -> Self {
        if rpm == 0 {
            Self::STOPPED
        } else {
            Self {
                nanos: NANOS_PER_DEGREE_AT_ONE_RPM / rpm as u32,
            }
        }
    }

    #[must_use]
    pub const fn as_nanos(self) -> u32 {
        self.nanos
    }

    #[must_use]
    pub const fn is_stopped(self) -> bool {
        self.nanos == 0
    }

    /// Engine speed in revolutions per minute (0 when stopped).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn rpm(self) -> u16 {
        if self.nanos == 0 {
            return 0;
        }
        let rpm = NANOS_PER_DEGREE_AT_ONE_RPM / self.nanos;
        if rpm > u16::MAX as u32 {
            u16::MAX
        } else {
            rpm as u16
        }
    }

    /// Time needed to sweep `degrees`.
    #[must_use]
    pub const fn span(self, degrees: u32) -> Duration {
        Duration::from_nanos(self.nanos as u64 * degrees as u64)
    }

    /// Degrees swept during `duration`, rounded up (0 when stopped).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn degrees_in(self, duration: Duration) -> u32 {
        if self.nanos == 0 {
            return 0;
        }
        let nanos = duration.as_nanos();
        let per = self.nanos as u128;
        let degrees = nanos.div_ceil(per);
        if degrees > u32::MAX as u128 {
            u32::MAX
        } else {
            degrees as u32
        }
    }
}

/// One engine-position sample produced by trigger decoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EnginePosition {
    pub crank_angle: CrankAngle,
    pub time_per_degree: TimePerDegree,
    /// Angular spacing between trigger teeth.
    pub trigger_tooth_angle: u16,
    /// Timer value when `crank_angle` was captured.
    pub sampled_at: Ticks,
}

impl EnginePosition {
    #[must_use]
    pub const fn new(
        crank_angle: CrankAngle,
        time_per_degree: TimePerDegree,
        trigger_tooth_angle: u16,
        sampled_at: Ticks,
    ) -> Self {
        Self {
            crank_angle,
            time_per_degree,
            trigger_tooth_angle,
            sampled_at,
        }
    }

    #[must_use]
    pub const fn rpm(&self) -> u16 {
        self.time_per_degree.rpm()
    }

    /// Age of the sample at `now`.
    #[must_use]
    pub const fn age(&self, now: Ticks) -> Duration {
        now.wrapping_since(self.sampled_at)
    }
}

/// Latest conditioned sensor readings.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorSnapshot {
    pub map_kpa: u16,
    pub tps_percent: u8,
    /// Throttle movement in percent per second; positive when opening.
    pub tps_rate: i16,
    pub coolant_c: i16,
    pub battery_mv: u16,
    pub wideband: AfrReading,
    /// Retard requested by knock detection, in degrees.
    pub knock_retard: u8,
}

impl SensorSnapshot {
    pub const DEFAULT: Self = Self {
        map_kpa: 100,
        tps_percent: 0,
        tps_rate: 0,
        coolant_c: 80,
        battery_mv: 13_800,
        wideband: AfrReading::Unavailable,
        knock_retard: 0,
    };
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Operator or protection enables re-evaluated on every engine event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutputEnables {
    pub fuel: bool,
    pub ignition: bool,
}

impl OutputEnables {
    pub const ALL: Self = Self {
        fuel: true,
        ignition: true,
    };
}

impl Default for OutputEnables {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_distance_wraps_the_cycle() {
        let current = CrankAngle::new(700);
        assert_eq!(
            current.degrees_until(CrankAngle::new(10), EngineCycle::FourStroke),
            30
        );
        assert_eq!(
            current.degrees_until(CrankAngle::new(700), EngineCycle::FourStroke),
            0
        );
        assert_eq!(
            CrankAngle::new(350).degrees_until(CrankAngle::new(10), EngineCycle::Revolution),
            20
        );
        assert_eq!(
            CrankAngle::new(400).degrees_until(CrankAngle::new(370), EngineCycle::Revolution),
            330
        );
    }

    #[test]
    fn signed_angles_wrap() {
        assert_eq!(CrankAngle::wrapping(-20).degrees(), 700);
        assert_eq!(CrankAngle::wrapping(740).degrees(), 20);
    }

    #[test]
    fn rpm_and_time_per_degree_agree() {
        let tpd = TimePerDegree::from_micros(50);
        assert_eq!(tpd.rpm(), 3333);
        assert_eq!(TimePerDegree::from_rpm(6000).as_nanos(), 27_777);
        assert_eq!(TimePerDegree::STOPPED.rpm(), 0);
    }

    #[test]
    fn spans_and_degrees() {
        let tpd = TimePerDegree::from_micros(50);
        assert_eq!(tpd.span(30), Duration::from_micros(1_500));
        assert_eq!(tpd.degrees_in(Duration::from_micros(120)), 3);
        assert_eq!(TimePerDegree::STOPPED.degrees_in(Duration::from_millis(5)), 0);
    }

    #[test]
    fn ticks_wrap_cleanly() {
        let late = Ticks(10);
        let early = Ticks(u32::MAX - 9);
        assert_eq!(late.wrapping_since(early), Duration::from_micros(20));
        assert!(early.is_before(late));
        assert_eq!(early + Duration::from_micros(20), late);
    }
}
