//! One-way publication of the values shown on the dash display.
//!
//! Publishing is best effort: sinks must not block the calculation path and
//! have no way to report failure back into it.

use core::{fmt, time::Duration};

use crate::fuel::FuelCommand;
use crate::ignition::IgnitionCommand;
use crate::sensors::{Afr, AfrReading};

/// Values refreshed once per engine event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DisplayFrame {
    pub rpm: u16,
    pub pulse_width: Duration,
    pub advance: i16,
    pub dwell: Duration,
    /// Target AFR in tenths; `None` while fuel is cut.
    pub afr_target: Option<Afr>,
    pub afr_measured: AfrReading,
    pub boost_target_kpa: u16,
    pub fuel_cut: bool,
    pub spark_cut: bool,
}

impl DisplayFrame {
    /// Builds the frame from the commands of one engine event.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_commands(
        rpm: u16,
        fuel: &FuelCommand,
        ignition: &IgnitionCommand,
        afr_measured: AfrReading,
        boost_target_kpa: u16,
    ) -> Self {
        let afr_target = fuel
            .enabled
            .then(|| Afr::from_tenths((fuel.afr_target * 10.0 + 0.5) as u16));
        Self {
            rpm,
            pulse_width: fuel.pulse_width,
            advance: ignition.advance,
            dwell: ignition.dwell,
            afr_target,
            afr_measured,
            boost_target_kpa,
            fuel_cut: fuel.cut.is_some(),
            spark_cut: ignition.cut.is_some(),
        }
    }
}

impl fmt::Display for DisplayFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pw = self.pulse_width.as_micros();
        write!(
            f,
            "RPM {:>5} PW {:>2}.{:02}ms ADV {:>3} DW {}.{}ms",
            self.rpm,
            pw / 1_000,
            (pw % 1_000) / 10,
            self.advance,
            self.dwell.as_millis(),
            (self.dwell.as_micros() % 1_000) / 100,
        )?;
        match self.afr_target {
            Some(target) => write!(f, " AFR {target}")?,
            None => f.write_str(" AFR --.-")?,
        }
        match self.afr_measured {
            AfrReading::Valid(afr) => write!(f, "/{afr}")?,
            AfrReading::Unavailable | AfrReading::OutOfRange => f.write_str("/--.-")?,
        }
        if self.fuel_cut {
            f.write_str(" FCUT")?;
        }
        if self.spark_cut {
            f.write_str(" SCUT")?;
        }
        Ok(())
    }
}

/// Receives display frames.
pub trait DisplaySink {
    fn publish(&mut self, frame: &DisplayFrame);
}

/// Sink used when no display is attached.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoDisplay;

impl DisplaySink for NoDisplay {
    fn publish(&mut self, _frame: &DisplayFrame) {}
}
