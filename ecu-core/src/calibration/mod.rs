//! Calibration tables consumed by the fuel and ignition engines.
//!
//! A [`CalibrationSet`] is the decoded, validated form of what the storage layer
//! persists: VE, ignition advance and AFR target maps plus the boost target map.
//! The [`CalibrationStore`] only swaps sets while the engine is stopped so the
//! calculation paths always read a consistent, immutable snapshot.

use core::fmt;

pub mod stock;
mod table;

pub use table::{Curve1d, Lookup, Table2d, TableError, lookup};

/// Layout version this build understands.
pub const CALIBRATION_VERSION: u8 = 3;

/// Main 16×16 maps.
pub type Map16 = Table2d<16, 16>;
/// Reduced 8×8 maps.
pub type Map8 = Table2d<8, 8>;

/// Accepted cell range for volumetric efficiency (percent).
pub const VE_RANGE: (f32, f32) = (0.0, 255.0);
/// Accepted cell range for spark advance (degrees BTDC).
pub const ADVANCE_RANGE: (f32, f32) = (-40.0, 70.0);
/// Accepted cell range for AFR targets.
pub const AFR_RANGE: (f32, f32) = (6.0, 25.0);
/// Accepted cell range for boost targets (kPa absolute).
pub const BOOST_RANGE: (f32, f32) = (0.0, 511.0);

/// Identifies one of the maps in a [`CalibrationSet`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableKind {
    Ve,
    Ignition,
    AfrTarget,
    BoostTarget,
}

impl TableKind {
    /// Stable index used in telemetry codes.
    #[must_use]
    pub const fn as_index(self) -> u16 {
        match self {
            TableKind::Ve => 0,
            TableKind::Ignition => 1,
            TableKind::AfrTarget => 2,
            TableKind::BoostTarget => 3,
        }
    }

    /// Inverse of [`TableKind::as_index`].
    #[must_use]
    pub const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(TableKind::Ve),
            1 => Some(TableKind::Ignition),
            2 => Some(TableKind::AfrTarget),
            3 => Some(TableKind::BoostTarget),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Ve => f.write_str("ve"),
            TableKind::Ignition => f.write_str("ignition"),
            TableKind::AfrTarget => f.write_str("afr-target"),
            TableKind::BoostTarget => f.write_str("boost-target"),
        }
    }
}

/// Reasons a calibration set is refused by the store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError {
    /// Reloads are only accepted while the engine is stopped.
    EngineRunning,
    /// The set was produced for a different layout version.
    UnsupportedVersion(u8),
    /// A table failed its range check.
    InvalidTable(TableKind, TableError),
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::EngineRunning => {
                f.write_str("calibration reload refused while the engine is running")
            }
            CalibrationError::UnsupportedVersion(version) => {
                write!(f, "unsupported calibration version {version}")
            }
            CalibrationError::InvalidTable(kind, error) => write!(f, "{kind} table: {error}"),
        }
    }
}

/// Complete set of maps used by the calculation engines.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSet {
    pub version: u8,
    pub ve: Map16,
    pub ignition: Map16,
    pub afr_target: Map16,
    pub boost_target: Map8,
}

impl CalibrationSet {
    /// Runs the per-table range checks.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.version != CALIBRATION_VERSION {
            return Err(CalibrationError::UnsupportedVersion(self.version));
        }
        check(TableKind::Ve, self.ve.ensure_range(VE_RANGE.0, VE_RANGE.1))?;
        check(
            TableKind::Ignition,
            self.ignition.ensure_range(ADVANCE_RANGE.0, ADVANCE_RANGE.1),
        )?;
        check(
            TableKind::AfrTarget,
            self.afr_target.ensure_range(AFR_RANGE.0, AFR_RANGE.1),
        )?;
        check(
            TableKind::BoostTarget,
            self.boost_target.ensure_range(BOOST_RANGE.0, BOOST_RANGE.1),
        )
    }
}

fn check(kind: TableKind, result: Result<(), TableError>) -> Result<(), CalibrationError> {
    result.map_err(|error| CalibrationError::InvalidTable(kind, error))
}

/// Holds the active calibration set.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    active: Option<CalibrationSet>,
    epoch: u32,
}

impl CalibrationStore {
    /// Creates an empty store; every output stays disabled until a load succeeds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: None,
            epoch: 0,
        }
    }

    /// Validates and activates `set`.
    ///
    /// A rejected set leaves the store empty so no stale tables survive a failed
    /// reload.
    pub fn load(&mut self, set: CalibrationSet, engine_running: bool) -> Result<u32, CalibrationError> {
        if engine_running {
            return Err(CalibrationError::EngineRunning);
        }
        if let Err(error) = set.validate() {
            self.active = None;
            return Err(error);
        }

        self.active = Some(set);
        self.epoch = self.epoch.wrapping_add(1);
        Ok(self.epoch)
    }

    /// Returns the active set, if one loaded successfully.
    #[must_use]
    pub fn active(&self) -> Option<&CalibrationSet> {
        self.active.as_ref()
    }

    /// Number of successful loads so far.
    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RPM: [u16; 2] = [1000, 6000];
    const LOAD: [u16; 2] = [20, 100];

    fn set() -> CalibrationSet {
        CalibrationSet {
            version: CALIBRATION_VERSION,
            ve: Map16::uniform(&RPM, &LOAD, 80.0).expect("ve"),
            ignition: Map16::uniform(&RPM, &LOAD, 15.0).expect("ignition"),
            afr_target: Map16::uniform(&RPM, &LOAD, 14.7).expect("afr"),
            boost_target: Map8::uniform(&RPM, &LOAD, 100.0).expect("boost"),
        }
    }

    #[test]
    fn load_activates_and_bumps_epoch() {
        let mut store = CalibrationStore::new();
        assert!(store.active().is_none());
        assert_eq!(store.load(set(), false), Ok(1));
        assert!(store.active().is_some());
        assert_eq!(store.epoch(), 1);
    }

    #[test]
    fn load_refused_while_running_keeps_previous_set() {
        let mut store = CalibrationStore::new();
        store.load(set(), false).expect("initial load");

        let mut replacement = set();
        replacement.ve = Map16::uniform(&RPM, &LOAD, 50.0).expect("ve");
        assert_eq!(
            store.load(replacement, true),
            Err(CalibrationError::EngineRunning)
        );
        let active = store.active().expect("set retained");
        assert_eq!(active.ve.cell(0, 0), Some(80.0));
    }

    #[test]
    fn invalid_set_clears_store() {
        let mut store = CalibrationStore::new();
        store.load(set(), false).expect("initial load");

        let mut bad = set();
        bad.afr_target = Map16::uniform(&RPM, &LOAD, 0.0).expect("afr");
        assert_eq!(
            store.load(bad, false),
            Err(CalibrationError::InvalidTable(
                TableKind::AfrTarget,
                TableError::CellOutOfRange
            ))
        );
        assert!(store.active().is_none());
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut store = CalibrationStore::new();
        let mut old = set();
        old.version = 2;
        assert_eq!(
            store.load(old, false),
            Err(CalibrationError::UnsupportedVersion(2))
        );
    }
}
