//! Base calibration loaded at boot by the firmware and the emulator.
//!
//! A conservative set that starts and idles a stock 2.0 L four-cylinder so the
//! bench rig has something valid to run before a tuned set is loaded.

use super::{CALIBRATION_VERSION, CalibrationSet, Map8, Map16, TableError};

pub const RPM_BINS: [u16; 16] = [
    500, 800, 1100, 1400, 1700, 2000, 2500, 3000, 3500, 4000, 4500, 5000, 5500, 6000, 6500, 7000,
];
pub const MAP_BINS: [u16; 16] = [
    20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120, 130, 140, 160, 180, 200,
];
pub const BOOST_RPM_BINS: [u16; 8] = [1000, 2000, 3000, 4000, 5000, 6000, 6500, 7000];
pub const BOOST_TPS_BINS: [u16; 8] = [0, 10, 20, 40, 60, 80, 90, 100];

const CELLS: usize = RPM_BINS.len() * MAP_BINS.len();
const BOOST_CELLS: usize = BOOST_RPM_BINS.len() * BOOST_TPS_BINS.len();

/// Builds the boot calibration.
pub fn stock_calibration() -> Result<CalibrationSet, TableError> {
    Ok(CalibrationSet {
        version: CALIBRATION_VERSION,
        ve: Map16::from_slices(&RPM_BINS, &MAP_BINS, &fill::<CELLS>(16, ve_cell))?,
        ignition: Map16::from_slices(&RPM_BINS, &MAP_BINS, &fill::<CELLS>(16, advance_cell))?,
        afr_target: Map16::from_slices(&RPM_BINS, &MAP_BINS, &fill::<CELLS>(16, afr_cell))?,
        boost_target: Map8::from_slices(
            &BOOST_RPM_BINS,
            &BOOST_TPS_BINS,
            &fill::<BOOST_CELLS>(8, boost_cell),
        )?,
    })
}

/// Row-major cells: `width` X values per Y row.
fn fill<const N: usize>(width: usize, cell: fn(usize, usize) -> f32) -> [f32; N] {
    let mut cells = [0.0; N];
    for (index, value) in cells.iter_mut().enumerate() {
        *value = cell(index % width, index / width);
    }
    cells
}

#[allow(clippy::cast_precision_loss)]
fn ve_cell(x: usize, y: usize) -> f32 {
    // Torque peak around 4500 rpm, falling off at both ends.
    let offset = (x as f32 - 10.0) / 12.0;
    let speed = 1.0 - offset * offset;
    let load = y as f32 / 15.0;
    (45.0 + 35.0 * speed + 15.0 * load).clamp(30.0, 100.0)
}

#[allow(clippy::cast_precision_loss)]
fn advance_cell(x: usize, y: usize) -> f32 {
    let speed = 10.0 + 2.2 * x as f32;
    let load = 1.6 * y as f32;
    (speed - load).clamp(5.0, 38.0)
}

fn afr_cell(_x: usize, y: usize) -> f32 {
    match MAP_BINS[y] {
        0..=90 => 14.7,
        91..=110 => 13.5,
        _ => 12.2,
    }
}

fn boost_cell(x: usize, y: usize) -> f32 {
    if BOOST_TPS_BINS[y] < 40 || BOOST_RPM_BINS[x] < 2000 {
        100.0
    } else {
        170.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationStore;

    #[test]
    fn stock_set_passes_validation() {
        let set = stock_calibration().expect("stock tables build");
        let mut store = CalibrationStore::new();
        assert_eq!(store.load(set, false), Ok(1));
    }

    #[test]
    fn stock_advance_retards_with_load() {
        let set = stock_calibration().expect("stock tables build");
        let light = set.ignition.lookup(3000, 30).value;
        let heavy = set.ignition.lookup(3000, 180).value;
        assert!(light > heavy);
    }
}
