use ecu_core::calibration::{
    CALIBRATION_VERSION, CalibrationError, CalibrationSet, CalibrationStore, Map8, Map16,
    TableError, TableKind, lookup,
};
use heapless::Vec as HeaplessVec;

const RPM_BINS: [u16; 6] = [500, 1500, 2500, 3500, 5000, 7000];
const MAP_BINS: [u16; 5] = [20, 40, 60, 80, 100];

/// VE rises with both speed and load.
fn ve_map() -> Map16 {
    let mut cells: HeaplessVec<f32, 30> = HeaplessVec::new();
    for (y, _) in MAP_BINS.iter().enumerate() {
        for (x, _) in RPM_BINS.iter().enumerate() {
            let value = 35.0 + 8.0 * x as f32 + 10.0 * y as f32;
            cells.push(value).expect("cell capacity");
        }
    }
    Map16::from_slices(&RPM_BINS, &MAP_BINS, &cells).expect("valid VE map")
}

#[test]
fn lookup_is_monotonic_along_both_axes() {
    let ve = ve_map();

    let mut previous = f32::MIN;
    for rpm in (500..=7000).step_by(125) {
        let value = lookup(&ve, rpm, 70);
        assert!(value >= previous, "VE fell from {previous} to {value} at {rpm} rpm");
        previous = value;
    }

    let mut previous = f32::MIN;
    for kpa in 20..=100 {
        let value = lookup(&ve, 3000, kpa);
        assert!(value >= previous, "VE fell from {previous} to {value} at {kpa} kPa");
        previous = value;
    }
}

#[test]
fn lookup_between_bins_lies_strictly_between_differing_cells() {
    let ve = ve_map();

    for pair in RPM_BINS.windows(2) {
        let (low, high) = (pair[0], pair[1]);
        let low_cell = lookup(&ve, low, 60);
        let high_cell = lookup(&ve, high, 60);
        for rpm in [low + 1, low + (high - low) / 2, high - 1] {
            let value = lookup(&ve, rpm, 60);
            assert!(
                low_cell < value && value < high_cell,
                "{value} at {rpm} rpm is not strictly inside ({low_cell}, {high_cell})"
            );
        }
    }

    for pair in MAP_BINS.windows(2) {
        let (low, high) = (pair[0], pair[1]);
        let value = lookup(&ve, 2500, low + (high - low) / 2);
        assert!(lookup(&ve, 2500, low) < value && value < lookup(&ve, 2500, high));
    }
}

#[test]
fn lookup_between_equal_cells_returns_that_cell_exactly() {
    let flat = Map16::uniform(&RPM_BINS, &MAP_BINS, 82.5).expect("flat map");
    for rpm in [500, 777, 2000, 4999, 7000] {
        for kpa in [20, 33, 71, 100] {
            assert_eq!(lookup(&flat, rpm, kpa), 82.5, "at {rpm} rpm / {kpa} kPa");
        }
    }

    // A plateau inside an otherwise sloped map.
    let cells = [
        40.0, 60.0, 60.0, 80.0, //
        40.0, 60.0, 60.0, 80.0,
    ];
    let plateau = Map16::from_slices(&[1000, 2000, 3000, 4000], &[30, 90], &cells).expect("plateau map");
    for rpm in [2000, 2250, 2500, 2999, 3000] {
        assert_eq!(lookup(&plateau, rpm, 55), 60.0, "at {rpm} rpm");
    }
}

#[test]
fn interpolates_between_bins_and_clamps_outside() {
    let ve = ve_map();

    // Halfway between 1500 and 2500 rpm on the 40 kPa row.
    let mid = ve.lookup(2000, 40);
    assert!((mid.value - 57.0).abs() < 1e-4);
    assert!(!mid.clamped);

    let below = ve.lookup(100, 10);
    assert!(below.clamped);
    assert_eq!(below.value, ve.lookup(500, 20).value);

    let above = ve.lookup(9000, 250);
    assert!(above.clamped);
    assert_eq!(above.value, ve.lookup(7000, 100).value);
}

#[test]
fn malformed_maps_are_refused() {
    assert_eq!(
        Map16::from_slices(&[1000, 900], &MAP_BINS, &[0.0; 10]),
        Err(TableError::BinsNotAscending)
    );
    assert_eq!(
        Map16::from_slices(&RPM_BINS, &MAP_BINS, &[0.0; 12]),
        Err(TableError::CellCountMismatch)
    );
    assert_eq!(
        Map16::from_slices(&[1000], &MAP_BINS, &[0.0; 5]),
        Err(TableError::TooFewBins)
    );
}

#[test]
fn store_rejects_out_of_range_sets_and_stays_empty() {
    let mut store = CalibrationStore::new();
    let set = CalibrationSet {
        version: CALIBRATION_VERSION,
        ve: ve_map(),
        ignition: Map16::uniform(&RPM_BINS, &MAP_BINS, 90.0).expect("ignition"),
        afr_target: Map16::uniform(&RPM_BINS, &MAP_BINS, 14.7).expect("afr"),
        boost_target: Map8::uniform(&RPM_BINS, &[0, 100], 100.0).expect("boost"),
    };

    assert_eq!(
        store.load(set, false),
        Err(CalibrationError::InvalidTable(
            TableKind::Ignition,
            TableError::CellOutOfRange
        ))
    );
    assert!(store.active().is_none(), "a rejected set must not activate");
    assert_eq!(store.epoch(), 0);
}
