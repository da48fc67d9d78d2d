//! Fixed-capacity calibration tables and the interpolation they share.
//!
//! Tables carry their bins and cells inline so lookups never allocate and always
//! finish in a bounded number of steps. A table may use fewer bins than its
//! capacity; the active dimensions are fixed when it is constructed.

use core::fmt;

/// Validation failures reported while building a table or curve.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableError {
    /// Fewer than two bins were supplied along an axis.
    TooFewBins,
    /// More bins were supplied than the table can hold.
    BinCountMismatch,
    /// The cell count does not equal `x_bins × y_bins`.
    CellCountMismatch,
    /// Bins are not strictly ascending.
    BinsNotAscending,
    /// A cell holds NaN or an infinity.
    NonFiniteCell,
    /// A cell lies outside the range accepted for the table.
    CellOutOfRange,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::TooFewBins => f.write_str("axis needs at least two bins"),
            TableError::BinCountMismatch => f.write_str("bin count exceeds table capacity"),
            TableError::CellCountMismatch => f.write_str("cell count does not match the bins"),
            TableError::BinsNotAscending => f.write_str("bins must be strictly ascending"),
            TableError::NonFiniteCell => f.write_str("cell value is not finite"),
            TableError::CellOutOfRange => f.write_str("cell value outside accepted range"),
        }
    }
}

/// Result of a two-dimensional lookup.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Lookup {
    pub value: f32,
    /// `true` when either query coordinate fell outside the bins.
    pub clamped: bool,
}

/// Position of a query between two adjacent bins.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Bracket {
    low: usize,
    high: usize,
    fraction: f32,
    clamped: bool,
}

impl Bracket {
    const fn pinned(index: usize, clamped: bool) -> Self {
        Self {
            low: index,
            high: index,
            fraction: 0.0,
            clamped,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn bracket<T>(bins: &[T], query: T) -> Bracket
where
    T: Copy + Into<i32>,
{
    let q = query.into();
    let last = bins.len() - 1;
    let first_bin = bins[0].into();
    let last_bin = bins[last].into();

    if q <= first_bin {
        return Bracket::pinned(0, q < first_bin);
    }
    if q >= last_bin {
        return Bracket::pinned(last, q > last_bin);
    }

    let mut low = 0;
    while low + 1 < last && bins[low + 1].into() <= q {
        low += 1;
    }

    let lo = bins[low].into();
    let hi = bins[low + 1].into();
    let span = hi - lo;
    if span <= 0 {
        return Bracket::pinned(low, false);
    }

    Bracket {
        low,
        high: low + 1,
        fraction: (q - lo) as f32 / span as f32,
        clamped: false,
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn ensure_ascending<T>(bins: &[T]) -> Result<(), TableError>
where
    T: Copy + Into<i32>,
{
    if bins.len() < 2 {
        return Err(TableError::TooFewBins);
    }
    if bins.windows(2).any(|pair| pair[0].into() >= pair[1].into()) {
        return Err(TableError::BinsNotAscending);
    }
    Ok(())
}

/// Two-dimensional calibration table indexed by RPM (X) and load (Y).
///
/// Cells are stored row-major by load: `cells[y][x]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Table2d<const MAX_X: usize, const MAX_Y: usize> {
    x_len: usize,
    y_len: usize,
    x_bins: [u16; MAX_X],
    y_bins: [u16; MAX_Y],
    cells: [[f32; MAX_X]; MAX_Y],
}

impl<const MAX_X: usize, const MAX_Y: usize> Table2d<MAX_X, MAX_Y> {
    /// Builds a table from bin slices and a row-major cell slice.
    ///
    /// `cells` must contain exactly `x_bins.len() * y_bins.len()` values, one row
    /// of X values per Y bin.
    pub fn from_slices(x_bins: &[u16], y_bins: &[u16], cells: &[f32]) -> Result<Self, TableError> {
        let mut table = Self::with_bins(x_bins, y_bins)?;
        if cells.len() != x_bins.len() * y_bins.len() {
            return Err(TableError::CellCountMismatch);
        }
        if cells.iter().any(|cell| !cell.is_finite()) {
            return Err(TableError::NonFiniteCell);
        }
        for (row, values) in cells.chunks_exact(x_bins.len()).enumerate() {
            table.cells[row][..values.len()].copy_from_slice(values);
        }
        Ok(table)
    }

    /// Builds a table whose every cell holds `value`.
    pub fn uniform(x_bins: &[u16], y_bins: &[u16], value: f32) -> Result<Self, TableError> {
        let mut table = Self::with_bins(x_bins, y_bins)?;
        if !value.is_finite() {
            return Err(TableError::NonFiniteCell);
        }
        for row in &mut table.cells[..table.y_len] {
            row[..table.x_len].fill(value);
        }
        Ok(table)
    }

    fn with_bins(x_bins: &[u16], y_bins: &[u16]) -> Result<Self, TableError> {
        if x_bins.len() > MAX_X || y_bins.len() > MAX_Y {
            return Err(TableError::BinCountMismatch);
        }
        ensure_ascending(x_bins)?;
        ensure_ascending(y_bins)?;

        let mut table = Self {
            x_len: x_bins.len(),
            y_len: y_bins.len(),
            x_bins: [0; MAX_X],
            y_bins: [0; MAX_Y],
            cells: [[0.0; MAX_X]; MAX_Y],
        };
        table.x_bins[..x_bins.len()].copy_from_slice(x_bins);
        table.y_bins[..y_bins.len()].copy_from_slice(y_bins);
        Ok(table)
    }

    /// Active X bins.
    #[must_use]
    pub fn x_bins(&self) -> &[u16] {
        &self.x_bins[..self.x_len]
    }

    /// Active Y bins.
    #[must_use]
    pub fn y_bins(&self) -> &[u16] {
        &self.y_bins[..self.y_len]
    }

    /// Returns the stored cell at (`x`, `y`) bin indices.
    #[must_use]
    pub fn cell(&self, x: usize, y: usize) -> Option<f32> {
        if x < self.x_len && y < self.y_len {
            Some(self.cells[y][x])
        } else {
            None
        }
    }

    /// Confirms every active cell lies inside `[min, max]`.
    pub fn ensure_range(&self, min: f32, max: f32) -> Result<(), TableError> {
        let out_of_range = self.cells[..self.y_len]
            .iter()
            .flat_map(|row| row[..self.x_len].iter())
            .any(|cell| *cell < min || *cell > max);
        if out_of_range {
            Err(TableError::CellOutOfRange)
        } else {
            Ok(())
        }
    }

    /// Bilinear lookup with edge clamping.
    #[must_use]
    pub fn lookup(&self, x: u16, y: u16) -> Lookup {
        let bx = bracket(self.x_bins(), x);
        let by = bracket(self.y_bins(), y);

        let low_row = &self.cells[by.low];
        let high_row = &self.cells[by.high];
        let along_low = lerp(low_row[bx.low], low_row[bx.high], bx.fraction);
        let along_high = lerp(high_row[bx.low], high_row[bx.high], bx.fraction);

        Lookup {
            value: lerp(along_low, along_high, by.fraction),
            clamped: bx.clamped || by.clamped,
        }
    }
}

/// Interpolated value of `table` at (`x_query`, `y_query`).
#[must_use]
pub fn lookup<const MAX_X: usize, const MAX_Y: usize>(
    table: &Table2d<MAX_X, MAX_Y>,
    x_query: u16,
    y_query: u16,
) -> f32 {
    table.lookup(x_query, y_query).value
}

/// One-dimensional correction curve.
#[derive(Clone, Debug, PartialEq)]
pub struct Curve1d<const N: usize> {
    bins: [i16; N],
    values: [f32; N],
}

impl<const N: usize> Curve1d<N> {
    /// Builds a curve from ascending bins and matching values.
    pub fn new(bins: [i16; N], values: [f32; N]) -> Result<Self, TableError> {
        ensure_ascending(&bins)?;
        if values.iter().any(|value| !value.is_finite()) {
            return Err(TableError::NonFiniteCell);
        }
        Ok(Self { bins, values })
    }

    /// Bins of the curve.
    #[must_use]
    pub fn bins(&self) -> &[i16; N] {
        &self.bins
    }

    /// Linear lookup, clamped to the end values.
    #[must_use]
    pub fn lookup(&self, query: i16) -> f32 {
        let b = bracket(&self.bins, query);
        lerp(self.values[b.low], self.values[b.high], b.fraction)
    }
}
