use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{FAM, PLATE_COLUMNS, PLATE_ROWS, PlateGrid, ROX, Reading, VIC, row_label};
use crate::error::PlateError;

/// Channels shown as heatmaps: the three raw dyes and the two
/// ROX-normalized ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatChannel {
    Rox,
    Vic,
    Fam,
    NormalizedFam,
    NormalizedVic,
}

impl HeatChannel {
    pub const ALL: [HeatChannel; 5] = [
        HeatChannel::Rox,
        HeatChannel::Vic,
        HeatChannel::Fam,
        HeatChannel::NormalizedFam,
        HeatChannel::NormalizedVic,
    ];

    pub fn title(self) -> &'static str {
        match self {
            HeatChannel::Rox => "ROX values",
            HeatChannel::Vic => "VIC values",
            HeatChannel::Fam => "FAM values",
            HeatChannel::NormalizedFam => "Normalized FAM values",
            HeatChannel::NormalizedVic => "Normalized VIC values",
        }
    }

    pub fn default_bounds(self) -> ClipRange {
        match self {
            HeatChannel::Rox => ClipRange::new(1500.0, 5000.0),
            HeatChannel::Vic => ClipRange::new(0.0, 20000.0),
            HeatChannel::Fam => ClipRange::new(0.0, 50000.0),
            HeatChannel::NormalizedFam => ClipRange::new(0.0, 17.0),
            HeatChannel::NormalizedVic => ClipRange::new(0.0, 10.0),
        }
    }

    pub fn default_highlight(self) -> Option<ClipRange> {
        match self {
            HeatChannel::NormalizedFam => Some(ClipRange::new(4.0, 8.0)),
            HeatChannel::NormalizedVic => Some(ClipRange::new(2.0, 2.5)),
            _ => None,
        }
    }

    /// Dyes the channel is computed from: numerator and optional ROX
    /// denominator.
    fn sources(self) -> (&'static str, Option<&'static str>) {
        match self {
            HeatChannel::Rox => (ROX, None),
            HeatChannel::Vic => (VIC, None),
            HeatChannel::Fam => (FAM, None),
            HeatChannel::NormalizedFam => (FAM, Some(ROX)),
            HeatChannel::NormalizedVic => (VIC, Some(ROX)),
        }
    }
}

impl fmt::Display for HeatChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// Inclusive `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    pub min: f64,
    pub max: f64,
}

impl ClipRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamps `value` into the range. NaN has no position and yields `None`.
    pub fn clamp(&self, value: f64) -> Option<f64> {
        if value.is_nan() {
            return None;
        }
        Some(value.max(self.min).min(self.max))
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A computed 16x19 table ready for a heatmap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateTable {
    pub row_labels: Vec<char>,
    pub columns: Vec<usize>,
    pub cells: Vec<Vec<Option<f64>>>,
}

impl PlateTable {
    fn from_fn(cell: impl Fn(usize, usize) -> Option<f64>) -> Self {
        let cells = (0..PLATE_ROWS)
            .map(|row| (0..PLATE_COLUMNS).map(|column| cell(row, column)).collect())
            .collect();
        Self {
            row_labels: (0..PLATE_ROWS).map(row_label).collect(),
            columns: (1..=PLATE_COLUMNS).collect(),
            cells,
        }
    }

    /// Value at row label and one-based column.
    pub fn at(&self, row: char, column: usize) -> Option<f64> {
        let row = self.row_labels.iter().position(|label| *label == row)?;
        self.cells.get(row)?.get(column.checked_sub(1)?).copied().flatten()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells.iter().flatten().copied().flatten()
    }
}

/// Computes `channel` for `reading`, clamped to `bounds`. Ratios are taken
/// well by well against the ROX grid; wells missing either side stay empty.
pub fn channel_table(
    reading: &Reading,
    channel: HeatChannel,
    bounds: ClipRange,
) -> Result<PlateTable, PlateError> {
    let grid = |dye: &str| {
        reading.grid(dye).ok_or_else(|| PlateError::MissingDye {
            path: reading.identity().to_string(),
            dye: dye.to_string(),
        })
    };

    let (numerator, denominator) = channel.sources();
    let numerator = grid(numerator)?;
    match denominator {
        None => Ok(PlateTable::from_fn(|row, column| {
            bounds.clamp(numerator.get(row, column)?)
        })),
        Some(denominator) => Ok(normalized(numerator, grid(denominator)?, bounds)),
    }
}

fn normalized(numerator: &PlateGrid, denominator: &PlateGrid, bounds: ClipRange) -> PlateTable {
    PlateTable::from_fn(|row, column| {
        let top = numerator.get(row, column)?;
        let bottom = denominator.get(row, column)?;
        bounds.clamp(top / bottom)
    })
}
