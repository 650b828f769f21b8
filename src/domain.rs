use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::PlateError;

pub const ROX: &str = "ROX";
pub const VIC: &str = "VIC";
pub const FAM: &str = "FAM";

/// Plate rows are labelled `A` through `P`.
pub const PLATE_ROWS: usize = 16;
/// Plate columns are numbered `1` through `19`.
pub const PLATE_COLUMNS: usize = 19;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const ARRAY_TOKEN: usize = 3;

static TOKEN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_-]").expect("static regex"));
static TIMESTAMP_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{14}$").expect("static regex"));

/// Path of an instrument file, the key that identifies its reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceIdentity(Utf8PathBuf);

impl SourceIdentity {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn from_path(path: &Path) -> Result<Self, PlateError> {
        Utf8PathBuf::from_path_buf(path.to_path_buf())
            .map(Self)
            .map_err(|path| {
                PlateError::Filesystem(format!("non UTF-8 path: {}", path.display()))
            })
    }

    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0.file_name().unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SourceIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

/// A single fluorescence value. Ordered by `f64::total_cmp` so it can live
/// in a set.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct Intensity(f64);

impl Intensity {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for Intensity {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Intensity {}

impl PartialOrd for Intensity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Intensity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<f64> for Intensity {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

/// Maps a row label (`A`..`P`) to its zero-based index.
pub fn row_index(label: &str) -> Option<usize> {
    let mut chars = label.chars();
    let ch = chars.next()?;
    if chars.next().is_some() || !ch.is_ascii_uppercase() {
        return None;
    }
    let index = (ch as u8 - b'A') as usize;
    (index < PLATE_ROWS).then_some(index)
}

pub fn row_label(index: usize) -> char {
    (b'A' + index as u8) as char
}

/// Spatial layout of one dye: 16 rows by 19 columns. Wells without a
/// numeric value are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateGrid {
    wells: [[Option<f64>; PLATE_COLUMNS]; PLATE_ROWS],
}

impl Default for PlateGrid {
    fn default() -> Self {
        Self {
            wells: [[None; PLATE_COLUMNS]; PLATE_ROWS],
        }
    }
}

impl PlateGrid {
    /// Value at row label `row` and one-based column `column`.
    pub fn at(&self, row: char, column: usize) -> Option<f64> {
        let row = row_index(&row.to_string())?;
        self.get(row, column.checked_sub(1)?)
    }

    /// Value at zero-based indices.
    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        self.wells.get(row)?.get(column).copied().flatten()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Option<f64>; PLATE_COLUMNS]> {
        self.wells.iter()
    }

    pub(crate) fn set_row(&mut self, row: usize, values: [Option<f64>; PLATE_COLUMNS]) {
        self.wells[row] = values;
    }
}

/// Tokens carried by an instrument file name, e.g.
/// `20230615101500_X_Y_ARR7.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordName {
    pub acquired_at: NaiveDateTime,
    pub array_label: String,
}

impl RecordName {
    pub fn from_identity(identity: &SourceIdentity) -> Result<Self, PlateError> {
        let malformed = |reason: String| PlateError::MalformedRecord {
            path: identity.to_string(),
            reason,
        };

        let stem = identity
            .as_path()
            .file_stem()
            .ok_or_else(|| malformed("missing file name".to_string()))?;
        let tokens = TOKEN_SEPARATOR.split(stem).collect::<Vec<_>>();

        let timestamp = tokens[0];
        if !TIMESTAMP_TOKEN.is_match(timestamp) {
            return Err(malformed(format!(
                "expected a yyyyMMddHHmmss timestamp, found {timestamp:?}"
            )));
        }
        let acquired_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|err| malformed(format!("invalid timestamp {timestamp}: {err}")))?;

        let array_label = tokens
            .get(ARRAY_TOKEN)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                malformed(format!(
                    "expected at least {} name tokens, found {}",
                    ARRAY_TOKEN + 1,
                    tokens.len()
                ))
            })?;

        Ok(Self {
            acquired_at,
            array_label: array_label.to_string(),
        })
    }
}

/// One parsed instrument file. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    identity: SourceIdentity,
    acquired_at: NaiveDateTime,
    array_label: String,
    dye_values: BTreeMap<String, BTreeSet<Intensity>>,
    dye_grid: BTreeMap<String, PlateGrid>,
}

impl Reading {
    pub(crate) fn new(
        identity: SourceIdentity,
        name: RecordName,
        dye_values: BTreeMap<String, BTreeSet<Intensity>>,
        dye_grid: BTreeMap<String, PlateGrid>,
    ) -> Self {
        Self {
            identity,
            acquired_at: name.acquired_at,
            array_label: name.array_label,
            dye_values,
            dye_grid,
        }
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    pub fn acquired_at(&self) -> NaiveDateTime {
        self.acquired_at
    }

    pub fn array_label(&self) -> &str {
        &self.array_label
    }

    pub fn dyes(&self) -> impl Iterator<Item = &str> {
        self.dye_values.keys().map(String::as_str)
    }

    pub fn dye_values(&self) -> &BTreeMap<String, BTreeSet<Intensity>> {
        &self.dye_values
    }

    pub fn dye_grid(&self) -> &BTreeMap<String, PlateGrid> {
        &self.dye_grid
    }

    pub fn values(&self, dye: &str) -> Option<&BTreeSet<Intensity>> {
        self.dye_values.get(dye)
    }

    pub fn grid(&self, dye: &str) -> Option<&PlateGrid> {
        self.dye_grid.get(dye)
    }

    /// Scatter category for this reading: array label and acquisition date.
    pub fn plot_label(&self) -> String {
        format!("{} {}", self.array_label, self.acquired_at.date())
    }
}
