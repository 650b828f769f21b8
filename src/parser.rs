use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::domain::{
    Intensity, PLATE_COLUMNS, PlateGrid, Reading, RecordName, SourceIdentity, row_index,
};
use crate::error::PlateError;

const HEADER_PREFIX: &str = "<>";
const DYE_MARKER: &str = "Dye";

/// Parses instrument exports into [`Reading`]s.
///
/// The content is a sequence of comma separated rows grouped into dye
/// sections:
///
/// ```text
/// Dye,ROX
/// <>,1,2,3
/// A,100,200,300
/// B,110,210,310
///
/// Dye,FAM
/// ...
/// ```
///
/// A blank row closes the current section. Header rows (`<>`) are skipped.
pub struct RecordParser;

impl RecordParser {
    pub fn parse(path: &Path) -> Result<Reading, PlateError> {
        let identity =
            SourceIdentity::from_path(path).map_err(|err| PlateError::MalformedRecord {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        let content = fs::read_to_string(path).map_err(|err| PlateError::MalformedRecord {
            path: identity.to_string(),
            reason: format!("unable to read file: {err}"),
        })?;
        Self::parse_content(identity, &content)
    }

    /// Parses already loaded file content. The file name tokens are taken
    /// from `identity`.
    pub fn parse_content(identity: SourceIdentity, content: &str) -> Result<Reading, PlateError> {
        let name = RecordName::from_identity(&identity)?;

        let mut dye_values: BTreeMap<String, BTreeSet<Intensity>> = BTreeMap::new();
        let mut dye_grid: BTreeMap<String, PlateGrid> = BTreeMap::new();
        let mut active: Option<String> = None;

        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                active = None;
                continue;
            }

            let cells = line.split(',').map(str::trim).collect::<Vec<_>>();
            if cells[0] == HEADER_PREFIX {
                continue;
            }

            if cells[0] == DYE_MARKER {
                let dye = cells
                    .get(1)
                    .filter(|dye| !dye.is_empty())
                    .ok_or_else(|| PlateError::MalformedRecord {
                        path: identity.to_string(),
                        reason: format!("dye row without a dye name (line {line_no})"),
                    })?;
                dye_values.insert(dye.to_string(), BTreeSet::new());
                dye_grid.insert(dye.to_string(), PlateGrid::default());
                active = Some(dye.to_string());
                continue;
            }

            let Some(dye) = active.as_deref() else {
                return Err(PlateError::SectionState {
                    path: identity.to_string(),
                    line: line_no,
                });
            };

            let (row, wells) = parse_data_row(&cells).map_err(|reason| {
                PlateError::MalformedRecord {
                    path: identity.to_string(),
                    reason: format!("{reason} (line {line_no})"),
                }
            })?;

            if let Some(values) = dye_values.get_mut(dye) {
                values.extend(wells.iter().flatten().copied().map(Intensity::new));
            }
            if let Some(grid) = dye_grid.get_mut(dye) {
                grid.set_row(row, wells);
            }
        }

        Ok(Reading::new(identity, name, dye_values, dye_grid))
    }
}

fn parse_data_row(cells: &[&str]) -> Result<(usize, [Option<f64>; PLATE_COLUMNS]), String> {
    let label = cells[0];
    let row = row_index(label).ok_or_else(|| format!("unknown row label {label:?}"))?;

    let mut wells = [None; PLATE_COLUMNS];
    for (column, cell) in cells[1..].iter().enumerate() {
        if column >= PLATE_COLUMNS {
            if cell.is_empty() {
                continue;
            }
            return Err(format!(
                "row {label} has a value beyond column {PLATE_COLUMNS}"
            ));
        }
        wells[column] = cell.parse::<f64>().ok().filter(|value| value.is_finite());
    }
    Ok((row, wells))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::{FAM, ROX};

    fn identity() -> SourceIdentity {
        SourceIdentity::new("/data/20230615101500_X_Y_ARR7.csv")
    }

    fn values(reading: &Reading, dye: &str) -> Vec<f64> {
        reading
            .values(dye)
            .unwrap()
            .iter()
            .map(|v| v.value())
            .collect()
    }

    #[test]
    fn parse_two_sections() {
        let content = "Dye,ROX\nA,100,200\n\nDye,FAM\nA,50,60\n";
        let reading = RecordParser::parse_content(identity(), content).unwrap();

        assert_eq!(reading.array_label(), "ARR7");
        assert_eq!(values(&reading, ROX), vec![100.0, 200.0]);
        assert_eq!(values(&reading, FAM), vec![50.0, 60.0]);
        assert_eq!(reading.grid(ROX).unwrap().at('A', 1), Some(100.0));
        assert_eq!(reading.grid(ROX).unwrap().at('A', 2), Some(200.0));
        assert_eq!(reading.grid(ROX).unwrap().at('A', 3), None);
        assert_eq!(reading.grid(FAM).unwrap().at('A', 2), Some(60.0));
    }

    #[test]
    fn headers_and_crlf_are_skipped() {
        let content = "Dye,VIC\r\n<>,1,2,3\r\nB,1,2,2\r\nC, 3 ,n/a,\r\n";
        let reading = RecordParser::parse_content(identity(), content).unwrap();

        assert_eq!(values(&reading, "VIC"), vec![1.0, 2.0, 3.0]);
        let grid = reading.grid("VIC").unwrap();
        assert_eq!(grid.at('B', 3), Some(2.0));
        assert_eq!(grid.at('C', 1), Some(3.0));
        assert_eq!(grid.at('C', 2), None);
        assert_eq!(grid.at('A', 1), None);
    }

    #[test]
    fn data_row_before_dye_section() {
        let err = RecordParser::parse_content(identity(), "B,10\n").unwrap_err();
        assert_matches!(err, PlateError::SectionState { line: 1, .. });
        assert!(err.is_record_error());
    }

    #[test]
    fn data_row_after_blank_reset() {
        let content = "Dye,ROX\nA,1\n\nB,2\n";
        let err = RecordParser::parse_content(identity(), content).unwrap_err();
        assert_matches!(err, PlateError::SectionState { line: 4, .. });
    }

    #[test]
    fn unknown_row_label() {
        let err = RecordParser::parse_content(identity(), "Dye,ROX\nQ,1\n").unwrap_err();
        assert_matches!(err, PlateError::MalformedRecord { .. });
    }

    #[test]
    fn too_many_columns() {
        let row = (1..=20).map(|v| v.to_string()).collect::<Vec<_>>().join(",");
        let content = format!("Dye,ROX\nA,{row}\n");
        let err = RecordParser::parse_content(identity(), &content).unwrap_err();
        assert_matches!(err, PlateError::MalformedRecord { .. });

        let trailing = (1..=19).map(|v| v.to_string()).collect::<Vec<_>>().join(",");
        let content = format!("Dye,ROX\nA,{trailing},,\n");
        let reading = RecordParser::parse_content(identity(), &content).unwrap();
        assert_eq!(reading.grid(ROX).unwrap().at('A', 19), Some(19.0));
    }

    #[test]
    fn dye_row_without_name() {
        let err = RecordParser::parse_content(identity(), "Dye,\nA,1\n").unwrap_err();
        assert_matches!(err, PlateError::MalformedRecord { .. });
    }

    #[test]
    fn readings_do_not_share_state() {
        let first = RecordParser::parse_content(identity(), "Dye,ROX\nA,1\n").unwrap();
        let second = RecordParser::parse_content(
            SourceIdentity::new("/data/20230616101500_X_Y_ARR8.csv"),
            "Dye,FAM\nA,2\n",
        )
        .unwrap();

        assert_eq!(first.dyes().collect::<Vec<_>>(), vec![ROX]);
        assert_eq!(second.dyes().collect::<Vec<_>>(), vec![FAM]);
    }

    #[test]
    fn empty_file_has_no_dyes() {
        let reading = RecordParser::parse_content(identity(), "").unwrap();
        assert_eq!(reading.dyes().count(), 0);
    }
}
