//! The mirror cell's air nozzle table: a two-column CSV (label, type) naming
//! every physical nozzle position on the mirror. One row per `[A-F]` sector
//! times `[1..=275]` index -- 1650 data rows in total -- independent of
//! anything the FPGA reports. Purely descriptive: no live control path reads
//! it, it only gets published as an event for the operator console.

use std::collections::HashMap;
use std::path::Path;

pub const ROW_COUNT: usize = 275;
pub const COLUMNS: [char; 6] = ['A', 'B', 'C', 'D', 'E', 'F'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NozzleType {
    SuperShort,
    Blocked,
    Offset,
    Installed,
    Covered,
}

impl NozzleType {
    fn parse(raw: &str) -> Result<Self, NozzlesError> {
        match raw.trim() {
            "SUPER_SHORT" => Ok(NozzleType::SuperShort),
            "BLOCKED" => Ok(NozzleType::Blocked),
            "OFFSET" => Ok(NozzleType::Offset),
            "INSTALLED" => Ok(NozzleType::Installed),
            "COVERED" => Ok(NozzleType::Covered),
            other => Err(NozzlesError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NozzlesError {
    #[error("csv error reading {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("row {0} has no label column")]
    MissingLabel(usize),
    #[error("row {0} has no type column")]
    MissingType(usize),
    #[error("unknown nozzle type {0:?}")]
    UnknownType(String),
    #[error("malformed nozzle label {label:?} on row {row}: expected [A-F] followed by 1-{max}")]
    MalformedLabel { row: usize, label: String, max: usize },
    #[error("missing nozzle {0}")]
    MissingNozzle(String),
}

/// Label for sector `col` and 1-based index `row`, e.g. `label('A', 1) ==
/// "A1"`.
pub fn label(col: char, row: usize) -> String {
    format!("{col}{row}")
}

/// Split a label like `"F42"` into its sector and 1-based index, per the
/// original's `label.substr(1)` parse.
fn parse_label(row_number: usize, raw: &str) -> Result<(char, usize), NozzlesError> {
    let malformed = |label: &str| NozzlesError::MalformedLabel {
        row: row_number,
        label: label.to_string(),
        max: ROW_COUNT,
    };
    let mut chars = raw.chars();
    let sector = chars.next().ok_or_else(|| malformed(raw))?;
    if !COLUMNS.contains(&sector) {
        return Err(malformed(raw));
    }
    let index: usize = chars.as_str().parse().map_err(|_| malformed(raw))?;
    if index < 1 || index > ROW_COUNT {
        return Err(malformed(raw));
    }
    Ok((sector, index))
}

pub struct AirNozzles {
    table: HashMap<String, NozzleType>,
}

impl AirNozzles {
    /// Load and validate the nozzle table. Every `[A-F][1..=275]` label must
    /// appear exactly once (duplicates simply overwrite, matching the
    /// original's array-assignment semantics); any label the table never
    /// assigns is reported by its sector+index, matching the original's
    /// post-load `CHECK(SECTOR)` sweep.
    pub fn load(path: &Path) -> Result<Self, NozzlesError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .from_path(path)
            .map_err(|source| NozzlesError::Csv {
                path: path.display().to_string(),
                source,
            })?;

        let mut table = HashMap::with_capacity(ROW_COUNT * COLUMNS.len());
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|source| NozzlesError::Csv {
                path: path.display().to_string(),
                source,
            })?;
            let row_number = idx + 1;
            let raw_label = record.get(0).ok_or(NozzlesError::MissingLabel(row_number))?;
            let raw_type = record.get(1).ok_or(NozzlesError::MissingType(row_number))?;
            let (sector, index) = parse_label(row_number, raw_label)?;
            let nozzle_type = NozzleType::parse(raw_type)?;
            table.insert(label(sector, index), nozzle_type);
        }

        for sector in COLUMNS {
            for index in 1..=ROW_COUNT {
                let key = label(sector, index);
                if !table.contains_key(&key) {
                    return Err(NozzlesError::MissingNozzle(key));
                }
            }
        }

        Ok(Self { table })
    }

    pub fn get(&self, col: char, row: usize) -> Result<NozzleType, NozzlesError> {
        let key = label(col, row);
        self.table.get(&key).copied().ok_or(NozzlesError::MissingNozzle(key))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_csv() -> String {
        let mut out = String::new();
        out.push_str("# label,type\n");
        for sector in COLUMNS {
            for row in 1..=ROW_COUNT {
                out.push_str(&format!("{},INSTALLED\n", label(sector, row)));
            }
        }
        out
    }

    fn write_fixture(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ts-nozzles-test-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nozzles.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_a_complete_table() {
        let path = write_fixture("complete", &fixture_csv());
        let table = AirNozzles::load(&path).unwrap();
        assert_eq!(table.len(), ROW_COUNT * COLUMNS.len());
        assert_eq!(table.get('A', 1).unwrap(), NozzleType::Installed);
        assert_eq!(table.get('F', 275).unwrap(), NozzleType::Installed);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_a_table_missing_a_label() {
        // Drop the very last row (F275) from an otherwise complete table.
        let mut rows: Vec<&str> = fixture_csv().lines().collect();
        rows.pop();
        let path = write_fixture("incomplete", &rows.join("\n"));
        let err = AirNozzles::load(&path).unwrap_err();
        assert!(matches!(err, NozzlesError::MissingNozzle(ref l) if l == "F275"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_unknown_type_strings() {
        assert!(matches!(NozzleType::parse("WEIRD"), Err(NozzlesError::UnknownType(_))));
        assert_eq!(NozzleType::parse(" OFFSET \n").unwrap(), NozzleType::Offset);
    }

    #[test]
    fn rejects_malformed_labels() {
        let path = write_fixture("malformed", "Z1,INSTALLED\n");
        assert!(matches!(
            AirNozzles::load(&path).unwrap_err(),
            NozzlesError::MalformedLabel { .. }
        ));
        std::fs::remove_file(&path).ok();

        let path = write_fixture("out-of-range", "A999,INSTALLED\n");
        assert!(matches!(
            AirNozzles::load(&path).unwrap_err(),
            NozzlesError::MalformedLabel { .. }
        ));
        std::fs::remove_file(&path).ok();
    }
}
