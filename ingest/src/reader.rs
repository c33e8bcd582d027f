use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

use crate::record::RawRecord;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("failed to open {path}: {error}")]
    Open {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// A stream of raw records tagged with a source name. The pipeline does
/// not care whether the backing store is a CSV file, an API, or a fixture.
pub trait RecordSource {
    /// Source tag recorded on every record and in the run summary.
    fn name(&self) -> &str;
    /// Logical table whose rules govern this source's records.
    fn table(&self) -> &str;
    fn read(&self) -> Result<Vec<RawRecord>, ReadError>;
}

/// Reads a headered CSV file. Every cell is kept as a string; coercion to
/// native types is left to the validator and cleaner.
pub struct CsvSource {
    name: String,
    table: String,
    path: PathBuf,
}

impl CsvSource {
    pub fn new(name: &str, table: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_owned(),
            table: table.to_owned(),
            path: path.into(),
        }
    }

    fn parse<R: Read>(&self, reader: R) -> Result<Vec<RawRecord>, ReadError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers = csv_reader.headers()?.clone();

        let mut records = Vec::new();
        for row in csv_reader.records() {
            let row = row?;
            let fields: HashMap<String, Value> = headers
                .iter()
                .zip(row.iter())
                .map(|(header, cell)| (header.to_owned(), Value::String(cell.to_owned())))
                .collect();
            records.push(RawRecord::new(&self.name, fields));
        }

        Ok(records)
    }
}

impl RecordSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn read(&self) -> Result<Vec<RawRecord>, ReadError> {
        let file = File::open(&self.path).map_err(|error| ReadError::Open {
            path: self.path.clone(),
            error,
        })?;

        self.parse(file)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rows_become_string_field_maps() {
        let source = CsvSource::new("external", "measurements_external", "unused.csv");
        let csv = "person,timestamp,pressure_hpa\nAlice,2024-01-01T08:00,1010\nBob,2024-01-01T09:00,\n";

        let records = source.parse(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, "external");
        assert_eq!(records[0].get("person"), Some(&json!("Alice")));
        assert_eq!(records[0].get("pressure_hpa"), Some(&json!("1010")));
        // empty cells stay present as empty strings; nullability is the
        // validator's call
        assert_eq!(records[1].get("pressure_hpa"), Some(&json!("")));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let source = CsvSource::new("external", "measurements_external", "no/such/file.csv");
        assert!(matches!(
            source.read(),
            Err(ReadError::Open { .. })
        ));
    }
}
