//! The results table and its CSV file.

use std::path::{Path, PathBuf};

use log::debug;

use crate::record::{Record, Scalar};

/// An append-only list of records. The columns are the union of all field names in the order
/// they were first seen; a record without some column leaves that cell empty.
#[derive(Debug, Clone, Default)]
pub struct ResultsTable {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl ResultsTable {
    pub fn new() -> Self {
        ResultsTable::default()
    }

    /// Load the table previously persisted at `path`, or an empty table if there is no such
    /// file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let path = path.as_ref();
        let mut table = ResultsTable::new();
        if !path.exists() {
            return Ok(table);
        }

        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        for name in headers.iter() {
            table.add_column(name);
        }

        for row in reader.records() {
            let row = row?;
            let mut record = Record::new();
            for (name, cell) in headers.iter().zip(row.iter()) {
                // Cells of earlier sweeps are written back exactly as they were read.
                if !cell.is_empty() {
                    record.insert(name, Scalar::Text(cell.to_owned()));
                }
            }
            table.rows.push(record);
        }

        debug!("Loaded {} rows from {}", table.rows.len(), path.display());

        Ok(table)
    }

    fn add_column(&mut self, name: &str) {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_owned());
        }
    }

    pub fn append<I: IntoIterator<Item = Record>>(&mut self, records: I) {
        for record in records {
            for name in record.names() {
                self.add_column(name);
            }
            self.rows.push(record);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the whole table to `path` as CSV. The file is replaced atomically.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<(), failure::Error> {
        let path = path.as_ref();
        let tmp = {
            let mut tmp = path.as_os_str().to_owned();
            tmp.push(".tmp");
            PathBuf::from(tmp)
        };

        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(&self.columns)?;
            for row in self.rows.iter() {
                writer.write_record(self.columns.iter().map(|c| match row.get(c) {
                    Some(value) => value.to_string(),
                    None => String::new(),
                }))?;
            }
            writer.flush()?;
        }

        std::fs::rename(&tmp, path)?;

        Ok(())
    }
}
