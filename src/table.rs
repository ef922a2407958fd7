/// Tabular source/sink
///
/// The engine only sees [`Table`]: a header row and data rows of string
/// cells addressed by 0-based column. [`CsvWorkbook`] backs it with CSV files.
use crate::errors::{AppError, ResultExt};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell value, empty for cells beyond a short row.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Sets a cell, padding a short row with empty cells.
    pub fn set_cell(&mut self, row: usize, column: usize, value: String) {
        if let Some(cells) = self.rows.get_mut(row) {
            if cells.len() <= column {
                cells.resize(column + 1, String::new());
            }
            cells[column] = value;
        }
    }
}

/// Where rows come from.
pub trait TableSource {
    fn read_table(&self) -> Result<Table, AppError>;
}

/// Where snapshots go. Every snapshot replaces the previous one.
pub trait TableSink {
    fn write_snapshot(&mut self, table: &Table) -> Result<(), AppError>;
}

/// CSV-backed workbook.
///
/// With a sheet name, `source` is a directory holding one `<sheet>.csv` per
/// sheet; without one, `source` is the CSV file itself.
#[derive(Debug, Clone)]
pub struct CsvWorkbook {
    source: PathBuf,
    sheet: Option<String>,
    output: PathBuf,
    delimiter: u8,
}

impl CsvWorkbook {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            sheet: None,
            output: output.into(),
            delimiter: b',',
        }
    }

    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        self.sheet = sheet;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Resolved path of the table to read.
    pub fn source_path(&self) -> PathBuf {
        match self.sheet {
            Some(ref sheet) => self.source.join(format!("{}.csv", sheet)),
            None => self.source.clone(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Reads the previous snapshot instead of the source.
    pub fn read_output(&self) -> Result<Table, AppError> {
        read_csv(&self.output, self.delimiter)
    }
}

impl TableSource for CsvWorkbook {
    fn read_table(&self) -> Result<Table, AppError> {
        read_csv(&self.source_path(), self.delimiter)
    }
}

impl TableSink for CsvWorkbook {
    fn write_snapshot(&mut self, table: &Table) -> Result<(), AppError> {
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut temp = self.output.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let file = fs::File::create(&temp)
            .with_context(|| format!("Failed to create {}", temp.display()))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .flexible(true)
                .from_writer(&file);
            writer.write_record(&table.headers)?;
            for row in &table.rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &self.output)
            .with_context(|| format!("Failed to replace {}", self.output.display()))?;
        tracing::info!("💾 Snapshot saved to {}", self.output.display());
        Ok(())
    }
}

fn read_csv(path: &Path, delimiter: u8) -> Result<Table, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let mut lossy_cells = 0usize;
    let headers = decode_record(reader.byte_headers()?, &mut lossy_cells);
    let mut rows = Vec::new();
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Failed to read row {}", idx + 1))?;
        rows.push(decode_record(&record, &mut lossy_cells));
    }

    if lossy_cells > 0 {
        tracing::warn!(
            "⚠️ {} cells in {} are not valid UTF-8; invalid bytes were replaced",
            lossy_cells,
            path.display()
        );
    }
    tracing::info!("Read {} rows from {}", rows.len(), path.display());
    Ok(Table { headers, rows })
}

/// Decodes each field as UTF-8, replacing invalid sequences (spreadsheet
/// exports in Windows-1252 are common) and counting the fields affected.
fn decode_record(record: &csv::ByteRecord, lossy_cells: &mut usize) -> Vec<String> {
    record
        .iter()
        .map(|field| match String::from_utf8_lossy(field) {
            Cow::Borrowed(text) => text.to_string(),
            Cow::Owned(text) => {
                *lossy_cells += 1;
                text
            }
        })
        .collect()
}
