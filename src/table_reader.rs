use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use crate::error::{DetectorError, Result};

// Cell values treated as missing when reading CSV files.
const NULL_MARKERS: [&str; 10] = ["", "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "<NA>"];

// One value of a raw account table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Null,
}

impl Cell {
    // Parses a CSV field. Booleans become 1/0, `inf` stays non-finite.
    pub fn parse(raw: &str) -> Cell {
        let raw = raw.trim();
        if NULL_MARKERS.contains(&raw) {
            return Cell::Null;
        }
        if let Ok(value) = raw.parse::<f64>() {
            return Cell::Number(value);
        }
        match raw.to_ascii_lowercase().as_str() {
            "true" => Cell::Number(1.0),
            "false" => Cell::Number(0.0),
            _ => Cell::Text(raw.to_string()),
        }
    }

    // Null cells and non-finite numbers both disqualify a row.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Number(value) => !value.is_finite(),
            Cell::Text(_) => false,
        }
    }

    // Label used when the cell is treated as a category.
    pub fn label(&self) -> String {
        match self {
            Cell::Number(value) => value.to_string(),
            Cell::Text(text) => text.clone(),
            Cell::Null => String::new(),
        }
    }
}

impl From<ValueRef<'_>> for Cell {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(v) => Cell::Number(v as f64),
            ValueRef::Real(v) => Cell::Number(v),
            // Text columns keep empty strings; only numeric-looking text is converted
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                match text.trim().parse::<f64>() {
                    Ok(v) => Cell::Number(v),
                    Err(_) => Cell::Text(text.into_owned()),
                }
            }
        }
    }
}

// Column names plus rows of cells, as read from SQLite or CSV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    // Removes rows holding a null or non-finite value in any column.
    // Returns the number of rows removed.
    pub fn drop_incomplete_rows(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| !row.iter().any(Cell::is_missing));
        before - self.rows.len()
    }

    // Removes the named columns that exist in the table and skips the rest.
    // Returns the names actually removed.
    pub fn drop_columns(&mut self, names: &[&str]) -> Vec<String> {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        let dropped: Vec<String> = self
            .columns
            .iter()
            .zip(&keep)
            .filter(|(_, keep)| !**keep)
            .map(|(c, _)| c.clone())
            .collect();
        if dropped.is_empty() {
            return dropped;
        }

        self.columns = retain_by_mask(std::mem::take(&mut self.columns), &keep);
        for row in &mut self.rows {
            *row = retain_by_mask(std::mem::take(row), &keep);
        }
        dropped
    }

    // Prints column names, row count and the first `n` rows.
    pub fn print_preview(&self, n: usize) {
        println!("\nColumn Names: {}", self.columns.join(", "));
        println!("Rows: {}", self.len());
        for row in self.rows.iter().take(n) {
            let fields: Vec<String> = row.iter().map(Cell::label).collect();
            println!("  {}", fields.join(" | "));
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(Cell::label))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn retain_by_mask<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

// Where account records are read from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Sqlite { path: PathBuf, table: String },
    Csv(PathBuf),
}

impl DataSource {
    pub fn load(&self) -> Result<Table> {
        match self {
            DataSource::Sqlite { path, table } => read_sqlite_table(path, table),
            DataSource::Csv(path) => read_csv_table(path),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Sqlite { path, table } => write!(f, "table '{}' in {}", table, path.display()),
            DataSource::Csv(path) => write!(f, "{}", path.display()),
        }
    }
}

pub fn read_csv_table(path: &Path) -> Result<Table> {
    if !path.exists() {
        return Err(DetectorError::MissingSource(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);

    let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let rows = rdr
        .records()
        .map(|record| record.map(|r| r.iter().map(Cell::parse).collect()))
        .collect::<std::result::Result<Vec<Vec<Cell>>, csv::Error>>()?;

    log::info!("read {} rows with {} columns from {}", rows.len(), columns.len(), path.display());
    Ok(Table::new(columns, rows))
}

pub fn read_sqlite_table(path: &Path, table: &str) -> Result<Table> {
    if !path.exists() {
        return Err(DetectorError::MissingSource(path.to_path_buf()));
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let result = {
        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_identifier(table)))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(Cell::from))
                    .collect::<rusqlite::Result<Vec<Cell>>>()
            })?
            .collect::<rusqlite::Result<Vec<Vec<Cell>>>>()?;
        Table::new(columns, rows)
    };
    conn.close().map_err(|(_, e)| e)?;

    log::info!(
        "read {} rows with {} columns from table '{}'",
        result.len(),
        result.columns.len(),
        table
    );
    Ok(result)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
