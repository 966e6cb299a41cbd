//! Normalized rows and the batches they are flushed in.

use crate::schema::TableSpec;
use chrono::NaiveDate;
use yelp_common::{LoaderError, Result};

/// A single bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

/// Ordered column -> value mapping for one destination row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(&'static str, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an earlier value for the same column.
    pub fn set(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.cells
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cells.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Rows queued for one bulk write into a single table.
///
/// The first pushed row fixes the column list. Every later row must carry the
/// same set of columns; its values are stored in the batch's column order.
#[derive(Debug, Clone)]
pub struct Batch {
    table: &'static TableSpec,
    columns: Vec<&'static str>,
    rows: Vec<Vec<SqlValue>>,
}

impl Batch {
    pub fn new(table: &'static TableSpec) -> Self {
        Self {
            table,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Row) -> Result<()> {
        if row.is_empty() {
            return Err(self.invalid("row has no columns".to_string()));
        }

        if self.columns.is_empty() {
            self.columns = row.columns().collect();
            self.rows
                .push(row.cells.into_iter().map(|(_, value)| value).collect());
            return Ok(());
        }

        if row.len() != self.columns.len() {
            return Err(self.invalid(format!(
                "row has {} columns, batch has {}",
                row.len(),
                self.columns.len()
            )));
        }

        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match row.get(column) {
                Some(value) => values.push(value.clone()),
                None => return Err(self.invalid(format!("row is missing column '{column}'"))),
            }
        }
        self.rows.push(values);
        Ok(())
    }

    pub fn table(&self) -> &'static TableSpec {
        self.table
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn invalid(&self, message: String) -> LoaderError {
        LoaderError::InvalidBatch {
            table: self.table.name.to_string(),
            message,
        }
    }
}
