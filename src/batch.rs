// 📦 Record Batch - Tabular extract handed to the warehouse core
// Rows are column-name → typed value maps; column presence is tracked separately from nulls

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

// ============================================================================
// VALUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    /// NaN floats count as null, the same way a missing cell does
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if !f.is_nan() => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
            _ => None,
        }
    }

    /// Integral floats ("20230114.0" from a lossy extract) are accepted
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| Value::Float(trimmed.parse::<f64>().ok()?).as_i64())
            }
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) => Some(f.to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    /// Parse a raw CSV cell: empty → null, then integer, then float, then text
    pub fn infer(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Float(f);
        }
        Value::Text(raw.to_string())
    }
}

/// Ordered by column name so content hashing is stable
pub type Row = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

// ============================================================================
// RECORD BATCH
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>) -> Self {
        RecordBatch {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a batch from rows; the column list is the union of row keys
    /// in first-seen order
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for name in row.keys() {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        RecordBatch { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Columns from `required` that the batch does not carry at all
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Register a column; existing rows read it as null until set
    pub fn ensure_column(&mut self, name: &str) {
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
    }
}

/// Cell lookup that treats an absent key as null
pub fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

// ============================================================================
// CSV EXTRACT
// ============================================================================

pub fn load_csv(csv_path: &Path) -> Result<RecordBatch> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    read_csv(file)
}

pub fn read_csv<R: Read>(reader: R) -> Result<RecordBatch> {
    let mut rdr = csv::Reader::from_reader(reader);

    let columns: Vec<String> = rdr
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut batch = RecordBatch::new(columns.clone());

    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV record {}", line + 1))?;

        let row: Row = columns
            .iter()
            .zip(record.iter())
            .map(|(name, raw)| (name.clone(), Value::infer(raw)))
            .collect();

        batch.rows.push(row);
    }

    Ok(batch)
}
