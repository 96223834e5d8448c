// 🧾 Fact Assembler - fact candidates from the cleaned batch, final rows once keys resolve

use crate::batch::{cell, RecordBatch, Row};
use crate::config::ColumnMapping;
use crate::dimensions::{category_label, TrendSignals};
use crate::surrogate_keys::ResolvedKeys;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// A fact before its category and trend surrogate keys are known.
/// The natural keys it carries are what the resolver looks up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCandidate {
    pub transaction_key: String,
    pub date_key: i64,
    pub category: String,
    pub trend: TrendSignals,
    pub gross_revenue: f64,
    pub rev_per_unit: f64,
    pub trend_for_product: f64,
}

/// One `fact_sales` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub transaction_key: String,
    pub date_key: i64,
    pub category_id: i64,
    pub trend_id: i64,
    pub gross_revenue: f64,
    pub rev_per_unit: f64,
    pub trend_for_product: f64,
}

/// SHA-256 over every column of the row, in column-name order
pub fn content_hash(row: &Row) -> String {
    let mut hasher = Sha256::new();
    for (column, value) in row {
        hasher.update(format!("{}={:?};", column, value));
    }
    format!("{:x}", hasher.finalize())
}

pub struct FactAssembler {
    columns: ColumnMapping,
}

impl FactAssembler {
    pub fn new(columns: &ColumnMapping) -> Self {
        FactAssembler {
            columns: columns.clone(),
        }
    }

    /// First configured identifier column the batch carries, if any
    pub fn identifier_column<'a>(&'a self, batch: &RecordBatch) -> Option<&'a str> {
        self.columns
            .transaction_id
            .iter()
            .find(|c| batch.has_column(c))
            .map(String::as_str)
    }

    pub fn candidates(&self, batch: &RecordBatch) -> Vec<FactCandidate> {
        let id_column = self.identifier_column(batch);
        if id_column.is_none() {
            warn!(
                candidates = ?self.columns.transaction_id,
                "no transaction identifier column, keying facts by content hash"
            );
        }

        let measures = [
            self.columns.gross_revenue.as_str(),
            self.columns.rev_per_unit.as_str(),
            self.columns.trend_for_product.as_str(),
        ];
        let missing = batch.missing_columns(&measures);
        if !missing.is_empty() {
            warn!(columns = ?missing, "measure columns absent from batch, defaulting to 0.0");
        }

        batch
            .rows
            .iter()
            .map(|row| {
                let transaction_key = id_column
                    .and_then(|c| cell(row, c).as_text())
                    .unwrap_or_else(|| content_hash(row));

                FactCandidate {
                    transaction_key,
                    date_key: cell(row, &self.columns.date_key).as_i64().unwrap_or(0),
                    category: category_label(row, &self.columns),
                    trend: TrendSignals::from_row(row, &self.columns),
                    gross_revenue: self.measure(row, &self.columns.gross_revenue),
                    rev_per_unit: self.measure(row, &self.columns.rev_per_unit),
                    trend_for_product: self.measure(row, &self.columns.trend_for_product),
                }
            })
            .collect()
    }

    fn measure(&self, row: &Row, column: &str) -> f64 {
        cell(row, column).as_f64().unwrap_or(0.0)
    }

    /// `keys[i]` belongs to `candidates[i]`
    pub fn assemble(&self, candidates: &[FactCandidate], keys: &[ResolvedKeys]) -> Vec<FactRow> {
        candidates
            .iter()
            .zip(keys)
            .map(|(candidate, keys)| FactRow {
                transaction_key: candidate.transaction_key.clone(),
                date_key: candidate.date_key,
                category_id: keys.category_id,
                trend_id: keys.trend_id,
                gross_revenue: candidate.gross_revenue,
                rev_per_unit: candidate.rev_per_unit,
                trend_for_product: candidate.trend_for_product,
            })
            .collect()
    }
}
