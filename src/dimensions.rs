// 🧊 Dimension Builder - derive deduplicated dimension rows from a cleaned batch
//
// Surrogate keys are NOT assigned here; the warehouse assigns them on insert.

use crate::batch::{cell, RecordBatch, Row};
use crate::config::ColumnMapping;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

pub const FALLBACK_CATEGORY: &str = "other";

// ============================================================================
// DATE DIMENSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateDimRow {
    pub date_key: i64,
    pub sale_date: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    /// Monday = 0 .. Sunday = 6
    pub day_of_week: Option<u32>,
    pub is_weekend: Option<bool>,
}

impl DateDimRow {
    /// Every attribute is a pure function of `date_key`. A key that is not a
    /// real YYYYMMDD calendar date keeps its key with null attributes.
    pub fn from_date_key(date_key: i64) -> Self {
        match parse_date_key(date_key) {
            Some(date) => {
                let dow = date.weekday().num_days_from_monday();
                DateDimRow {
                    date_key,
                    sale_date: Some(date.format("%Y-%m-%d").to_string()),
                    year: Some(date.year()),
                    month: Some(date.month()),
                    day_of_week: Some(dow),
                    is_weekend: Some(dow >= 5),
                }
            }
            None => DateDimRow {
                date_key,
                sale_date: None,
                year: None,
                month: None,
                day_of_week: None,
                is_weekend: None,
            },
        }
    }
}

pub fn parse_date_key(date_key: i64) -> Option<NaiveDate> {
    if !(10000101..=99991231).contains(&date_key) {
        return None;
    }
    let year = (date_key / 10_000) as i32;
    let month = ((date_key / 100) % 100) as u32;
    let day = (date_key % 100) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}

// ============================================================================
// CATEGORY DIMENSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryDimRow {
    pub label: String,
}

/// Trim, collapse inner whitespace, lowercase. Empty or missing → "other".
pub fn normalize_category(raw: Option<&str>) -> String {
    let normalized = raw
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .unwrap_or_default();

    if normalized.is_empty() {
        FALLBACK_CATEGORY.to_string()
    } else {
        normalized
    }
}

pub fn category_label(row: &Row, columns: &ColumnMapping) -> String {
    normalize_category(cell(row, &columns.category).as_text().as_deref())
}

// ============================================================================
// TREND DIMENSION
// ============================================================================

/// signal_1..signal_4, trend_avg, trend_max. `None` is a real value here:
/// two rows that both lack a signal are the same trend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSignals(pub [Option<f64>; 6]);

/// Hashable form of `TrendSignals`: bit patterns, with -0.0 folded into 0.0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrendKey([Option<u64>; 6]);

impl TrendSignals {
    pub fn from_row(row: &Row, columns: &ColumnMapping) -> Self {
        let mut values = [None; 6];
        for (slot, column) in values.iter_mut().zip(columns.trend_columns()) {
            *slot = cell(row, column).as_f64();
        }
        TrendSignals(values)
    }

    pub fn key(&self) -> TrendKey {
        let mut bits = [None; 6];
        for (slot, value) in bits.iter_mut().zip(self.0) {
            *slot = value
                .filter(|v| !v.is_nan())
                .map(|v| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() });
        }
        TrendKey(bits)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendDimRow {
    pub signals: TrendSignals,
}

// ============================================================================
// DIMENSION BUILDER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub date: Vec<DateDimRow>,
    pub category: Vec<CategoryDimRow>,
    pub trend: Vec<TrendDimRow>,
}

pub struct DimensionBuilder {
    columns: ColumnMapping,
}

impl DimensionBuilder {
    pub fn new(columns: &ColumnMapping) -> Self {
        DimensionBuilder {
            columns: columns.clone(),
        }
    }

    pub fn build(&self, batch: &RecordBatch) -> Dimensions {
        let mut required = vec![self.columns.date_key.as_str(), self.columns.category.as_str()];
        required.extend(self.columns.trend_columns());
        let missing = batch.missing_columns(&required);
        if !missing.is_empty() {
            warn!(columns = ?missing, "columns absent from batch, defaulting to null");
        }

        let dims = Dimensions {
            date: self.build_date(batch),
            category: self.build_category(batch),
            trend: self.build_trend(batch),
        };

        debug!(
            dim_date = dims.date.len(),
            dim_product_category = dims.category.len(),
            dim_trend = dims.trend.len(),
            "dimensions derived"
        );
        dims
    }

    /// Deduplicated by date_key, ascending
    fn build_date(&self, batch: &RecordBatch) -> Vec<DateDimRow> {
        let keys: BTreeSet<i64> = batch
            .rows
            .iter()
            .map(|row| cell(row, &self.columns.date_key).as_i64().unwrap_or(0))
            .collect();

        let rows: Vec<DateDimRow> = keys.into_iter().map(DateDimRow::from_date_key).collect();
        let unparsed = rows.iter().filter(|r| r.sale_date.is_none()).count();
        if unparsed > 0 {
            warn!(unparsed, "date keys that are not calendar dates kept with null attributes");
        }
        rows
    }

    /// Deduplicated by normalized label, lexicographic
    fn build_category(&self, batch: &RecordBatch) -> Vec<CategoryDimRow> {
        batch
            .rows
            .iter()
            .map(|row| category_label(row, &self.columns))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|label| CategoryDimRow { label })
            .collect()
    }

    /// Deduplicated by full tuple, first-seen order
    fn build_trend(&self, batch: &RecordBatch) -> Vec<TrendDimRow> {
        let mut seen = HashSet::new();
        batch
            .rows
            .iter()
            .map(|row| TrendSignals::from_row(row, &self.columns))
            .filter(|signals| seen.insert(signals.key()))
            .map(|signals| TrendDimRow { signals })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;

    fn sale(date_key: Value, category: Option<&str>, coffee: Option<f64>) -> Row {
        let mut row = Row::new();
        row.insert("date_key".to_string(), date_key);
        row.insert(
            "product_category_mapped".to_string(),
            category.map(|c| Value::Text(c.to_string())).unwrap_or(Value::Null),
        );
        row.insert("coffee".to_string(), coffee.map(Value::Float).unwrap_or(Value::Null));
        row
    }

    fn builder() -> DimensionBuilder {
        DimensionBuilder::new(&ColumnMapping::default())
    }

    #[test]
    fn test_date_attributes_derived_from_key() {
        let row = DateDimRow::from_date_key(20230114);

        assert_eq!(row.sale_date.as_deref(), Some("2023-01-14"));
        assert_eq!(row.year, Some(2023));
        assert_eq!(row.month, Some(1));
        // 2023-01-14 is a Saturday
        assert_eq!(row.day_of_week, Some(5));
        assert_eq!(row.is_weekend, Some(true));

        let monday = DateDimRow::from_date_key(20230116);
        assert_eq!(monday.day_of_week, Some(0));
        assert_eq!(monday.is_weekend, Some(false));
    }

    #[test]
    fn test_malformed_date_key_maps_to_null_attributes() {
        for key in [0, 20231399, 2023011, 202301140] {
            let row = DateDimRow::from_date_key(key);
            assert_eq!(row.date_key, key);
            assert_eq!(row.sale_date, None);
            assert_eq!(row.is_weekend, None);
        }
    }

    #[test]
    fn test_date_dim_sorted_and_unique() {
        let batch = RecordBatch::from_rows(vec![
            sale(Value::Int(20230116), Some("Coffee"), Some(1.0)),
            sale(Value::Int(20230114), Some("Coffee"), Some(1.0)),
            sale(Value::Int(20230116), Some("Tea"), Some(2.0)),
            sale(Value::Int(0), None, None),
        ]);

        let dims = builder().build(&batch);

        let keys: Vec<i64> = dims.date.iter().map(|d| d.date_key).collect();
        assert_eq!(keys, vec![0, 20230114, 20230116]);
    }

    #[test]
    fn test_category_normalized_with_fallback() {
        let batch = RecordBatch::from_rows(vec![
            sale(Value::Int(20230114), Some("  Coffee "), None),
            sale(Value::Int(20230114), Some("coffee"), None),
            sale(Value::Int(20230114), Some("Hot   Chocolate"), None),
            sale(Value::Int(20230114), None, None),
            sale(Value::Int(20230114), Some("   "), None),
        ]);

        let dims = builder().build(&batch);

        let labels: Vec<&str> = dims.category.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["coffee", "hot chocolate", "other"]);
    }

    #[test]
    fn test_trend_dedup_is_null_aware_and_ordered() {
        let batch = RecordBatch::from_rows(vec![
            sale(Value::Int(20230114), None, Some(50.0)),
            sale(Value::Int(20230114), None, None),
            sale(Value::Int(20230115), None, Some(50.0)),
            sale(Value::Int(20230115), None, None),
            sale(Value::Int(20230116), None, Some(0.0)),
            sale(Value::Int(20230116), None, Some(-0.0)),
        ]);

        let dims = builder().build(&batch);

        assert_eq!(dims.trend.len(), 3);
        assert_eq!(dims.trend[0].signals.0[0], Some(50.0));
        assert_eq!(dims.trend[1].signals.0[0], None);
        assert_eq!(dims.trend[2].signals.0[0], Some(0.0));
        // absent columns are null, not zero
        assert!(dims.trend.iter().all(|t| t.signals.0[1..].iter().all(Option::is_none)));
    }

    #[test]
    fn test_empty_batch_builds_empty_dimensions() {
        let dims = builder().build(&RecordBatch::default());
        assert_eq!(dims, Dimensions::default());
    }
}
