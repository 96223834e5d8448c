// ✅ Data Quality - validate and repair a batch before it becomes fact candidates
//
// Three rules run in a fixed order: uniqueness → required fields → revenue range.
// Every rule records whether the batch passed *before* its repair, then repairs
// deterministically. Violations are never raised.

use crate::batch::{cell, RecordBatch, Value};
use crate::config::ColumnMapping;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

pub const RULE_UNIQUENESS: &str = "uniqueness_check";
pub const RULE_NOT_NULL: &str = "null_check";
pub const RULE_RANGE: &str = "range_check";

// ============================================================================
// RULE OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_name: String,
    pub targets: Vec<String>,
    pub passed: bool,
    pub message: String,
}

impl RuleOutcome {
    pub fn pass(rule_name: &str, targets: &[&str], message: &str) -> Self {
        RuleOutcome {
            rule_name: rule_name.to_string(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
            passed: true,
            message: message.to_string(),
        }
    }

    pub fn fail(rule_name: &str, targets: &[&str], message: &str) -> Self {
        RuleOutcome {
            passed: false,
            ..RuleOutcome::pass(rule_name, targets, message)
        }
    }

    fn check(passed: bool, rule_name: &str, targets: &[&str], message: &str) -> Self {
        if passed {
            RuleOutcome::pass(rule_name, targets, message)
        } else {
            RuleOutcome::fail(rule_name, targets, message)
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

/// Append-only record of one validation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    outcomes: Vec<RuleOutcome>,
}

impl QualityReport {
    fn record(&mut self, outcome: RuleOutcome) {
        if outcome.passed {
            info!(rule = %outcome.rule_name, "quality rule passed");
        } else {
            warn!(rule = %outcome.rule_name, message = %outcome.message, "quality rule failed, repaired");
        }
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[RuleOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, rule_name: &str) -> Option<&RuleOutcome> {
        self.outcomes.iter().find(|o| o.rule_name == rule_name)
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed).count()
    }

    pub fn summary(&self) -> String {
        let failed: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.rule_name.as_str())
            .collect();

        if failed.is_empty() {
            format!("{} rules passed", self.outcomes.len())
        } else {
            format!(
                "{} of {} rules failed and were repaired: {}",
                failed.len(),
                self.outcomes.len(),
                failed.join(", ")
            )
        }
    }
}

// ============================================================================
// QUALITY VALIDATOR
// ============================================================================

pub struct QualityValidator {
    date_key: String,
    gross_revenue: String,
}

impl QualityValidator {
    pub fn new(columns: &ColumnMapping) -> Self {
        QualityValidator {
            date_key: columns.date_key.clone(),
            gross_revenue: columns.gross_revenue.clone(),
        }
    }

    /// Returns a repaired copy of `batch` plus the report. Never fails.
    pub fn validate(&self, batch: &RecordBatch, primary_key: &str) -> (RecordBatch, QualityReport) {
        let mut cleaned = batch.clone();
        let mut report = QualityReport::default();

        report.record(self.check_uniqueness(&mut cleaned, primary_key));
        report.record(self.check_required(&mut cleaned, primary_key));
        report.record(self.check_revenue_range(&mut cleaned));

        (cleaned, report)
    }

    /// Keeps the first occurrence of each key. Nulls compare equal to each other.
    fn check_uniqueness(&self, batch: &mut RecordBatch, primary_key: &str) -> RuleOutcome {
        let before = batch.len();
        let mut seen: HashSet<Option<String>> = HashSet::new();
        batch
            .rows
            .retain(|row| seen.insert(cell(row, primary_key).as_text()));
        let dropped = before - batch.len();

        RuleOutcome::check(
            dropped == 0,
            RULE_UNIQUENESS,
            &[primary_key],
            &format!("{} duplicate {} values dropped", dropped, primary_key),
        )
    }

    fn check_required(&self, batch: &mut RecordBatch, primary_key: &str) -> RuleOutcome {
        let critical = [primary_key, self.date_key.as_str(), self.gross_revenue.as_str()];

        let null_cells = batch
            .rows
            .iter()
            .map(|row| {
                let pk_null = cell(row, primary_key).is_null() as usize;
                let date_null = cell(row, &self.date_key).as_i64().is_none() as usize;
                let revenue_null = cell(row, &self.gross_revenue).as_f64().is_none() as usize;
                pk_null + date_null + revenue_null
            })
            .sum::<usize>();

        // A row without a primary key cannot be identified downstream
        let before = batch.len();
        batch.rows.retain(|row| !cell(row, primary_key).is_null());
        let dropped = before - batch.len();
        if dropped > 0 {
            warn!(column = primary_key, dropped, "dropped rows with null primary key");
        }

        batch.ensure_column(&self.date_key);
        batch.ensure_column(&self.gross_revenue);
        for row in &mut batch.rows {
            let date_key = cell(row, &self.date_key).as_i64().unwrap_or(0);
            row.insert(self.date_key.clone(), Value::Int(date_key));

            let revenue = cell(row, &self.gross_revenue).as_f64().unwrap_or(0.0);
            row.insert(self.gross_revenue.clone(), Value::Float(revenue));
        }

        RuleOutcome::check(
            null_cells == 0,
            RULE_NOT_NULL,
            &critical,
            &format!(
                "{} null critical values repaired, {} rows without {} dropped",
                null_cells, dropped, primary_key
            ),
        )
    }

    /// Runs after the null repair, so every revenue cell is a float here
    fn check_revenue_range(&self, batch: &mut RecordBatch) -> RuleOutcome {
        let mut clamped = 0;
        for row in &mut batch.rows {
            if let Some(revenue) = row.get_mut(&self.gross_revenue) {
                if matches!(revenue, Value::Float(v) if *v < 0.0) {
                    *revenue = Value::Float(0.0);
                    clamped += 1;
                }
            }
        }

        let target = format!("{}>=0", self.gross_revenue);
        RuleOutcome::check(
            clamped == 0,
            RULE_RANGE,
            &[target.as_str()],
            &format!("{} negative values clamped to 0.0", clamped),
        )
    }
}
