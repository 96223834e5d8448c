// ⚙️ Pipeline Configuration - explicit locations and column names
// Passed into every stage; nothing here is process-global

use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Batch column names the core reads. Defaults match the sales/trends extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    /// Checked in order; the first one present in the batch identifies transactions
    pub transaction_id: Vec<String>,
    pub date_key: String,
    pub gross_revenue: String,
    pub rev_per_unit: String,
    pub trend_for_product: String,
    pub category: String,
    /// Stored as signal_1..signal_4 in dim_trend
    pub trend_signals: [String; 4],
    pub trend_avg: String,
    pub trend_max: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        ColumnMapping {
            transaction_id: vec!["transaction_id".to_string(), "transaction_sk".to_string()],
            date_key: "date_key".to_string(),
            gross_revenue: "gross_revenue".to_string(),
            rev_per_unit: "rev_per_unit".to_string(),
            trend_for_product: "trend_for_product".to_string(),
            category: "product_category_mapped".to_string(),
            trend_signals: [
                "coffee".to_string(),
                "bakery".to_string(),
                "tea".to_string(),
                "chocolate".to_string(),
            ],
            trend_avg: "trend_avg".to_string(),
            trend_max: "trend_max".to_string(),
        }
    }
}

impl ColumnMapping {
    /// The six columns forming the trend natural key, in dim_trend order
    pub fn trend_columns(&self) -> [&str; 6] {
        [
            &self.trend_signals[0],
            &self.trend_signals[1],
            &self.trend_signals[2],
            &self.trend_signals[3],
            &self.trend_avg,
            &self.trend_max,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub warehouse_path: PathBuf,
    pub primary_key: String,
    pub columns: ColumnMapping,
    /// Fail the load when more than this share of fact rows needed a default key
    pub max_default_ratio: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            warehouse_path: PathBuf::from("warehouse/coffee_dw.sqlite"),
            primary_key: "transaction_id".to_string(),
            columns: ColumnMapping::default(),
            max_default_ratio: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_warehouse(mut self, path: impl Into<PathBuf>) -> Self {
        self.warehouse_path = path.into();
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| LoadError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.primary_key.trim().is_empty() {
            return Err(LoadError::Config("primary_key must not be empty".to_string()));
        }
        if let Some(ratio) = self.max_default_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(LoadError::Config(format!(
                    "max_default_ratio must be within 0.0..=1.0, got {}",
                    ratio
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            warehouse_path = "/tmp/dw.sqlite"
            primary_key = "transaction_sk"

            [columns]
            category = "category"
            "#,
        )
        .unwrap();

        assert_eq!(config.warehouse_path, PathBuf::from("/tmp/dw.sqlite"));
        assert_eq!(config.primary_key, "transaction_sk");
        assert_eq!(config.columns.category, "category");
        assert_eq!(config.columns.date_key, "date_key");
        assert_eq!(config.columns.trend_columns()[0], "coffee");
        assert_eq!(config.max_default_ratio, None);
    }

    #[test]
    fn test_rejects_out_of_range_ratio() {
        let result = PipelineConfig::from_toml_str("max_default_ratio = 1.5");
        assert!(matches!(result, Err(LoadError::Config(_))));
    }
}
