// 🚚 Warehouse Loader - one run = one SQLite transaction
//
// SchemaReset → DimensionsPersisted → KeysResolved → FactsPersisted → Committed
// Any error rolls the whole transaction back (schema drop included), so a
// failed run leaves the previous warehouse exactly as it was.

use crate::config::PipelineConfig;
use crate::db;
use crate::dimensions::Dimensions;
use crate::error::{LoadError, LoadFailure};
use crate::facts::{FactAssembler, FactCandidate};
use crate::surrogate_keys::{KeySubstitutions, SurrogateKeyResolver};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

// ============================================================================
// STAGES + RUN RECORD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    SchemaReset,
    DimensionsPersisted,
    KeysResolved,
    FactsPersisted,
    Committed,
    Failed,
}

impl LoadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStage::SchemaReset => "schema_reset",
            LoadStage::DimensionsPersisted => "dimensions_persisted",
            LoadStage::KeysResolved => "keys_resolved",
            LoadStage::FactsPersisted => "facts_persisted",
            LoadStage::Committed => "committed",
            LoadStage::Failed => "failed",
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Emitted once per run, success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub stage: String,
    pub db_path: String,
    pub status: RunStatus,
    pub message: Option<String>,
    /// Where a failed run stopped; `None` if it never got a connection
    pub failed_stage: Option<LoadStage>,
    /// Final state of the run: `Committed` or `Failed`
    pub final_state: LoadStage,
    /// Row counts of the warehouse as left by this run
    pub tables_loaded: BTreeMap<String, u64>,
    pub key_substitutions: KeySubstitutions,
    pub exec_seconds: f64,
    pub db_size_bytes: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl RunRecord {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn table_count(&self, table: &str) -> u64 {
        self.tables_loaded.get(table).copied().unwrap_or(0)
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What the run reached before it ended
#[derive(Debug, Clone, Copy)]
struct Progress {
    current: LoadStage,
    substitutions: KeySubstitutions,
}

// ============================================================================
// WAREHOUSE LOADER
// ============================================================================

pub struct WarehouseLoader {
    db_path: PathBuf,
    max_default_ratio: Option<f64>,
    assembler: FactAssembler,
}

impl WarehouseLoader {
    pub fn new(config: &PipelineConfig) -> Self {
        WarehouseLoader {
            db_path: config.warehouse_path.clone(),
            max_default_ratio: config.max_default_ratio,
            assembler: FactAssembler::new(&config.columns),
        }
    }

    /// Open the configured warehouse and load into it
    pub fn load(
        &self,
        candidates: &[FactCandidate],
        dims: &Dimensions,
    ) -> Result<RunRecord, LoadFailure> {
        let started = Instant::now();

        match db::open_warehouse(&self.db_path) {
            Ok(conn) => self.run(conn, candidates, dims, started),
            Err(e) => {
                error!(db_path = %self.db_path.display(), error = %e, "cannot open warehouse");
                Err(self.reject_at(started, LoadError::Sqlite(e)))
            }
        }
    }

    /// Fail the run without opening the warehouse; the existing file is untouched
    pub fn reject(&self, error: LoadError) -> LoadFailure {
        self.reject_at(Instant::now(), error)
    }

    fn reject_at(&self, started: Instant, error: LoadError) -> LoadFailure {
        let record = self.record(
            started,
            Some(&error),
            None,
            BTreeMap::new(),
            None,
            KeySubstitutions::default(),
        );
        LoadFailure { record, error }
    }

    /// Load using a caller-provided connection. The connection is owned by
    /// the run and closed before returning, on every path.
    pub fn load_with_connection(
        &self,
        conn: Connection,
        candidates: &[FactCandidate],
        dims: &Dimensions,
    ) -> Result<RunRecord, LoadFailure> {
        self.run(conn, candidates, dims, Instant::now())
    }

    fn run(
        &self,
        mut conn: Connection,
        candidates: &[FactCandidate],
        dims: &Dimensions,
        started: Instant,
    ) -> Result<RunRecord, LoadFailure> {
        let mut progress = Progress {
            current: LoadStage::SchemaReset,
            substitutions: KeySubstitutions::default(),
        };

        let outcome = db::enable_foreign_keys(&conn)
            .map_err(LoadError::from)
            .and_then(|_| self.run_in_transaction(&mut conn, candidates, dims, &mut progress));

        let tables_loaded = db::table_counts(&conn).unwrap_or_else(|e| {
            warn!(error = %e, "could not count warehouse tables");
            BTreeMap::new()
        });
        let db_size = db::storage_size_bytes(&conn).ok();

        if let Err((_, e)) = conn.close() {
            warn!(error = %e, "warehouse connection did not close cleanly");
        }

        match outcome {
            Ok(()) => {
                let record = self.record(started, None, None, tables_loaded, db_size, progress.substitutions);
                info!(
                    run_id = %record.run_id,
                    fact_sales = record.table_count(db::FACT_SALES),
                    exec_seconds = record.exec_seconds,
                    "warehouse load committed"
                );
                Ok(record)
            }
            Err(error) => {
                let record = self.record(
                    started,
                    Some(&error),
                    Some(progress.current),
                    tables_loaded,
                    db_size,
                    progress.substitutions,
                );
                error!(
                    run_id = %record.run_id,
                    stage = %progress.current,
                    %error,
                    "warehouse load failed, rolled back"
                );
                Err(LoadFailure { record, error })
            }
        }
    }

    fn run_in_transaction(
        &self,
        conn: &mut Connection,
        candidates: &[FactCandidate],
        dims: &Dimensions,
        progress: &mut Progress,
    ) -> Result<(), LoadError> {
        let tx = conn.transaction()?;

        match self.run_stages(&tx, candidates, dims, progress) {
            Ok(()) => {
                progress.current = LoadStage::Committed;
                tx.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    error!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        tx: &Connection,
        candidates: &[FactCandidate],
        dims: &Dimensions,
        progress: &mut Progress,
    ) -> Result<(), LoadError> {
        progress.current = LoadStage::SchemaReset;
        db::create_star_schema(tx)?;
        debug!("star schema recreated");

        progress.current = LoadStage::DimensionsPersisted;
        let stage = progress.current;
        db::insert_date_dim(tx, &dims.date)
            .map_err(|e| LoadError::from_write(e, stage, db::DIM_DATE))?;
        db::insert_category_dim(tx, &dims.category)
            .map_err(|e| LoadError::from_write(e, stage, db::DIM_CATEGORY))?;
        db::insert_trend_dim(tx, &dims.trend)
            .map_err(|e| LoadError::from_write(e, stage, db::DIM_TREND))?;
        info!(
            dim_date = dims.date.len(),
            dim_product_category = dims.category.len(),
            dim_trend = dims.trend.len(),
            "dimensions persisted"
        );

        progress.current = LoadStage::KeysResolved;
        let resolver = SurrogateKeyResolver::new(&db::read_categories(tx)?, &db::read_trends(tx)?);
        let resolution = resolver.resolve(candidates);
        progress.substitutions = resolution.substitutions;
        if let Some(limit) = self.max_default_ratio {
            if resolution.substitutions.ratio() > limit {
                return Err(LoadError::TooManyDefaults {
                    substituted: resolution.substitutions.rows_with_defaults,
                    total: resolution.substitutions.total_rows,
                    limit,
                });
            }
        }

        progress.current = LoadStage::FactsPersisted;
        let stage = progress.current;
        let facts = self.assembler.assemble(candidates, &resolution.keys);
        db::insert_facts(tx, &facts).map_err(|e| LoadError::from_write(e, stage, db::FACT_SALES))?;
        let mart_rows = db::populate_mart(tx)
            .map_err(|e| LoadError::from_write(e, stage, db::MART_DAILY_CATEGORY))?;
        info!(fact_sales = facts.len(), mart_rows, "facts persisted");

        Ok(())
    }

    fn record(
        &self,
        started: Instant,
        error: Option<&LoadError>,
        failed_stage: Option<LoadStage>,
        tables_loaded: BTreeMap<String, u64>,
        db_size_bytes: Option<u64>,
        key_substitutions: KeySubstitutions,
    ) -> RunRecord {
        let exec_seconds = (started.elapsed().as_secs_f64() * 10_000.0).round() / 10_000.0;

        RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            stage: "load".to_string(),
            db_path: self.db_path.display().to_string(),
            status: if error.is_some() { RunStatus::Failed } else { RunStatus::Success },
            message: error.map(|e| e.to_string()),
            failed_stage,
            final_state: if error.is_some() { LoadStage::Failed } else { LoadStage::Committed },
            tables_loaded,
            key_substitutions,
            exec_seconds,
            db_size_bytes,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::batch::{RecordBatch, Row, Value};
    use crate::dimensions::{CategoryDimRow, DimensionBuilder};
    use std::path::Path;

    /// Every warehouse row, in storage order, for whole-warehouse comparisons
    pub(crate) fn snapshot(path: &Path) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut out = Vec::new();

        for table in db::WAREHOUSE_TABLES {
            if !db::table_exists(&conn, table).unwrap() {
                continue;
            }
            let mut stmt = conn
                .prepare(&format!("SELECT * FROM {} ORDER BY rowid", table))
                .unwrap();
            let n = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    (0..n)
                        .map(|i| row.get::<_, rusqlite::types::Value>(i))
                        .collect::<Result<Vec<_>, _>>()
                })
                .unwrap();
            for row in rows {
                out.push(format!("{}: {:?}", table, row.unwrap()));
            }
        }

        out
    }

    fn sale(id: &str, date_key: i64, category: Option<&str>, coffee: f64, revenue: f64) -> Row {
        let mut row = Row::new();
        row.insert("transaction_id".to_string(), Value::Text(id.to_string()));
        row.insert("date_key".to_string(), Value::Int(date_key));
        row.insert(
            "product_category_mapped".to_string(),
            category.map(|c| Value::Text(c.to_string())).unwrap_or(Value::Null),
        );
        row.insert("coffee".to_string(), Value::Float(coffee));
        row.insert("gross_revenue".to_string(), Value::Float(revenue));
        row.insert("rev_per_unit".to_string(), Value::Float(revenue / 2.0));
        row.insert("trend_for_product".to_string(), Value::Float(coffee));
        row
    }

    fn sample_batch() -> RecordBatch {
        RecordBatch::from_rows(vec![
            sale("T1", 20230114, Some("Coffee"), 50.0, 6.0),
            sale("T2", 20230114, Some("Tea"), 50.0, 4.0),
            sale("T3", 20230115, None, 48.0, 3.0),
        ])
    }

    fn prepare(config: &PipelineConfig, batch: &RecordBatch) -> (Vec<FactCandidate>, Dimensions) {
        let dims = DimensionBuilder::new(&config.columns).build(batch);
        let candidates = FactAssembler::new(&config.columns).candidates(batch);
        (candidates, dims)
    }

    fn test_config(dir: &Path) -> PipelineConfig {
        PipelineConfig::default().with_warehouse(dir.join("dw.sqlite"))
    }

    #[test]
    fn test_successful_load_commits_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (candidates, dims) = prepare(&config, &sample_batch());

        let record = WarehouseLoader::new(&config).load(&candidates, &dims).unwrap();

        assert!(record.is_success());
        assert_eq!(record.final_state, LoadStage::Committed);
        assert_eq!(record.failed_stage, None);
        assert_eq!(record.table_count(db::DIM_DATE), 2);
        assert_eq!(record.table_count(db::DIM_CATEGORY), 3);
        assert_eq!(record.table_count(db::DIM_TREND), 2);
        assert_eq!(record.table_count(db::FACT_SALES), 3);
        assert_eq!(record.table_count(db::MART_DAILY_CATEGORY), 3);
        assert!(!record.key_substitutions.any());
        assert!(record.db_size_bytes.unwrap_or(0) > 0);

        let conn = db::open_warehouse(&config.warehouse_path).unwrap();
        assert!(db::integrity_check(&conn).unwrap().is_clean());
    }

    #[test]
    fn test_missing_category_keyed_to_other() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (candidates, dims) = prepare(&config, &sample_batch());

        WarehouseLoader::new(&config).load(&candidates, &dims).unwrap();

        let conn = db::open_warehouse(&config.warehouse_path).unwrap();
        let (fact_category, other_id): (i64, i64) = conn
            .query_row(
                "SELECT f.category_id,
                        (SELECT category_id FROM dim_product_category WHERE label = 'other')
                 FROM fact_sales f WHERE f.transaction_key = 'T3'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(fact_category, other_id);
    }

    #[test]
    fn test_rerun_replaces_warehouse_identically() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (candidates, dims) = prepare(&config, &sample_batch());
        let loader = WarehouseLoader::new(&config);

        loader.load(&candidates, &dims).unwrap();
        let first = snapshot(&config.warehouse_path);
        loader.load(&candidates, &dims).unwrap();
        let second = snapshot(&config.warehouse_path);

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_transaction_key_rolls_back_whole_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let loader = WarehouseLoader::new(&config);
        let (candidates, dims) = prepare(&config, &sample_batch());
        loader.load(&candidates, &dims).unwrap();
        let before = snapshot(&config.warehouse_path);

        // facts built without validation, so T1 reaches fact_sales twice
        let next = RecordBatch::from_rows(vec![
            sale("T1", 20230201, Some("Bakery"), 10.0, 1.0),
            sale("T1", 20230202, Some("Bakery"), 11.0, 2.0),
        ]);
        let (candidates, dims) = prepare(&config, &next);

        let failure = loader.load(&candidates, &dims).unwrap_err();

        assert_eq!(failure.record.status, RunStatus::Failed);
        assert_eq!(failure.record.final_state, LoadStage::Failed);
        assert_eq!(failure.record.failed_stage, Some(LoadStage::FactsPersisted));
        assert!(failure.error.is_constraint_violation());
        assert!(failure.record.message.is_some());
        assert_eq!(failure.record.table_count(db::FACT_SALES), 3);
        assert_eq!(snapshot(&config.warehouse_path), before);

        let json = failure.record.to_json_line().unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"failed_stage\":\"facts_persisted\""));
    }

    #[test]
    fn test_residual_dimension_duplicate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (candidates, mut dims) = prepare(&config, &sample_batch());
        dims.category.push(CategoryDimRow { label: "coffee".to_string() });

        let failure = WarehouseLoader::new(&config).load(&candidates, &dims).unwrap_err();

        assert_eq!(failure.record.failed_stage, Some(LoadStage::DimensionsPersisted));
        match &failure.error {
            LoadError::ConstraintViolation { table, .. } => assert_eq!(table, db::DIM_CATEGORY),
            other => panic!("expected constraint violation, got {other:?}"),
        }
        // fresh warehouse: nothing survives the rollback
        assert!(failure.record.tables_loaded.is_empty());
    }

    #[test]
    fn test_default_ratio_policy_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.max_default_ratio = Some(0.0);
        let (mut candidates, dims) = prepare(&config, &sample_batch());
        candidates[0].category = "juice".to_string();

        let failure = WarehouseLoader::new(&config).load(&candidates, &dims).unwrap_err();

        assert_eq!(failure.record.failed_stage, Some(LoadStage::KeysResolved));
        assert_eq!(failure.record.key_substitutions.category_defaults, 1);
        assert!(matches!(
            failure.error,
            LoadError::TooManyDefaults { substituted: 1, total: 3, .. }
        ));
    }

    #[test]
    fn test_substitutions_reported_without_policy() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (mut candidates, dims) = prepare(&config, &sample_batch());
        candidates[1].trend.0[0] = Some(99.0);

        let record = WarehouseLoader::new(&config).load(&candidates, &dims).unwrap();

        assert_eq!(record.key_substitutions.trend_defaults, 1);
        assert_eq!(record.key_substitutions.total_rows, 3);
    }

    #[test]
    fn test_unopenable_warehouse_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default()
            .with_warehouse(dir.path().join("no_such_dir").join("dw.sqlite"));
        let (candidates, dims) = prepare(&config, &sample_batch());

        let failure = WarehouseLoader::new(&config).load(&candidates, &dims).unwrap_err();

        assert_eq!(failure.record.status, RunStatus::Failed);
        assert_eq!(failure.record.final_state, LoadStage::Failed);
        assert_eq!(failure.record.failed_stage, None);
        assert!(failure.record.tables_loaded.is_empty());
        assert_eq!(failure.record.db_size_bytes, None);
        assert!(matches!(failure.error, LoadError::Sqlite(_)));
        assert!(!dir.path().join("no_such_dir").exists());
    }

    #[test]
    fn test_load_with_in_memory_connection() {
        let config = PipelineConfig::default().with_warehouse(":memory:");
        let (candidates, dims) = prepare(&config, &sample_batch());

        let record = WarehouseLoader::new(&config)
            .load_with_connection(Connection::open_in_memory().unwrap(), &candidates, &dims)
            .unwrap();

        assert!(record.is_success());
        assert_eq!(record.table_count(db::FACT_SALES), 3);
    }
}
