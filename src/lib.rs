// Star Warehouse - Core Library
// Quality repair → dimension derivation → surrogate keys → transactional load

pub mod batch;
pub mod config;
pub mod data_quality;
pub mod db;
pub mod dimensions;
pub mod error;
pub mod facts;
pub mod loader;
pub mod pipeline;
pub mod surrogate_keys;

// Re-export commonly used types
pub use batch::{load_csv, read_csv, RecordBatch, Row, Value};
pub use config::{ColumnMapping, PipelineConfig};
pub use data_quality::{QualityReport, QualityValidator, RuleOutcome};
pub use db::{integrity_check, missing_tables, open_warehouse, table_counts, IntegrityReport, FACT_SALES};
pub use dimensions::{
    CategoryDimRow, DateDimRow, DimensionBuilder, Dimensions, TrendDimRow, TrendSignals,
};
pub use error::{LoadError, LoadFailure};
pub use facts::{FactAssembler, FactCandidate, FactRow};
pub use loader::{LoadStage, RunRecord, RunStatus, WarehouseLoader};
pub use pipeline::{Pipeline, PipelineRun, PreparedBatch};
pub use surrogate_keys::{KeySubstitutions, ResolvedKeys, SurrogateKeyResolver};
