// 🔁 Pipeline - validate → build dimensions → load, for one batch

use crate::batch::RecordBatch;
use crate::config::PipelineConfig;
use crate::data_quality::{QualityReport, QualityValidator};
use crate::dimensions::{DimensionBuilder, Dimensions};
use crate::error::{LoadError, LoadFailure};
use crate::facts::{FactAssembler, FactCandidate};
use crate::loader::{RunRecord, WarehouseLoader};
use tracing::{error, info};

/// Everything derived in memory before the warehouse is touched
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub cleaned: RecordBatch,
    pub quality: QualityReport,
    pub dimensions: Dimensions,
    pub candidates: Vec<FactCandidate>,
}

#[derive(Debug)]
pub struct PipelineRun {
    pub quality: QualityReport,
    pub load: Result<RunRecord, LoadFailure>,
}

impl PipelineRun {
    /// The run record whichever way the load went
    pub fn record(&self) -> &RunRecord {
        match &self.load {
            Ok(record) => record,
            Err(failure) => &failure.record,
        }
    }

    pub fn into_result(self) -> Result<RunRecord, LoadFailure> {
        self.load
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn prepare(&self, batch: &RecordBatch) -> PreparedBatch {
        let columns = &self.config.columns;

        let (cleaned, quality) = QualityValidator::new(columns).validate(batch, &self.config.primary_key);
        info!(
            rows_in = batch.len(),
            rows_out = cleaned.len(),
            summary = %quality.summary(),
            "batch validated"
        );

        let dimensions = DimensionBuilder::new(columns).build(&cleaned);
        let candidates = FactAssembler::new(columns).candidates(&cleaned);

        PreparedBatch {
            cleaned,
            quality,
            dimensions,
            candidates,
        }
    }

    /// Fails without opening the warehouse when the batch lacks the
    /// primary-key column
    pub fn run(&self, batch: &RecordBatch) -> PipelineRun {
        let prepared = self.prepare(batch);
        let loader = WarehouseLoader::new(&self.config);

        let load = if batch.has_column(&self.config.primary_key) {
            loader.load(&prepared.candidates, &prepared.dimensions)
        } else {
            let failure = loader.reject(LoadError::MissingPrimaryKey(self.config.primary_key.clone()));
            error!(
                column = %self.config.primary_key,
                columns = ?batch.columns,
                "batch rejected, warehouse left untouched"
            );
            Err(failure)
        };

        PipelineRun {
            quality: prepared.quality,
            load,
        }
    }
}
