pub mod ingestion_service;
pub mod validation_service;

pub use ingestion_service::{FetchedBatch, IngestionService, PipelineError, PipelineState};
pub use validation_service::{ValidationReport, ValidationService};
