pub mod curation;
pub mod extract;
pub mod pipeline;
pub mod reconcile;

pub use curation::{
    collect_overlay_garbage, next_for_review, review_queue, CurationError, CurationResult, Curator,
};
pub use extract::{extract_parallel, parse_metadata, ExtractError, Extractor, MakeExtractor};
pub use pipeline::{
    discover_origins, LoadReportSummary, Pipeline, PipelineError, PipelineResult,
    ReconcileReport, RunReport, ScanReport,
};
pub use reconcile::{classify, Classification};
