//! Loading archived sweep outputs into a relational store.

pub mod archive;
pub mod bundle;
pub mod compare;
pub mod coverage;
pub mod error;
pub mod ingest;
pub mod scratch;
pub mod store;

pub use archive::{recover_env_vars, BundleEnvVars};
pub use bundle::{bundle_key, unify_bundles, EnvSet};
pub use compare::{attributed_records, compare_bundles, BundleComparison};
pub use coverage::{parse_coverage_document, CoverageDocument, CoverageStat, CoverageSummary};
pub use error::{IngestError, IngestResult};
pub use ingest::{
    ingest_archive, ingest_archive_bytes, ingest_batch, ingest_coverage_json, BatchEntry,
    BatchReport, IngestSummary,
};
pub use store::{BenchmarkRow, CoverageRow, EnvVarRow, RowCounts, RunKind, RunRow, RunStore};
