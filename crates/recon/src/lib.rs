//! `chargeaudit-recon`: charge audit reconciliation engine.
//!
//! Pure engine crate: receives an input table and a remote source, returns
//! one verdict per row. No CLI or spreadsheet dependencies.

pub mod cache;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod report;
pub mod source;

pub use config::AuditConfig;
pub use engine::{run, Auditor, Progress};
pub use error::{FetchError, ReconError, RecordError};
pub use ingest::{InputRow, InputTable};
pub use model::{AuditResult, AuditStatus, CellValue, RecordStatus, RecordVerdict};
pub use source::{RemoteSource, SnapshotSource};
