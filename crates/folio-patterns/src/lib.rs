//! Pattern engine for Folio.
//!
//! Scans a workspace's research graph and task store for eight structural
//! conditions, records each one once as a detection, and applies the
//! configured action:
//!
//! - **evaluators**: one per pattern type, each deduplicating by a typed key
//! - **engine**: runs evaluators, records detections, drives the lifecycle
//! - **queue**: per-workspace scan jobs with bounded retry
//! - **graph**: the graph query seam and its SQLite implementation

pub mod engine;
pub mod error;
pub mod evaluators;
pub mod graph;
pub mod queue;
pub mod types;

pub use engine::PatternEngine;
pub use error::PatternError;
pub use evaluators::{default_evaluators, Evaluator, ScanContext};
pub use graph::{GraphQuery, SqliteGraph};
pub use queue::{JobOutcome, QueueWorker, RetryPolicy, ScanJob, ScanQueue, ScanRunner};
pub use types::{
    DetectionStatus, Finding, PatternAction, PatternRule, PatternSettings, PatternType, ScanReport,
    Severity,
};
