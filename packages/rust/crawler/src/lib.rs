//! Namespace traversal: paginated enumeration, recursive retrieval, run report.
//!
//! This crate provides:
//! - [`Enumerator`]: pages through `asset.query` results for one namespace
//! - [`Mirror`]: depth-first mirror of a namespace tree with per-asset fallback
//! - [`MirrorReport`]: structured counts and errors of a run
//! - [`run_mirror`]: authenticate, mirror, report

pub mod engine;
pub mod enumerate;
pub mod pipeline;
pub mod report;

pub use engine::{Mirror, MirrorOptions};
pub use enumerate::{EnumerateOptions, Enumeration, Enumerator};
pub use pipeline::run_mirror;
pub use report::{MirrorReport, ProgressReporter, ReportError, SilentProgress};
