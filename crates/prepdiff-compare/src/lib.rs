//! Comparison of two preprocessing output trees.
//!
//! For each relative path present under two roots, loads both files, applies
//! the comparator for its kind (NIfTI volume or TSV table), and hands the
//! resulting [`report::PairReport`] to a [`report::ReportSink`]. Pairs are
//! processed one at a time, so only two files are in memory at once.

pub mod nifti;
pub mod report;
pub mod runner;
pub mod table;
pub mod volume;

pub use report::{Collector, MarkdownSink, PairReport, PairStatus, ReportSink, TextSink};
pub use runner::{run, FilePairSpec, RunConfig, RunSummary};
