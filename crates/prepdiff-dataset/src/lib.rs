//! BIDS dataset helpers: find task sessions and fetch their files.
//!
//! [`sessions::find_sessions`] scans per-session `scans.tsv` files for a task's
//! BOLD run and records the first matching session of each subject.
//! [`fetch::fetch_sessions`] then expands the functional, events, fieldmap and
//! anatomical patterns for each of those sessions and hands the matching paths
//! to a [`fetch::Retriever`], normally `datalad get`.

pub mod fetch;
pub mod sessions;

pub use fetch::{fetch_sessions, DataladRetriever, DryRunRetriever, FetchOptions, FetchSummary};
pub use sessions::{find_sessions, read_sessions, write_sessions, SessionRecord};
