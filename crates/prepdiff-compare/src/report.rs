//! Per-pair reports and the sinks that receive them.

use std::fmt::Write as _;
use std::io::Write;

use prepdiff_core::{FileKind, PrepdiffError};
use serde::Serialize;

use crate::table::{ColumnChange, TableComparison};
use crate::volume::VolumeComparison;

/// Terminal state of one file pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Identical,
    Differ,
    ShapeMismatch,
    RowCountMismatch,
    Unsupported,
    LoadError,
}

/// Kind-specific payload of a [`PairReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PairDetails {
    Volume(VolumeComparison),
    Table(TableComparison),
    Error { message: String },
    None,
}

/// The structured result for one relative path.
///
/// # Examples
///
/// ```
/// use prepdiff_compare::report::{PairReport, PairStatus};
/// use prepdiff_compare::volume::VolumeComparison;
///
/// let report = PairReport::volume("anat/T1w.nii.gz", VolumeComparison::Identical);
/// assert_eq!(report.status, PairStatus::Identical);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairReport {
    pub path: String,
    pub kind: FileKind,
    pub status: PairStatus,
    pub details: PairDetails,
}

impl PairReport {
    pub fn volume(path: impl Into<String>, comparison: VolumeComparison) -> Self {
        let status = match &comparison {
            VolumeComparison::ShapeMismatch { .. } => PairStatus::ShapeMismatch,
            VolumeComparison::Identical => PairStatus::Identical,
            VolumeComparison::Differ(_) => PairStatus::Differ,
        };
        Self {
            path: path.into(),
            kind: FileKind::Volumetric,
            status,
            details: PairDetails::Volume(comparison),
        }
    }

    pub fn table(path: impl Into<String>, comparison: TableComparison) -> Self {
        let status = if comparison.row_count_mismatch.is_some() {
            PairStatus::RowCountMismatch
        } else if comparison.is_identical() {
            PairStatus::Identical
        } else {
            PairStatus::Differ
        };
        Self {
            path: path.into(),
            kind: FileKind::Tabular,
            status,
            details: PairDetails::Table(comparison),
        }
    }

    pub fn unsupported(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Unsupported,
            status: PairStatus::Unsupported,
            details: PairDetails::None,
        }
    }

    pub fn load_error(path: impl Into<String>, kind: FileKind, error: &PrepdiffError) -> Self {
        Self {
            path: path.into(),
            kind,
            status: PairStatus::LoadError,
            details: PairDetails::Error {
                message: error.to_string(),
            },
        }
    }

    /// Whether the two files were loaded and found to differ in any way.
    pub fn is_difference(&self) -> bool {
        matches!(
            self.status,
            PairStatus::Differ | PairStatus::ShapeMismatch | PairStatus::RowCountMismatch
        )
    }
}

/// Receives one report per file pair, in processing order.
pub trait ReportSink {
    /// Handle the report for a finished pair.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::Io`] if the sink cannot write.
    fn emit(&mut self, report: &PairReport) -> Result<(), PrepdiffError>;
}

/// Streams the human-readable block for each pair.
pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for TextSink<W> {
    fn emit(&mut self, report: &PairReport) -> Result<(), PrepdiffError> {
        self.out.write_all(format_text(report).as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Streams a Markdown section for each pair.
pub struct MarkdownSink<W: Write> {
    out: W,
}

impl<W: Write> MarkdownSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for MarkdownSink<W> {
    fn emit(&mut self, report: &PairReport) -> Result<(), PrepdiffError> {
        self.out.write_all(format_markdown(report).as_bytes())?;
        Ok(())
    }
}

/// Keeps every report in memory for structured output.
#[derive(Debug, Default)]
pub struct Collector {
    pub reports: Vec<PairReport>,
}

impl ReportSink for Collector {
    fn emit(&mut self, report: &PairReport) -> Result<(), PrepdiffError> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// Render a report as an indented text block.
///
/// # Examples
///
/// ```
/// use prepdiff_compare::report::{format_text, PairReport};
/// use prepdiff_compare::volume::VolumeComparison;
///
/// let text = format_text(&PairReport::volume("mask.nii.gz", VolumeComparison::Identical));
/// assert_eq!(text, "\nComparing: mask.nii.gz\n  Arrays are IDENTICAL\n");
/// ```
pub fn format_text(report: &PairReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nComparing: {}", report.path);
    match &report.details {
        PairDetails::Volume(cmp) => match cmp {
            VolumeComparison::ShapeMismatch { shape_a, shape_b } => {
                let _ = writeln!(
                    out,
                    "  Shapes differ: {} vs {}",
                    format_shape(shape_a),
                    format_shape(shape_b)
                );
            }
            VolumeComparison::Identical => {
                out.push_str("  Arrays are IDENTICAL\n");
            }
            VolumeComparison::Differ(stats) => {
                out.push_str("  Arrays DIFFER\n");
                let _ = writeln!(
                    out,
                    "    Max absolute difference: {:.6}",
                    stats.max_abs_diff
                );
                let _ = writeln!(
                    out,
                    "    Mean absolute difference: {:.6}",
                    stats.mean_abs_diff
                );
                let _ = writeln!(
                    out,
                    "    Fraction of voxels that changed: {:.4}",
                    stats.fraction_changed
                );
            }
        },
        PairDetails::Table(cmp) => {
            if cmp.columns_differ() {
                out.push_str("  Column sets differ between runs\n");
                if !cmp.added.is_empty() {
                    let _ = writeln!(out, "    New columns in run B: {}", cmp.added.join(", "));
                }
                if !cmp.removed.is_empty() {
                    let _ = writeln!(
                        out,
                        "    Columns missing in run B: {}",
                        cmp.removed.join(", ")
                    );
                }
            }
            if let Some((rows_a, rows_b)) = cmp.row_count_mismatch {
                let _ = writeln!(out, "  Row counts differ: {rows_a} vs {rows_b}");
            } else if cmp.changed.is_empty() {
                out.push_str("  All shared columns are IDENTICAL\n");
            } else {
                let _ = writeln!(out, "  {} columns DIFFER:", cmp.changed.len());
                for diff in &cmp.changed {
                    let _ = writeln!(out, "    {}: {}", diff.column, describe_change(&diff.change));
                }
            }
        }
        PairDetails::Error { message } => {
            let _ = writeln!(out, "  Failed to load: {message}");
        }
        PairDetails::None => {
            out.push_str("  Unsupported file kind, skipped\n");
        }
    }
    out
}

/// Render a report as a Markdown section.
pub fn format_markdown(report: &PairReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## `{}`\n", report.path);
    let _ = writeln!(out, "- **Kind:** {}", report.kind);
    let _ = writeln!(out, "- **Status:** {}", status_label(report.status));
    match &report.details {
        PairDetails::Volume(VolumeComparison::ShapeMismatch { shape_a, shape_b }) => {
            let _ = writeln!(
                out,
                "- **Shapes:** `{}` vs `{}`",
                format_shape(shape_a),
                format_shape(shape_b)
            );
        }
        PairDetails::Volume(VolumeComparison::Differ(stats)) => {
            let _ = writeln!(out, "- **Max abs diff:** {:.6}", stats.max_abs_diff);
            let _ = writeln!(out, "- **Mean abs diff:** {:.6}", stats.mean_abs_diff);
            let _ = writeln!(out, "- **Fraction changed:** {:.4}", stats.fraction_changed);
        }
        PairDetails::Table(cmp) => {
            if !cmp.added.is_empty() {
                let _ = writeln!(out, "- **New in B:** {}", code_list(&cmp.added));
            }
            if !cmp.removed.is_empty() {
                let _ = writeln!(out, "- **Missing in B:** {}", code_list(&cmp.removed));
            }
            if let Some((rows_a, rows_b)) = cmp.row_count_mismatch {
                let _ = writeln!(out, "- **Rows:** {rows_a} vs {rows_b}");
            } else if !cmp.changed.is_empty() {
                out.push_str("\n| Column | Max abs diff |\n|---|---|\n");
                for diff in &cmp.changed {
                    let _ = writeln!(
                        out,
                        "| `{}` | {} |",
                        diff.column,
                        change_magnitude(&diff.change)
                    );
                }
            }
        }
        PairDetails::Error { message } => {
            let _ = writeln!(out, "- **Error:** {message}");
        }
        PairDetails::Volume(VolumeComparison::Identical) | PairDetails::None => {}
    }
    out.push('\n');
    out
}

/// Python-style tuple rendering, e.g. `(2, 2, 2)` or `(5,)`.
pub fn format_shape(shape: &[usize]) -> String {
    match shape {
        [single] => format!("({single},)"),
        _ => {
            let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
            format!("({})", dims.join(", "))
        }
    }
}

pub fn status_label(status: PairStatus) -> &'static str {
    match status {
        PairStatus::Identical => "identical",
        PairStatus::Differ => "differ",
        PairStatus::ShapeMismatch => "shape mismatch",
        PairStatus::RowCountMismatch => "row count mismatch",
        PairStatus::Unsupported => "unsupported",
        PairStatus::LoadError => "load error",
    }
}

fn describe_change(change: &ColumnChange) -> String {
    match change {
        ColumnChange::Numeric { .. } => format!("max diff = {}", change_magnitude(change)),
        ColumnChange::NonNumeric => "non-numeric".into(),
    }
}

fn change_magnitude(change: &ColumnChange) -> String {
    match change {
        ColumnChange::Numeric {
            max_abs_diff: Some(d),
        } => d.to_string(),
        ColumnChange::Numeric { max_abs_diff: None } => "nan".into(),
        ColumnChange::NonNumeric => "non-numeric".into(),
    }
}

fn code_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("`{n}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDiff;
    use crate::volume::VolumeStats;

    fn table_cmp(added: &[&str], changed: Vec<ColumnDiff>) -> TableComparison {
        TableComparison {
            added: added.iter().map(|s| s.to_string()).collect(),
            removed: Vec::new(),
            row_count_mismatch: None,
            changed,
        }
    }

    #[test]
    fn differ_block_uses_fixed_precision() {
        let report = PairReport::volume(
            "func/bold.nii.gz",
            VolumeComparison::Differ(VolumeStats {
                max_abs_diff: 5.0,
                mean_abs_diff: 0.625,
                fraction_changed: 0.125,
            }),
        );
        let text = format_text(&report);
        assert!(text.contains("Arrays DIFFER"));
        assert!(text.contains("Max absolute difference: 5.000000"));
        assert!(text.contains("Mean absolute difference: 0.625000"));
        assert!(text.contains("Fraction of voxels that changed: 0.1250"));
    }

    #[test]
    fn shape_mismatch_block() {
        let report = PairReport::volume(
            "mask.nii.gz",
            VolumeComparison::ShapeMismatch {
                shape_a: vec![2, 2, 2],
                shape_b: vec![3],
            },
        );
        assert_eq!(report.status, PairStatus::ShapeMismatch);
        assert!(format_text(&report).contains("Shapes differ: (2, 2, 2) vs (3,)"));
    }

    #[test]
    fn table_block_lists_new_columns_then_changes() {
        let report = PairReport::table(
            "confounds.tsv",
            table_cmp(
                &["c"],
                vec![
                    ColumnDiff {
                        column: "a".into(),
                        change: ColumnChange::Numeric {
                            max_abs_diff: Some(0.5),
                        },
                    },
                    ColumnDiff {
                        column: "b".into(),
                        change: ColumnChange::NonNumeric,
                    },
                ],
            ),
        );
        assert_eq!(report.status, PairStatus::Differ);
        let text = format_text(&report);
        let new_at = text.find("New columns in run B: c").unwrap();
        let differ_at = text.find("2 columns DIFFER:").unwrap();
        assert!(new_at < differ_at);
        assert!(text.contains("    a: max diff = 0.5\n"));
        assert!(text.contains("    b: non-numeric\n"));
    }

    #[test]
    fn column_set_change_alone_is_a_difference() {
        let report = PairReport::table("confounds.tsv", table_cmp(&["c"], Vec::new()));
        assert_eq!(report.status, PairStatus::Differ);
        assert!(report.is_difference());
        assert!(format_text(&report).contains("All shared columns are IDENTICAL"));
    }

    #[test]
    fn identical_table_status() {
        let report = PairReport::table("confounds.tsv", table_cmp(&[], Vec::new()));
        assert_eq!(report.status, PairStatus::Identical);
        assert!(!report.is_difference());
    }

    #[test]
    fn load_error_keeps_message() {
        let err = PrepdiffError::FileNotFound("/b/anat/T1w.nii.gz".into());
        let report = PairReport::load_error("anat/T1w.nii.gz", FileKind::Volumetric, &err);
        assert_eq!(report.status, PairStatus::LoadError);
        assert!(format_text(&report).contains("Failed to load: file not found: /b/anat/T1w.nii.gz"));
    }

    #[test]
    fn json_shape_has_path_kind_status_details() {
        let report = PairReport::table("confounds.tsv", table_cmp(&["c"], Vec::new()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["path"], "confounds.tsv");
        assert_eq!(json["kind"], "tabular");
        assert_eq!(json["status"], "differ");
        assert_eq!(json["details"]["added"][0], "c");

        let unsupported = serde_json::to_value(PairReport::unsupported("x.html")).unwrap();
        assert!(unsupported["details"].is_null());
    }

    #[test]
    fn markdown_renders_change_table() {
        let report = PairReport::table(
            "confounds.tsv",
            table_cmp(
                &[],
                vec![ColumnDiff {
                    column: "trans_x".into(),
                    change: ColumnChange::Numeric { max_abs_diff: None },
                }],
            ),
        );
        let md = format_markdown(&report);
        assert!(md.starts_with("## `confounds.tsv`"));
        assert!(md.contains("| `trans_x` | nan |"));
    }

    #[test]
    fn text_sink_streams_to_writer() {
        let mut sink = TextSink::new(Vec::new());
        sink.emit(&PairReport::unsupported("report.html")).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.contains("Comparing: report.html"));
        assert!(out.contains("Unsupported file kind"));
    }

    #[test]
    fn collector_keeps_order() {
        let mut sink = Collector::default();
        sink.emit(&PairReport::unsupported("a")).unwrap();
        sink.emit(&PairReport::unsupported("b")).unwrap();
        let paths: Vec<&str> = sink.reports.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["a", "b"]);
    }
}
