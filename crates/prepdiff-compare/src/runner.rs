//! Sequential comparison of every configured file pair.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use prepdiff_core::{CompareConfig, FileKind, PrepdiffError, Tolerance};
use serde::Serialize;

use crate::nifti::load_volume;
use crate::report::{PairReport, PairStatus, ReportSink};
use crate::table::{compare_tables, Table};
use crate::volume::compare_volumes;

/// Exit code when every pair was identical (or skipped).
pub const EXIT_IDENTICAL: i32 = 0;
/// Exit code when at least one pair differs and none failed to load.
pub const EXIT_DIFFERENCES: i32 = 1;
/// Exit code when at least one pair failed to load.
pub const EXIT_LOAD_FAILURE: i32 = 2;

/// A relative path present under both roots, classified by suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePairSpec {
    pub relative_path: PathBuf,
    pub kind: FileKind,
}

impl FilePairSpec {
    /// # Examples
    ///
    /// ```
    /// use prepdiff_compare::runner::FilePairSpec;
    /// use prepdiff_core::FileKind;
    ///
    /// let pair = FilePairSpec::new("ses-1/anat/sub-S01_ses-1_desc-preproc_T1w.nii.gz");
    /// assert_eq!(pair.kind, FileKind::Volumetric);
    /// ```
    pub fn new(relative_path: impl Into<PathBuf>) -> Self {
        let relative_path = relative_path.into();
        let kind = FileKind::from_path(&relative_path);
        Self {
            relative_path,
            kind,
        }
    }

    fn display(&self) -> String {
        self.relative_path.display().to_string()
    }
}

/// Read relative paths from a list file: one per line, blank lines and
/// `#` comments ignored.
///
/// # Errors
///
/// Returns [`PrepdiffError::FileNotFound`] if the list does not exist or
/// [`PrepdiffError::Io`] if it cannot be read.
pub fn read_path_list(path: &Path) -> Result<Vec<FilePairSpec>, PrepdiffError> {
    if !path.exists() {
        return Err(PrepdiffError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(parse_path_list(&content))
}

/// Parse the contents of a path list file.
pub fn parse_path_list(content: &str) -> Vec<FilePairSpec> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(FilePairSpec::new)
        .collect()
}

/// Everything a comparison run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    pub pairs: Vec<FilePairSpec>,
    pub tolerance: Tolerance,
}

impl RunConfig {
    /// Build a run from the `[compare]` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::Config`] when a root is not set.
    pub fn from_config(config: &CompareConfig) -> Result<Self, PrepdiffError> {
        let root_a = config
            .root_a
            .clone()
            .ok_or_else(|| PrepdiffError::Config("root_a is not set".into()))?;
        let root_b = config
            .root_b
            .clone()
            .ok_or_else(|| PrepdiffError::Config("root_b is not set".into()))?;
        Ok(Self {
            root_a,
            root_b,
            pairs: config.paths.iter().map(FilePairSpec::new).collect(),
            tolerance: config.tolerance(),
        })
    }

    /// Check that both roots are directories and there is something to compare.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::FileNotFound`] for a missing root and
    /// [`PrepdiffError::Config`] when no paths are configured.
    pub fn validate(&self) -> Result<(), PrepdiffError> {
        for root in [&self.root_a, &self.root_b] {
            if !root.is_dir() {
                return Err(PrepdiffError::FileNotFound(root.clone()));
            }
        }
        if self.pairs.is_empty() {
            return Err(PrepdiffError::Config("no paths to compare".into()));
        }
        Ok(())
    }
}

/// A pair that could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairFailure {
    pub path: String,
    pub message: String,
}

/// Aggregate over a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub identical: usize,
    pub differ: usize,
    pub unsupported: usize,
    pub failures: Vec<PairFailure>,
}

impl RunSummary {
    fn record(&mut self, report: &PairReport) {
        self.total += 1;
        if report.is_difference() {
            self.differ += 1;
            return;
        }
        match report.status {
            PairStatus::Identical => self.identical += 1,
            PairStatus::Differ | PairStatus::ShapeMismatch | PairStatus::RowCountMismatch => {}
            PairStatus::Unsupported => self.unsupported += 1,
            PairStatus::LoadError => {
                let message = match &report.details {
                    crate::report::PairDetails::Error { message } => message.clone(),
                    _ => String::new(),
                };
                self.failures.push(PairFailure {
                    path: report.path.clone(),
                    message,
                });
            }
        }
    }

    /// Load failures win over differences; differences win over success.
    ///
    /// # Examples
    ///
    /// ```
    /// use prepdiff_compare::runner::RunSummary;
    ///
    /// let summary = RunSummary { total: 3, identical: 2, differ: 1, ..Default::default() };
    /// assert_eq!(summary.exit_code(), 1);
    /// ```
    pub fn exit_code(&self) -> i32 {
        if !self.failures.is_empty() {
            EXIT_LOAD_FAILURE
        } else if self.differ > 0 {
            EXIT_DIFFERENCES
        } else {
            EXIT_IDENTICAL
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pairs: {} identical, {} differ, {} unsupported, {} failed to load",
            self.total,
            self.identical,
            self.differ,
            self.unsupported,
            self.failures.len()
        )
    }
}

/// Compare one pair. Load failures become a `load_error` report.
pub fn compare_pair(config: &RunConfig, pair: &FilePairSpec) -> PairReport {
    let path_a = config.root_a.join(&pair.relative_path);
    let path_b = config.root_b.join(&pair.relative_path);
    let name = pair.display();

    let outcome = match pair.kind {
        FileKind::Volumetric => load_volume(&path_a).and_then(|a| {
            let b = load_volume(&path_b)?;
            Ok(PairReport::volume(name.clone(), compare_volumes(&a, &b)))
        }),
        FileKind::Tabular => Table::from_path(&path_a).and_then(|a| {
            let b = Table::from_path(&path_b)?;
            Ok(PairReport::table(
                name.clone(),
                compare_tables(&a, &b, config.tolerance),
            ))
        }),
        FileKind::Unsupported => {
            warn!("skipping {name}: unsupported file kind");
            return PairReport::unsupported(name);
        }
    };

    outcome.unwrap_or_else(|e| {
        warn!("failed to load {name}: {e}");
        PairReport::load_error(name.clone(), pair.kind, &e)
    })
}

/// Compare every pair in order, emitting each report before the next pair
/// is loaded.
///
/// # Errors
///
/// Only sink failures are returned; load failures are recorded in the
/// summary and the run continues.
///
/// # Examples
///
/// ```no_run
/// use prepdiff_compare::report::TextSink;
/// use prepdiff_compare::runner::{run, FilePairSpec, RunConfig};
/// use prepdiff_core::Tolerance;
///
/// let config = RunConfig {
///     root_a: "/data/fmriprep_without_sdc/sub-S01".into(),
///     root_b: "/data/fmriprep_with_sdc/sub-S01".into(),
///     pairs: vec![FilePairSpec::new("ses-1/anat/sub-S01_ses-1_desc-preproc_T1w.nii.gz")],
///     tolerance: Tolerance::default(),
/// };
/// let mut sink = TextSink::new(std::io::stdout());
/// let summary = run(&config, &mut sink).unwrap();
/// std::process::exit(summary.exit_code());
/// ```
pub fn run(config: &RunConfig, sink: &mut dyn ReportSink) -> Result<RunSummary, PrepdiffError> {
    let mut summary = RunSummary::default();
    for pair in &config.pairs {
        debug!("comparing {} ({})", pair.relative_path.display(), pair.kind);
        let report = compare_pair(config, pair);
        sink.emit(&report)?;
        summary.record(&report);
    }
    info!("{summary}");
    Ok(summary)
}
