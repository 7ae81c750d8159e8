//! Fetch the files of selected sessions from a DataLad dataset.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};
use prepdiff_core::PrepdiffError;
use serde::Serialize;

use crate::sessions::SessionRecord;

/// Which part of a session a target covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Functional,
    Events,
    Fieldmap,
    Anatomical,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Functional => write!(f, "functional"),
            TargetKind::Events => write!(f, "events"),
            TargetKind::Fieldmap => write!(f, "fieldmap"),
            TargetKind::Anatomical => write!(f, "anatomical"),
        }
    }
}

/// A glob pattern, relative to the dataset root, naming files to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchTarget {
    pub kind: TargetKind,
    pub pattern: String,
}

/// Task label and anatomical session used to build targets.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub task: String,
    pub anat_session: String,
}

/// The four targets fetched for one session.
///
/// # Examples
///
/// ```
/// use prepdiff_dataset::fetch::{plan_targets, FetchOptions};
/// use prepdiff_dataset::sessions::SessionRecord;
///
/// let options = FetchOptions { task: "TheSecretNumber".into(), anat_session: "1".into() };
/// let targets = plan_targets(&SessionRecord::new("S01", "2"), &options);
/// assert_eq!(targets[2].pattern, "sub-S01/ses-2/fmap/*");
/// assert_eq!(targets[3].pattern, "sub-S01/ses-1/anat/*");
/// ```
pub fn plan_targets(record: &SessionRecord, options: &FetchOptions) -> Vec<FetchTarget> {
    let sub = &record.subject;
    let ses = &record.session;
    let task = &options.task;
    vec![
        FetchTarget {
            kind: TargetKind::Functional,
            pattern: format!("sub-{sub}/ses-{ses}/func/sub-{sub}_ses-{ses}_task-{task}_*"),
        },
        FetchTarget {
            kind: TargetKind::Events,
            pattern: format!(
                "sub-{sub}/ses-{ses}/func/sub-{sub}_ses-{ses}_task-scan_acq-{task}_events.*"
            ),
        },
        FetchTarget {
            kind: TargetKind::Fieldmap,
            pattern: format!("sub-{sub}/ses-{ses}/fmap/*"),
        },
        FetchTarget {
            kind: TargetKind::Anatomical,
            pattern: format!("sub-{sub}/ses-{}/anat/*", options.anat_session),
        },
    ]
}

/// Expand a target pattern under `root`, returning sorted root-relative paths.
///
/// Annexed files whose content is absent are dangling symlinks; they are
/// matched like any other entry.
///
/// # Errors
///
/// Returns [`PrepdiffError::Config`] for an invalid pattern.
pub fn expand_target(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, PrepdiffError> {
    let base = glob::Pattern::escape(&root.to_string_lossy());
    let full = format!("{base}/{pattern}");
    let entries = glob::glob(&full)
        .map_err(|e| PrepdiffError::Config(format!("invalid pattern '{pattern}': {e}")))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                None
            }
        })
        .filter_map(|path| path.strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Fetches content for paths relative to a dataset root.
pub trait Retriever {
    /// Make the content of `paths` available locally.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::Retrieval`] when the content cannot be fetched.
    fn get(&mut self, root: &Path, paths: &[PathBuf]) -> Result<(), PrepdiffError>;
}

/// Runs `<program> get <paths…>` in the dataset root, retrying failures.
#[derive(Debug, Clone)]
pub struct DataladRetriever {
    program: String,
    retries: u32,
}

impl DataladRetriever {
    pub fn new(program: impl Into<String>, retries: u32) -> Self {
        Self {
            program: program.into(),
            retries,
        }
    }

    fn get_once(&self, root: &Path, paths: &[PathBuf]) -> Result<(), PrepdiffError> {
        let output = Command::new(&self.program)
            .arg("get")
            .args(paths)
            .current_dir(root)
            .output()
            .map_err(|e| PrepdiffError::Retrieval(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PrepdiffError::Retrieval(format!(
                "{} get exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Retriever for DataladRetriever {
    fn get(&mut self, root: &Path, paths: &[PathBuf]) -> Result<(), PrepdiffError> {
        with_retries(self.retries, || self.get_once(root, paths))
    }
}

/// Records the commands that would run instead of running them.
#[derive(Debug, Clone, Default)]
pub struct DryRunRetriever {
    program: String,
    pub commands: Vec<String>,
}

impl DryRunRetriever {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            commands: Vec::new(),
        }
    }
}

impl Retriever for DryRunRetriever {
    fn get(&mut self, root: &Path, paths: &[PathBuf]) -> Result<(), PrepdiffError> {
        let args: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        self.commands.push(format!(
            "(cd {} && {} get {})",
            root.display(),
            self.program,
            args.join(" ")
        ));
        Ok(())
    }
}

/// Call `op` once, then up to `retries` more times while it fails.
///
/// # Examples
///
/// ```
/// use prepdiff_core::PrepdiffError;
/// use prepdiff_dataset::fetch::with_retries;
///
/// let mut calls = 0;
/// let result = with_retries(2, || {
///     calls += 1;
///     if calls < 3 { Err(PrepdiffError::Retrieval("busy".into())) } else { Ok(calls) }
/// });
/// assert_eq!(result.unwrap(), 3);
/// ```
pub fn with_retries<T>(
    retries: u32,
    mut op: impl FnMut() -> Result<T, PrepdiffError>,
) -> Result<T, PrepdiffError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("attempt {attempt} failed, retrying: {e}");
            }
            Err(e) => return Err(e),
        }
    }
}

/// A target that could not be fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub subject: String,
    pub session: String,
    pub pattern: String,
    pub message: String,
}

/// Outcome of fetching every session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSummary {
    pub sessions: usize,
    /// Number of files handed to the retriever successfully.
    pub files: usize,
    /// Patterns that matched nothing.
    pub unmatched: Vec<String>,
    pub failures: Vec<FetchFailure>,
}

/// Fetch every target of every record, continuing past failures.
///
/// `on_target` is called before each target is expanded, for progress display.
pub fn fetch_sessions(
    root: &Path,
    records: &[SessionRecord],
    options: &FetchOptions,
    retriever: &mut dyn Retriever,
    mut on_target: impl FnMut(&SessionRecord, &FetchTarget),
) -> FetchSummary {
    let mut summary = FetchSummary::default();
    for record in records {
        info!("fetching sub-{} ses-{}", record.subject, record.session);
        summary.sessions += 1;

        for target in plan_targets(record, options) {
            on_target(record, &target);
            let fail = |message: String| FetchFailure {
                subject: record.subject.clone(),
                session: record.session.clone(),
                pattern: target.pattern.clone(),
                message,
            };

            let paths = match expand_target(root, &target.pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    summary.failures.push(fail(e.to_string()));
                    continue;
                }
            };
            if paths.is_empty() {
                warn!("no {} files match {}", target.kind, target.pattern);
                summary.unmatched.push(target.pattern.clone());
                continue;
            }

            debug!("{} {} files for {}", paths.len(), target.kind, target.pattern);
            match retriever.get(root, &paths) {
                Ok(()) => summary.files += paths.len(),
                Err(e) => {
                    warn!("{}: {e}", target.pattern);
                    summary.failures.push(fail(e.to_string()));
                }
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyRetriever {
        calls: Vec<Vec<PathBuf>>,
        fail_on: Option<&'static str>,
    }

    impl Retriever for FlakyRetriever {
        fn get(&mut self, _root: &Path, paths: &[PathBuf]) -> Result<(), PrepdiffError> {
            self.calls.push(paths.to_vec());
            match self.fail_on {
                Some(dir) if paths.iter().any(|p| p.to_string_lossy().contains(dir)) => {
                    Err(PrepdiffError::Retrieval("remote unavailable".into()))
                }
                _ => Ok(()),
            }
        }
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    fn options() -> FetchOptions {
        FetchOptions {
            task: "TheSecretNumber".into(),
            anat_session: "1".into(),
        }
    }

    fn dataset() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "sub-S01/ses-2/func/sub-S01_ses-2_task-TheSecretNumber_bold.nii.gz");
        touch(root, "sub-S01/ses-2/func/sub-S01_ses-2_task-TheSecretNumber_bold.json");
        touch(root, "sub-S01/ses-2/func/sub-S01_ses-2_task-rest_bold.nii.gz");
        touch(
            root,
            "sub-S01/ses-2/func/sub-S01_ses-2_task-scan_acq-TheSecretNumber_events.tsv",
        );
        touch(root, "sub-S01/ses-2/fmap/sub-S01_ses-2_dir-AP_epi.nii.gz");
        touch(root, "sub-S01/ses-1/anat/sub-S01_ses-1_T1w.nii.gz");
        dir
    }

    #[test]
    fn plan_uses_task_and_anat_session() {
        let targets = plan_targets(
            &SessionRecord::new("S07", "3"),
            &FetchOptions {
                task: "Rest".into(),
                anat_session: "2".into(),
            },
        );
        let patterns: Vec<&str> = targets.iter().map(|t| t.pattern.as_str()).collect();
        assert_eq!(
            patterns,
            [
                "sub-S07/ses-3/func/sub-S07_ses-3_task-Rest_*",
                "sub-S07/ses-3/func/sub-S07_ses-3_task-scan_acq-Rest_events.*",
                "sub-S07/ses-3/fmap/*",
                "sub-S07/ses-2/anat/*",
            ]
        );
    }

    #[test]
    fn expand_returns_relative_sorted_paths() {
        let dir = dataset();
        let paths = expand_target(
            dir.path(),
            "sub-S01/ses-2/func/sub-S01_ses-2_task-TheSecretNumber_*",
        )
        .unwrap();
        assert_eq!(
            paths,
            [
                PathBuf::from("sub-S01/ses-2/func/sub-S01_ses-2_task-TheSecretNumber_bold.json"),
                PathBuf::from("sub-S01/ses-2/func/sub-S01_ses-2_task-TheSecretNumber_bold.nii.gz"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn expand_matches_dangling_annex_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let func = dir.path().join("sub-S01/ses-2/func");
        std::fs::create_dir_all(&func).unwrap();
        std::os::unix::fs::symlink(
            "../../../.git/annex/objects/XX/missing",
            func.join("sub-S01_ses-2_task-TheSecretNumber_bold.nii.gz"),
        )
        .unwrap();

        let paths = expand_target(
            dir.path(),
            "sub-S01/ses-2/func/sub-S01_ses-2_task-TheSecretNumber_*",
        )
        .unwrap();
        assert_eq!(
            paths,
            [PathBuf::from("sub-S01/ses-2/func/sub-S01_ses-2_task-TheSecretNumber_bold.nii.gz")]
        );
    }

    #[test]
    fn fetches_every_target() {
        let dir = dataset();
        let mut retriever = FlakyRetriever {
            calls: Vec::new(),
            fail_on: None,
        };
        let mut seen = Vec::new();
        let summary = fetch_sessions(
            dir.path(),
            &[SessionRecord::new("S01", "2")],
            &options(),
            &mut retriever,
            |_, target| seen.push(target.kind),
        );

        assert_eq!(
            seen,
            [
                TargetKind::Functional,
                TargetKind::Events,
                TargetKind::Fieldmap,
                TargetKind::Anatomical
            ]
        );
        assert_eq!(retriever.calls.len(), 4);
        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.files, 5);
        assert!(summary.unmatched.is_empty());
        assert!(summary.failures.is_empty());
    }

    #[test]
    fn failures_and_missing_targets_do_not_stop_the_batch() {
        let dir = dataset();
        let mut retriever = FlakyRetriever {
            calls: Vec::new(),
            fail_on: Some("fmap"),
        };
        let records = [SessionRecord::new("S01", "2"), SessionRecord::new("S02", "1")];
        let summary = fetch_sessions(dir.path(), &records, &options(), &mut retriever, |_, _| {});

        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].pattern, "sub-S01/ses-2/fmap/*");
        assert!(summary.failures[0].message.contains("remote unavailable"));
        // S02 has no files at all.
        assert_eq!(summary.unmatched.len(), 4);
        assert_eq!(summary.files, 4);
    }

    #[test]
    fn retries_then_gives_up() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(2, || {
            calls += 1;
            Err(PrepdiffError::Retrieval("busy".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_retries_calls_once() {
        let mut calls = 0;
        let result = with_retries(0, || {
            calls += 1;
            Ok::<_, PrepdiffError>(())
        });
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[test]
    fn dry_run_records_commands() {
        let mut retriever = DryRunRetriever::new("datalad");
        retriever
            .get(
                Path::new("/data/ds"),
                &[PathBuf::from("sub-S01/ses-1/anat/T1w.nii.gz")],
            )
            .unwrap();
        assert_eq!(
            retriever.commands,
            ["(cd /data/ds && datalad get sub-S01/ses-1/anat/T1w.nii.gz)"]
        );
    }

    #[test]
    fn missing_program_is_a_retrieval_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut retriever = DataladRetriever::new("prepdiff-no-such-program", 0);
        let err = retriever
            .get(dir.path(), &[PathBuf::from("a.nii.gz")])
            .unwrap_err();
        assert!(matches!(err, PrepdiffError::Retrieval(_)));
    }
}
