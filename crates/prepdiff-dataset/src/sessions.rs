//! Find the session in which each subject performed a task.

use std::path::{Path, PathBuf};

use log::{debug, info};
use prepdiff_core::PrepdiffError;
use serde::{Deserialize, Serialize};

/// A subject/session pair, without the `sub-` / `ses-` prefixes.
///
/// # Examples
///
/// ```
/// use prepdiff_dataset::sessions::SessionRecord;
///
/// let record = SessionRecord::new("S01", "2");
/// assert_eq!(record.session_dir(), std::path::PathBuf::from("sub-S01/ses-2"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub subject: String,
    pub session: String,
}

impl SessionRecord {
    pub fn new(subject: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            session: session.into(),
        }
    }

    /// `sub-<subject>/ses-<session>`, relative to the dataset root.
    pub fn session_dir(&self) -> PathBuf {
        PathBuf::from(format!("sub-{}", self.subject)).join(format!("ses-{}", self.session))
    }

    /// The per-session `scans.tsv` file name.
    pub fn scans_file_name(&self) -> String {
        format!("sub-{}_ses-{}_scans.tsv", self.subject, self.session)
    }
}

/// Scan `root` for the first session of each subject whose `scans.tsv`
/// lists a BOLD run of `task`.
///
/// Subjects and sessions are visited in sorted order. Sessions without a
/// `scans.tsv` are skipped; a subject contributes at most one record.
///
/// # Errors
///
/// Returns [`PrepdiffError::FileNotFound`] if `root` is not a directory,
/// [`PrepdiffError::Config`] for an invalid `subject_glob`, and
/// [`PrepdiffError::Io`] if a directory or scans file cannot be read.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use prepdiff_dataset::sessions::find_sessions;
///
/// let records = find_sessions(Path::new("/data/ds004892"), "TheSecretNumber", "sub-S*").unwrap();
/// println!("{} subjects", records.len());
/// ```
pub fn find_sessions(
    root: &Path,
    task: &str,
    subject_glob: &str,
) -> Result<Vec<SessionRecord>, PrepdiffError> {
    if !root.is_dir() {
        return Err(PrepdiffError::FileNotFound(root.to_path_buf()));
    }
    let needle = format!("task-{task}_bold");
    let mut records = Vec::new();

    for subject_dir in glob_dirs(root, subject_glob)? {
        let Some(subject) = dir_label(&subject_dir, "sub-") else {
            continue;
        };

        for session_dir in glob_dirs(&subject_dir, "ses-*")? {
            let Some(session) = dir_label(&session_dir, "ses-") else {
                continue;
            };
            let record = SessionRecord::new(subject.clone(), session);
            let scans = root
                .join(record.session_dir())
                .join(record.scans_file_name());
            if !scans.is_file() {
                debug!("no scans file at {}", scans.display());
                continue;
            }

            let content = std::fs::read_to_string(&scans)?;
            if content.contains(&needle) {
                debug!("sub-{} ses-{} has {needle}", record.subject, record.session);
                records.push(record);
                break;
            }
        }
    }

    info!("found {} subjects with {needle}", records.len());
    Ok(records)
}

/// Write records as CSV with a `subject,session` header.
///
/// # Errors
///
/// Returns [`PrepdiffError::Csv`] if the file cannot be written.
pub fn write_sessions(path: &Path, records: &[SessionRecord]) -> Result<(), PrepdiffError> {
    let mut writer = csv::Writer::from_path(path)?;
    if records.is_empty() {
        writer.write_record(["subject", "session"])?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read records written by [`write_sessions`].
///
/// # Errors
///
/// Returns [`PrepdiffError::FileNotFound`] if `path` does not exist and
/// [`PrepdiffError::Csv`] if a row lacks a `subject` or `session` field.
pub fn read_sessions(path: &Path) -> Result<Vec<SessionRecord>, PrepdiffError> {
    if !path.exists() {
        return Err(PrepdiffError::FileNotFound(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<SessionRecord>, _>>()?;
    Ok(records)
}

/// Sorted directories under `parent` whose name matches `pattern`.
fn glob_dirs(parent: &Path, pattern: &str) -> Result<Vec<PathBuf>, PrepdiffError> {
    let base = glob::Pattern::escape(&parent.to_string_lossy());
    let full = format!("{base}/{pattern}");
    let entries = glob::glob(&full)
        .map_err(|e| PrepdiffError::Config(format!("invalid glob '{pattern}': {e}")))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PrepdiffError::Io(e.into_error()))?;
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// The directory name without `prefix`, or `None` if it lacks the prefix.
fn dir_label(dir: &Path, prefix: &str) -> Option<String> {
    let name = dir.file_name()?.to_str()?;
    name.strip_prefix(prefix).map(str::to_string)
}
