use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PrepdiffError;
use crate::types::Tolerance;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".prepdiff.toml";

/// Top-level configuration loaded from `.prepdiff.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use prepdiff_core::PrepdiffConfig;
///
/// let config = PrepdiffConfig::default();
/// assert_eq!(config.dataset.task, "TheSecretNumber");
/// assert!(config.compare.paths.is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepdiffConfig {
    /// Output comparison settings.
    #[serde(default)]
    pub compare: CompareConfig,
    /// Dataset scanning and retrieval settings.
    #[serde(default)]
    pub dataset: DatasetConfig,
}

impl PrepdiffConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::Io`] if the file cannot be read, or
    /// [`PrepdiffError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use prepdiff_core::PrepdiffConfig;
    /// use std::path::Path;
    ///
    /// let config = PrepdiffConfig::from_file(Path::new(".prepdiff.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, PrepdiffError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use prepdiff_core::PrepdiffConfig;
    ///
    /// let toml = r#"
    /// [compare]
    /// rtol = 1e-3
    /// "#;
    /// let config = PrepdiffConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.compare.rtol, 1e-3);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, PrepdiffError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Settings for `prepdiff compare`.
///
/// The two roots are usually two runs of the same pipeline, one with and one
/// without the correction step under study.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareConfig {
    /// First output tree (e.g. the run without SDC).
    pub root_a: Option<PathBuf>,
    /// Second output tree (e.g. the run with SDC).
    pub root_b: Option<PathBuf>,
    /// Relative paths to compare under both roots.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Relative tolerance for numeric table columns (default: 1e-5).
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    /// Absolute tolerance for numeric table columns (default: 1e-8).
    #[serde(default = "default_atol")]
    pub atol: f64,
}

fn default_rtol() -> f64 {
    Tolerance::default().rtol
}

fn default_atol() -> f64 {
    Tolerance::default().atol
}

impl CompareConfig {
    /// The configured column tolerance.
    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            rtol: self.rtol,
            atol: self.atol,
        }
    }
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            root_a: None,
            root_b: None,
            paths: Vec::new(),
            rtol: default_rtol(),
            atol: default_atol(),
        }
    }
}

/// Settings for `prepdiff sessions` and `prepdiff fetch`.
///
/// # Examples
///
/// ```
/// use prepdiff_core::DatasetConfig;
///
/// let config = DatasetConfig::default();
/// assert_eq!(config.subject_glob, "sub-*");
/// assert_eq!(config.anat_session, "1");
/// assert_eq!(config.retries, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Root of the BIDS dataset.
    pub root: Option<PathBuf>,
    /// Task label searched for in `scans.tsv` (default: `TheSecretNumber`).
    #[serde(default = "default_task")]
    pub task: String,
    /// Glob for subject directories under the root (default: `sub-*`).
    #[serde(default = "default_subject_glob")]
    pub subject_glob: String,
    /// Session whose anatomical images are fetched (default: `1`).
    #[serde(default = "default_anat_session")]
    pub anat_session: String,
    /// CSV of `(subject, session)` rows written by the finder, read by the fetcher.
    #[serde(default = "default_sessions_file")]
    pub sessions_file: PathBuf,
    /// Program used to fetch annexed content (default: `datalad`).
    #[serde(default = "default_datalad")]
    pub datalad: String,
    /// Extra attempts for a failed retrieval (default: 2).
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_task() -> String {
    "TheSecretNumber".into()
}

fn default_subject_glob() -> String {
    "sub-*".into()
}

fn default_anat_session() -> String {
    "1".into()
}

fn default_sessions_file() -> PathBuf {
    PathBuf::from("sessions.csv")
}

fn default_datalad() -> String {
    "datalad".into()
}

fn default_retries() -> u32 {
    2
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: None,
            task: default_task(),
            subject_glob: default_subject_glob(),
            anat_session: default_anat_session(),
            sessions_file: default_sessions_file(),
            datalad: default_datalad(),
            retries: default_retries(),
        }
    }
}
