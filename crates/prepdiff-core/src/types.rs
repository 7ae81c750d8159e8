use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a compared file, derived from its suffix.
///
/// # Examples
///
/// ```
/// use prepdiff_core::FileKind;
/// use std::path::Path;
///
/// assert_eq!(FileKind::from_path(Path::new("anat/T1w.nii.gz")), FileKind::Volumetric);
/// assert_eq!(FileKind::from_path(Path::new("func/confounds.tsv")), FileKind::Tabular);
/// assert_eq!(FileKind::from_path(Path::new("report.html")), FileKind::Unsupported);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// NIfTI image (`.nii` or `.nii.gz`).
    Volumetric,
    /// Tab-separated table with a header row (`.tsv`).
    Tabular,
    /// Anything else; never loaded.
    Unsupported,
}

impl FileKind {
    /// Classify a path by its (case-insensitive) suffix.
    pub fn from_path(path: &Path) -> Self {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return FileKind::Unsupported;
        };
        let name = name.to_ascii_lowercase();
        if name.ends_with(".nii.gz") || name.ends_with(".nii") {
            FileKind::Volumetric
        } else if name.ends_with(".tsv") {
            FileKind::Tabular
        } else {
            FileKind::Unsupported
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Volumetric => write!(f, "volumetric"),
            FileKind::Tabular => write!(f, "tabular"),
            FileKind::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Closeness tolerance for numeric table columns.
///
/// Two values `a` and `b` are close when `|a - b| <= atol + rtol * |b|`.
///
/// # Examples
///
/// ```
/// use prepdiff_core::Tolerance;
///
/// let tol = Tolerance::default();
/// assert_eq!(tol.rtol, 1e-5);
/// assert_eq!(tol.atol, 1e-8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-5,
            atol: 1e-8,
        }
    }
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use prepdiff_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable report blocks.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
