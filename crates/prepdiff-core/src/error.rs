use std::path::PathBuf;

/// Errors that can occur across the prepdiff tools.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary converts to a `miette` report at the boundary.
///
/// # Examples
///
/// ```
/// use prepdiff_core::PrepdiffError;
///
/// let err = PrepdiffError::Config("missing root_a".into());
/// assert!(err.to_string().contains("missing root_a"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum PrepdiffError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(help("check .prepdiff.toml or pass the value on the command line"))]
    Config(String),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Delimited-text read or write failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A volume file is not a readable NIfTI image.
    #[error("invalid NIfTI file {}: {reason}", .path.display())]
    Nifti { path: PathBuf, reason: String },

    /// A tabular file is malformed.
    #[error("invalid table {}: {reason}", .path.display())]
    Table { path: PathBuf, reason: String },

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// An external retrieval command failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),
}

impl PrepdiffError {
    /// Shorthand for a [`PrepdiffError::Nifti`] error.
    pub fn nifti(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PrepdiffError::Nifti {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`PrepdiffError::Table`] error.
    pub fn table(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PrepdiffError::Table {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
