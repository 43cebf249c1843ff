/*!
 * Error handling for the CMS PUF aggregation library
 *
 * Provides detailed error types with context, suggestions, and recovery guidance.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Library result type
pub type Result<T> = std::result::Result<T, PufError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum PufError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        context: ErrorContext,
    },

    /// A mandatory logical column could not be resolved from a dataset header.
    ///
    /// Fatal for the affected dataset only; callers may skip that source
    /// family and still aggregate the others.
    #[error("could not resolve required column '{role}' in {dataset} header")]
    MissingColumn {
        role: String,
        dataset: String,
        suggestion: String,
    },

    /// A source extract is absent on disk.
    ///
    /// The high-level dataset APIs convert this into a canonical empty
    /// result rather than surfacing it.
    #[error("dataset unavailable: {path}")]
    DatasetUnavailable {
        path: PathBuf,
        suggestion: String,
    },

    /// A query filter is empty after normalization, so no scan can match.
    #[error("empty filter: {message}")]
    EmptyFilter {
        message: String,
        suggestion: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
}

impl PufError {
    /// Create a missing-column error naming the role and dataset
    pub fn missing_column(role: &str, dataset: &str) -> Self {
        Self::MissingColumn {
            role: role.to_string(),
            dataset: dataset.to_string(),
            suggestion: format!(
                "The {dataset} extract header did not match any known name for '{role}'. \
                Check that the file is a CMS public-use extract and not a truncated download."
            ),
        }
    }

    /// Create a dataset-unavailable error with a path hint
    pub fn dataset_unavailable(path: PathBuf) -> Self {
        let suggestion = if path.to_string_lossy().contains("Hospital") {
            format!(
                "Check if the hospital directory exists at '{}'. The Hospital General Information \
                file can be downloaded from https://data.cms.gov/provider-data/",
                path.display()
            )
        } else {
            format!(
                "Check if the file exists at '{}'. Medicare utilization extracts can be \
                downloaded from https://data.cms.gov/",
                path.display()
            )
        };
        Self::DatasetUnavailable { path, suggestion }
    }

    /// Create an empty-filter error for a code list that normalized to nothing
    pub fn empty_code_filter() -> Self {
        Self::EmptyFilter {
            message: "no valid procedure codes after normalization".to_string(),
            suggestion: "Codes must be non-empty HCPCS/CPT identifiers such as '77080' or 'A4593'."
                .to_string(),
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyFilter { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::MissingColumn { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::DatasetUnavailable { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for PufError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for PufError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|pos| pos.line() as usize);
        Self::CsvParse {
            message: err.to_string(),
            line,
            context: ErrorContext::default(),
        }
    }
}
