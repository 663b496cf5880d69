//! Result and error types for fusionfetch.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for fusionfetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors that can occur while exporting a plant report.
///
/// The first five variants form the user-facing taxonomy: every failed
/// run terminates with exactly one of them (or a transport-level
/// variant when the failure happens below the flow). The flow maps
/// transport errors into the taxonomy based on the stage that was
/// executing when they occurred.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Login controls missing, or the portal rejected the credentials
    #[error("authentication failed: {message}")]
    Authentication {
        /// What went wrong during login
        message: String,
    },

    /// A bounded wait on the portal exceeded its timeout
    #[error("timed out after {ms}ms during {stage}")]
    NavigationTimeout {
        /// Stage that was waiting
        stage: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// The plant search yielded no matching entry
    #[error("no plant matching {name:?} in search results")]
    TargetNotFound {
        /// Plant name that was searched for
        name: String,
    },

    /// Export was triggered but no download completed in time
    #[error("export triggered but no download completed within {ms}ms")]
    DownloadTimeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Saving the downloaded report to disk failed
    #[error("could not persist artifact to {path}: {source}")]
    ArtifactPersist {
        /// Destination path that failed
        path: PathBuf,
        /// Underlying filesystem error
        source: std::io::Error,
    },

    /// Chromium could not be launched
    #[error("failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// A CDP command or script evaluation failed
    #[error("browser command failed: {message}")]
    Cdp {
        /// Error message
        message: String,
    },

    /// No element matched a locator chain within its wait budget
    #[error("element not found: {locator}")]
    ElementNotFound {
        /// Description of the locator chain that failed
        locator: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Short machine-readable kind, printed alongside the message so
    /// callers can dispatch on the failure class without parsing text.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::NavigationTimeout { .. } => "navigation-timeout",
            Self::TargetNotFound { .. } => "target-not-found",
            Self::DownloadTimeout { .. } => "download-timeout",
            Self::ArtifactPersist { .. } => "artifact-persist",
            Self::BrowserLaunch { .. } => "browser-launch",
            Self::Cdp { .. } => "cdp",
            Self::ElementNotFound { .. } => "element-not-found",
            Self::Io(_) => "io",
        }
    }
}
