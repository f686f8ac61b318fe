//! Watchpost error types.

/// Top-level crate error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WatchpostError {
    #[error(transparent)]
    Hostname(#[from] crate::hostname::HostnameResolutionError),

    #[error(transparent)]
    Scheduling(#[from] crate::scheduling::InvalidCheckConfiguration),

    #[error(transparent)]
    Datasource(#[from] crate::datasource::DatasourceUnavailable),

    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),

    #[error(transparent)]
    Executor(#[from] crate::executor::ExecutorError),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Result type alias for Watchpost operations.
pub type Result<T> = std::result::Result<T, WatchpostError>;
