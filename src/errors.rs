use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error during {op}: {source}")]
    IoContext {
        op: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download error: {0}")]
    Download(String),

    /// Provider failures keep the provider's own wording.
    #[error("{0}")]
    Provider(String),

    #[error("source mismatch: expected {expected}, got {actual}")]
    SourceMismatch { expected: String, actual: String },

    #[error("no fallback found for {song} across {tried} providers")]
    NoFallback { song: String, tried: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn io(op: impl Into<String>, source: std::io::Error) -> Self {
        AppError::IoContext {
            op: op.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_io_error_names_operation() {
        let err = AppError::io(
            "finalize downloaded file",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        );
        assert_eq!(
            err.to_string(),
            "IO error during finalize downloaded file: read-only"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_provider_text_is_verbatim() {
        let err = AppError::Provider("download url not found".to_string());
        assert_eq!(err.to_string(), "download url not found");
    }
}
