//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! 監査サブシステム内のエラーはリクエストに伝播させない。
//! `OplogError`はストレージ・設定・CLIなど、監査経路の外側で使う。

use thiserror::Error;

/// oplog error type
#[derive(Debug, Error)]
pub enum OplogError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint catalog file could not be parsed
    #[error("Endpoint catalog error: {0}")]
    Catalog(String),

    /// Malformed multipart body
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<multer::Error> for OplogError {
    fn from(err: multer::Error) -> Self {
        Self::Multipart(err.to_string())
    }
}

/// Result type alias
pub type OplogResult<T> = Result<T, OplogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = OplogError::Config("OPLOG_PORT must be a number".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: OPLOG_PORT must be a number"
        );
    }

    #[test]
    fn test_database_error_display() {
        let error = OplogError::Database("Failed to insert audit log: locked".to_string());
        assert!(error.to_string().starts_with("Database error:"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let error: OplogError = json_error.into();
        assert!(matches!(error, OplogError::Serialization(_)));
    }

    #[test]
    fn test_error_from_multer() {
        let error: OplogError = multer::Error::NoBoundary.into();
        assert!(matches!(error, OplogError::Multipart(_)));
    }
}
