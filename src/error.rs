//! Typed error conditions surfaced to callers.
//!
//! Most of the pipeline propagates [`anyhow::Error`] with context attached
//! at each layer. The variants here are the conditions callers are expected
//! to branch on; recover them with `err.downcast_ref::<RagError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// A document type string outside csv/pdf/txt/xlsx.
    #[error("Unsupported document type: {0}")]
    UnsupportedDocumentType(String),

    /// Document record failed validation (empty title, bad object name, ...).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The document could not be read or parsed.
    #[error("Failed to load document {location}: {message}")]
    DocumentLoad { location: String, message: String },

    /// `store_nodes` was called with an empty batch.
    #[error("No vectors to store.")]
    NoVectorsToStore,

    /// Access level outside `1..=total`.
    #[error("Access level {level} is outside the configured range 1..={total}")]
    InvalidAccessLevel { level: i64, total: u32 },

    /// Generated SQL failed the signature gate.
    #[error("Security check failed: {0}")]
    SecurityCheckFailed(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Generated SQL was rejected before reaching the database.
    #[error("Unsafe SQL rejected: {0}")]
    UnsafeSql(String),

    #[error("Failed to generate presigned URL for {0}")]
    PresignedUrl(String),
}

impl RagError {
    pub fn load(location: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RagError::DocumentLoad {
            location: location.into(),
            message: message.to_string(),
        }
    }
}

/// Validate that `level` is a tier in `1..=total`.
pub fn check_access_level(level: i64, total: u32) -> Result<u32, RagError> {
    if level < 1 || level > total as i64 {
        return Err(RagError::InvalidAccessLevel { level, total });
    }
    Ok(level as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_message_is_prefixed() {
        let err = RagError::SecurityCheckFailed("Invalid signature".to_string());
        assert_eq!(err.to_string(), "Security check failed: Invalid signature");
    }

    #[test]
    fn access_level_bounds() {
        assert_eq!(check_access_level(1, 5).unwrap(), 1);
        assert_eq!(check_access_level(5, 5).unwrap(), 5);
        assert!(matches!(
            check_access_level(0, 5),
            Err(RagError::InvalidAccessLevel { level: 0, total: 5 })
        ));
        assert!(check_access_level(6, 5).is_err());
    }

    #[test]
    fn load_error_names_location() {
        let err = RagError::load("reports/q3.csv", "bad quote");
        assert_eq!(
            err.to_string(),
            "Failed to load document reports/q3.csv: bad quote"
        );
    }
}
