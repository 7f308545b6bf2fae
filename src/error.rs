//! Error types for the similarity engine.
//!
//! Decode problems are deliberately NOT errors: the normalizer records
//! them as warnings inside [`crate::normalize::NormalizedCode`] and
//! always returns a usable result. The variants here cover per-record
//! input failures (skip one record, continue the batch), corpus-level
//! preconditions (abort the run), and I/O at the export boundary.

use thiserror::Error;

/// Primary error type for the similarity engine.
#[derive(Debug, Error)]
pub enum SimilarityError {
    /// IO error during export or input loading.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single record is unusable (missing identifier or bytecode).
    /// Fatal to the record only; batches skip and count these.
    #[error("Invalid record at index {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    /// Bulk scoring needs at least two fingerprintable records.
    #[error("Corpus too small: need at least {needed} fingerprints, got {actual}")]
    CorpusTooSmall { needed: usize, actual: usize },

    /// A cooperative cancellation signal was observed mid-scan.
    #[error("Scoring cancelled after {pairs_done} of {total_pairs} pairs")]
    Cancelled { pairs_done: u64, total_pairs: u64 },

    /// Malformed input corpus file.
    #[error("Input parse error: {message}")]
    InputParse { message: String },
}

/// Result type alias for similarity operations.
pub type Result<T> = std::result::Result<T, SimilarityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimilarityError::CorpusTooSmall {
            needed: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("at least 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn test_invalid_record() {
        let err = SimilarityError::InvalidRecord {
            index: 7,
            reason: "missing bytecode".to_string(),
        };
        assert!(err.to_string().contains("index 7"));
        assert!(err.to_string().contains("missing bytecode"));
    }
}
