//! Bytecode Similarity - Structural Analysis for Historical EVM Contracts
//!
//! This library identifies near-duplicate, cloned, and structurally
//! related programs in a corpus of EVM bytecode, deterministically and
//! without machine learning. It targets offline batch analysis of large
//! historical datasets (the 2015-2017 contract era, where copies and
//! slight modifications of earlier contracts were the norm).
//!
//! # Pipeline
//!
//! 1. **Normalization** ([`normalize`]): decode hex bytecode into an
//!    instruction stream, strip trailing compiler metadata, collapse
//!    every PUSHn to a generic `PUSH` marker so programs differing only
//!    in embedded constants become comparable.
//! 2. **Fingerprinting** ([`Fingerprint::extract`]): derive n-gram
//!    multisets, control-flow counters, shape statistics, a loop
//!    heuristic, and compact signatures from the canonical stream.
//! 3. **Scoring** ([`score`], [`score_all`]): weighted multi-signal
//!    pairwise comparison, with memory-bounded top-K retention per
//!    subject across all O(n²) candidate pairs.
//!
//! Every stage is a pure function of its input: the same bytecode always
//! produces byte-identical fingerprints, scores, and explanations.
//!
//! # Quick Start
//!
//! ```
//! use bytecode_similarity::{normalize, score, Fingerprint};
//!
//! let a = normalize("0x6060604052");
//! let b = normalize("0x60ff60ee52");
//!
//! let fp_a = Fingerprint::extract("0xA", &a.canonical_instructions);
//! let fp_b = Fingerprint::extract("0xB", &b.canonical_instructions);
//!
//! // Same opcode skeleton, different constants: a perfect match
//! let result = score(&fp_a, &fp_b);
//! assert_eq!(result.overall_score, 1.0);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod corpus;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod normalize;
pub mod opcodes;
pub mod reference;
pub mod similarity;

pub use corpus::{fingerprint_corpus, records_from_json, ContractRecord, CorpusReport};
pub use error::{Result, SimilarityError};
pub use export::SimilarityExporter;
pub use fingerprint::Fingerprint;
pub use normalize::{normalize, NormalizedCode};
pub use similarity::{
    score, score_all, ProgressFn, ScoreOptions, SimilarityCategory, SimilarityResult,
    THRESHOLD_WEAK,
};

/// Normalize bytecode and extract its fingerprint in one step.
///
/// Decode warnings are dropped here; use [`normalize`] directly when
/// they matter.
pub fn fingerprint_bytecode(identifier: &str, bytecode: &str) -> Fingerprint {
    let normalized = normalize(bytecode);
    Fingerprint::extract(identifier, &normalized.canonical_instructions)
}

/// Complete output of one corpus analysis run.
#[derive(Debug, Clone)]
pub struct CorpusAnalysis {
    /// One fingerprint per usable record, in input order.
    pub fingerprints: Vec<Fingerprint>,
    /// Retained similarity pairs.
    pub results: Vec<SimilarityResult>,
    /// Skip counts and reasons from the fingerprinting pass.
    pub report: CorpusReport,
}

/// Run the full pipeline over a corpus of contract records.
///
/// Per-record failures are skipped and counted in the report; fewer than
/// two fingerprintable records is a [`SimilarityError::CorpusTooSmall`].
pub fn analyze_corpus(
    records: &[ContractRecord],
    options: &ScoreOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<CorpusAnalysis> {
    let (fingerprints, report) = fingerprint_corpus(records);
    let results = score_all(&fingerprints, options, progress)?;
    Ok(CorpusAnalysis {
        fingerprints,
        results,
        report,
    })
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_prologue_scenario() {
        // "0x6060604052" keeps width-specific mnemonics only in the raw
        // stream
        let result = normalize("0x6060604052");
        assert_eq!(result.canonical_instructions, ["PUSH", "PUSH", "MSTORE"]);
        assert_eq!(result.raw_instructions, ["PUSH1", "PUSH1", "MSTORE"]);
        assert!(!result.metadata_detected);
    }

    #[test]
    fn test_empty_bytecode_scenario() {
        let fp = fingerprint_bytecode("0xEMPTY", "0x");
        assert_eq!(fp.instruction_count, 0);
        assert_eq!(fp.unique_ratio, 0.0);
        assert_eq!(fp.control_flow_signature, "J0000D0000B0000C000S0");
        assert_eq!(fp.shape_signature, "O000000U000R0000");
    }

    #[test]
    fn test_two_record_corpus_scenario() {
        let records = vec![
            ContractRecord::new("0xA", "0x6060604052600060005560016001556002600255346000"),
            ContractRecord::new("0xB", "0x6080604052600360005560046001556005600255346000"),
        ];
        let analysis = analyze_corpus(&records, &ScoreOptions::new(), None).unwrap();

        assert_eq!(analysis.fingerprints.len(), 2);
        assert_eq!(analysis.results.len(), 1);
        assert_eq!(analysis.results[0].subject_id, "0xA");
        assert_eq!(analysis.results[0].matched_id, "0xB");
        assert!(analysis.results[0].overall_score >= THRESHOLD_WEAK);
    }

    #[test]
    fn test_one_record_corpus_fails() {
        let records = vec![ContractRecord::new("0xA", "0x6060604052")];
        let err = analyze_corpus(&records, &ScoreOptions::new(), None).unwrap_err();
        assert!(matches!(err, SimilarityError::CorpusTooSmall { .. }));
    }

    #[test]
    fn test_unusable_records_skipped_not_fatal() {
        let records = vec![
            ContractRecord::new("0xA", "0x6060604052600060005560016001556002600255346000"),
            ContractRecord::new("0xBAD", "0x"),
            ContractRecord::new("0xB", "0x6080604052600360005560046001556005600255346000"),
        ];
        let analysis = analyze_corpus(&records, &ScoreOptions::new(), None).unwrap();
        assert_eq!(analysis.report.skipped, 1);
        assert_eq!(analysis.fingerprints.len(), 2);
    }
}
