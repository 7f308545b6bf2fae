//! Corpus ingestion and batch fingerprinting.
//!
//! Input corpora come from several historical dumps whose field names
//! drifted over the years, so record construction reconciles the known
//! aliases. Per-record problems (missing fields, empty bytecode, nothing
//! decodable) are converted to skip-plus-count at the record boundary;
//! they never abort a batch. Only corpus-level preconditions are fatal,
//! and those surface from the scoring layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SimilarityError};
use crate::fingerprint::Fingerprint;
use crate::normalize::normalize;

/// Accepted identifier field names, tried in order.
const ID_FIELDS: &[&str] = &["address", "Contract Address", "contract_address"];

/// Accepted bytecode field names, tried in order.
const BYTECODE_FIELDS: &[&str] = &["runtime_bytecode", "bytecode", "Runtime Bytecode"];

/// One contract record ready for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    /// Contract identifier (address).
    pub id: String,
    /// Hex-encoded runtime bytecode.
    pub bytecode: String,
}

impl ContractRecord {
    /// Create a record from already-reconciled fields.
    pub fn new(id: impl Into<String>, bytecode: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bytecode: bytecode.into(),
        }
    }

    /// Build a record from a loose JSON object, reconciling the field
    /// names used by the different historical data dumps.
    pub fn from_json(index: usize, value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| SimilarityError::InvalidRecord {
            index,
            reason: "not a JSON object".to_string(),
        })?;

        let pick = |fields: &[&str]| {
            fields
                .iter()
                .filter_map(|f| object.get(*f))
                .filter_map(Value::as_str)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        };

        let id = pick(ID_FIELDS).ok_or_else(|| SimilarityError::InvalidRecord {
            index,
            reason: "missing identifier field".to_string(),
        })?;
        let bytecode = pick(BYTECODE_FIELDS).ok_or_else(|| SimilarityError::InvalidRecord {
            index,
            reason: "missing bytecode field".to_string(),
        })?;

        Ok(Self { id, bytecode })
    }
}

/// Outcome counts for one batch fingerprinting pass.
///
/// Surfaced failures are structured: counts plus per-record reasons,
/// never silent drops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusReport {
    /// Records examined.
    pub processed: usize,
    /// Records that produced a fingerprint.
    pub fingerprinted: usize,
    /// Records skipped.
    pub skipped: usize,
    /// One reason per skipped record, in input order.
    pub skip_reasons: Vec<String>,
}

impl CorpusReport {
    fn skip(&mut self, reason: String) {
        tracing::debug!(%reason, "skipping record");
        self.skipped += 1;
        self.skip_reasons.push(reason);
    }
}

/// Fingerprint every usable record in a corpus.
///
/// Records with empty or undecodable bytecode are skipped and counted;
/// the batch always completes.
pub fn fingerprint_corpus(records: &[ContractRecord]) -> (Vec<Fingerprint>, CorpusReport) {
    let mut fingerprints = Vec::with_capacity(records.len());
    let mut report = CorpusReport::default();

    for record in records {
        report.processed += 1;

        if record.bytecode.is_empty() || record.bytecode == "0x" {
            report.skip(format!("empty bytecode for {}", record.id));
            continue;
        }

        let normalized = normalize(&record.bytecode);
        if normalized.canonical_instructions.is_empty() {
            report.skip(format!("no instructions decoded for {}", record.id));
            continue;
        }

        fingerprints.push(Fingerprint::extract(
            &record.id,
            &normalized.canonical_instructions,
        ));
        report.fingerprinted += 1;
    }

    tracing::info!(
        processed = report.processed,
        fingerprinted = report.fingerprinted,
        skipped = report.skipped,
        "corpus fingerprinting complete"
    );
    (fingerprints, report)
}

/// Parse a JSON array of contract objects into records.
///
/// Malformed individual objects are skipped and counted in the report;
/// a top-level document that is not an array is an input error.
pub fn records_from_json(json: &str) -> Result<(Vec<ContractRecord>, CorpusReport)> {
    let document: Value = serde_json::from_str(json).map_err(|e| SimilarityError::InputParse {
        message: e.to_string(),
    })?;
    let array = document.as_array().ok_or_else(|| SimilarityError::InputParse {
        message: "input must be a JSON array of contract objects".to_string(),
    })?;

    let mut records = Vec::with_capacity(array.len());
    let mut report = CorpusReport::default();

    for (index, value) in array.iter().enumerate() {
        report.processed += 1;
        match ContractRecord::from_json(index, value) {
            Ok(record) => records.push(record),
            Err(e) => report.skip(e.to_string()),
        }
    }

    Ok((records, report))
}
