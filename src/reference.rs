//! Matching a corpus against a fixed reference set.
//!
//! Built on the pairwise scoring engine: every corpus fingerprint is
//! compared against a small list of well-known reference programs (e.g.
//! early token contracts) to flag likely clones or derivatives. The
//! reference list is injected configuration — an identifier-to-metadata
//! mapping supplied by the caller — not engine state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SimilarityError};
use crate::fingerprint::Fingerprint;
use crate::normalize::normalize;
use crate::similarity::{self, SimilarityResult};

/// Metadata describing one reference program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    /// Display name (e.g. "MistCoin").
    pub name: String,
    /// Classification label (e.g. "ERC-20 Token").
    pub kind: String,
    /// Free-form description.
    pub description: String,
}

/// One corpus fingerprint matched against a reference program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMatch {
    /// Name of the matched reference.
    pub reference_name: String,
    /// Kind of the matched reference.
    pub reference_kind: String,
    /// Full comparison (subject = corpus program, matched = reference).
    pub result: SimilarityResult,
}

/// An injected set of reference programs with precomputed fingerprints.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    entries: BTreeMap<String, (ReferenceInfo, Fingerprint)>,
}

impl ReferenceSet {
    /// Build a reference set from `(identifier, info, hex bytecode)`
    /// triples. A reference whose bytecode decodes to no instructions is
    /// rejected: unlike corpus records, references are configuration and
    /// a broken one is a caller mistake worth surfacing.
    pub fn from_references<I>(references: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, ReferenceInfo, String)>,
    {
        let mut entries = BTreeMap::new();
        for (index, (id, info, bytecode)) in references.into_iter().enumerate() {
            let normalized = normalize(&bytecode);
            if normalized.canonical_instructions.is_empty() {
                return Err(SimilarityError::InvalidRecord {
                    index,
                    reason: format!("reference {id} has no decodable bytecode"),
                });
            }
            let fingerprint = Fingerprint::extract(&id, &normalized.canonical_instructions);
            entries.insert(id, (info, fingerprint));
        }
        Ok(Self { entries })
    }

    /// Number of references.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no references.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata for a reference identifier, if present.
    pub fn info(&self, id: &str) -> Option<&ReferenceInfo> {
        self.entries.get(id).map(|(info, _)| info)
    }

    /// Compare one fingerprint against every reference, returning
    /// matches at or above `threshold` in descending score order.
    pub fn match_fingerprint(&self, subject: &Fingerprint, threshold: f64) -> Vec<ReferenceMatch> {
        let mut matches: Vec<ReferenceMatch> = self
            .entries
            .values()
            .filter_map(|(info, reference)| {
                let result = similarity::score(subject, reference);
                (result.overall_score >= threshold).then(|| ReferenceMatch {
                    reference_name: info.name.clone(),
                    reference_kind: info.kind.clone(),
                    result,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.result
                .overall_score
                .total_cmp(&a.result.overall_score)
                .then_with(|| a.result.matched_id.cmp(&b.result.matched_id))
        });
        matches
    }

    /// Compare every corpus fingerprint against the reference set,
    /// keeping at most `max_matches` references per subject.
    pub fn match_corpus(
        &self,
        fingerprints: &[Fingerprint],
        threshold: f64,
        max_matches: usize,
    ) -> Vec<ReferenceMatch> {
        let mut all = Vec::new();
        for subject in fingerprints {
            let mut matches = self.match_fingerprint(subject, threshold);
            matches.truncate(max_matches);
            all.extend(matches);
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TOKEN_CODE: &str = "0x6060604052600060005560016001556002600255346000";
    const TOKEN_VARIANT: &str = "0x6080604052600360005560046001556005600255346000";
    const OTHER_CODE: &str = "0x33600054145760ff60005260206000f3";

    fn info(name: &str) -> ReferenceInfo {
        ReferenceInfo {
            name: name.to_string(),
            kind: "ERC-20 Token".to_string(),
            description: format!("{name} reference contract"),
        }
    }

    fn reference_set() -> ReferenceSet {
        ReferenceSet::from_references([
            ("0xREF1".to_string(), info("Token One"), TOKEN_CODE.to_string()),
            ("0xREF2".to_string(), info("Token Two"), OTHER_CODE.to_string()),
        ])
        .unwrap()
    }

    fn fingerprint(id: &str, code: &str) -> Fingerprint {
        Fingerprint::extract(id, &normalize(code).canonical_instructions)
    }

    #[test]
    fn test_build_and_lookup() {
        let set = reference_set();
        assert_eq!(set.len(), 2);
        assert_eq!(set.info("0xREF1").unwrap().name, "Token One");
        assert!(set.info("0xMISSING").is_none());
    }

    #[test]
    fn test_rejects_undecodable_reference() {
        let err = ReferenceSet::from_references([(
            "0xBAD".to_string(),
            info("Broken"),
            "0x".to_string(),
        )])
        .unwrap_err();
        assert!(matches!(err, SimilarityError::InvalidRecord { .. }));
    }

    #[test]
    fn test_match_fingerprint_orders_by_score() {
        let set = reference_set();
        let subject = fingerprint("0xSUBJ", TOKEN_VARIANT);
        let matches = set.match_fingerprint(&subject, 0.0);

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].result.matched_id, "0xREF1");
        assert_eq!(matches[0].result.overall_score, 1.0);
        assert_eq!(matches[0].reference_name, "Token One");
        assert!(matches[1].result.overall_score < matches[0].result.overall_score);
    }

    #[test]
    fn test_match_corpus_threshold_and_cap() {
        let set = reference_set();
        let corpus = vec![
            fingerprint("0xA", TOKEN_VARIANT),
            fingerprint("0xB", OTHER_CODE),
        ];
        let matches = set.match_corpus(&corpus, 0.95, 1);

        // Each subject matches exactly its clone reference
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].result.subject_id, "0xA");
        assert_eq!(matches[0].result.matched_id, "0xREF1");
        assert_eq!(matches[1].result.subject_id, "0xB");
        assert_eq!(matches[1].result.matched_id, "0xREF2");
    }
}
