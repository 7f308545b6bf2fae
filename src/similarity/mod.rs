//! Pairwise similarity scoring and bounded all-pairs comparison.
//!
//! Scoring combines three signals with fixed weights:
//!
//! - n-gram multiset overlap (highest weight, the most specific signal),
//! - bounded-distance comparison of control-flow counters,
//! - bounded-distance comparison of shape counters.
//!
//! Everything is deterministic: identical fingerprint pairs reproduce
//! byte-identical results including explanation text. Bulk comparison
//! walks every unordered pair once, discards pairs below the caller's
//! threshold immediately, and retains at most K matches per subject
//! through the min-heap in [`topk`].

pub mod topk;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SimilarityError};
use crate::fingerprint::Fingerprint;
use topk::TopK;

/// Score at or above which a pair is a near-identical copy.
pub const THRESHOLD_NEAR_IDENTICAL: f64 = 0.95;
/// Score at or above which a pair is a structural variant.
pub const THRESHOLD_VARIANT: f64 = 0.85;
/// Score at or above which a pair shares a similar pattern.
pub const THRESHOLD_SIMILAR: f64 = 0.70;
/// Default retention threshold for bulk scoring.
pub const THRESHOLD_WEAK: f64 = 0.55;

/// Overall-score weight of the n-gram signal.
pub const WEIGHT_NGRAM: f64 = 0.60;
/// Overall-score weight of the control-flow signal.
pub const WEIGHT_CONTROL_FLOW: f64 = 0.25;
/// Overall-score weight of the shape signal.
pub const WEIGHT_SHAPE: f64 = 0.15;

/// Trigram vs quadgram split inside the n-gram score.
const WEIGHT_TRIGRAM: f64 = 0.6;
const WEIGHT_QUADGRAM: f64 = 0.4;

/// Most-frequent shared trigrams listed in an explanation.
const SHARED_PATTERN_CAP: usize = 5;

/// Pairs between progress callback invocations.
const PROGRESS_INTERVAL: u64 = 1000;

/// Closed set of similarity categories, mapped from fixed score bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityCategory {
    /// Overall score >= 0.95: same program modulo embedded constants.
    NearIdenticalCopy,
    /// Overall score >= 0.85: shared skeleton with local edits.
    StructuralVariant,
    /// Overall score >= 0.70: substantial shared structure.
    SimilarPattern,
    /// Everything retained below 0.70.
    WeakMatch,
}

impl SimilarityCategory {
    /// Map an overall score to its category band.
    pub fn from_score(score: f64) -> Self {
        if score >= THRESHOLD_NEAR_IDENTICAL {
            Self::NearIdenticalCopy
        } else if score >= THRESHOLD_VARIANT {
            Self::StructuralVariant
        } else if score >= THRESHOLD_SIMILAR {
            Self::SimilarPattern
        } else {
            Self::WeakMatch
        }
    }

    /// Stable machine-readable name (matches the serialized form).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NearIdenticalCopy => "near_identical_copy",
            Self::StructuralVariant => "structural_variant",
            Self::SimilarPattern => "similar_pattern",
            Self::WeakMatch => "weak_match",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::NearIdenticalCopy => "Near-identical copy",
            Self::StructuralVariant => "Structural variant",
            Self::SimilarPattern => "Similar structural pattern",
            Self::WeakMatch => "Weak structural match",
        }
    }
}

impl fmt::Display for SimilarityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing one fingerprint pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Identifier of the subject fingerprint.
    pub subject_id: String,
    /// Identifier of the matched fingerprint.
    pub matched_id: String,
    /// Weighted combination of the three sub-scores, in [0, 1].
    pub overall_score: f64,
    /// N-gram multiset overlap score, in [0, 1].
    pub ngram_score: f64,
    /// Control-flow counter similarity, in [0, 1].
    pub control_flow_score: f64,
    /// Shape counter similarity, in [0, 1].
    pub shape_score: f64,
    /// Score band the pair falls into.
    pub category: SimilarityCategory,
    /// Overall score as an integer percentage, in [0, 100].
    pub confidence_percent: u8,
    /// Deterministic human-readable summary of the comparison.
    pub explanation: String,
    /// Most frequent shared trigrams, capped, most-frequent-first.
    pub shared_patterns: Vec<String>,
}

/// Options for bulk scoring.
#[derive(Debug, Clone)]
pub struct ScoreOptions {
    /// Minimum overall score a pair must reach to be retained.
    pub threshold: f64,
    /// Maximum retained matches per subject.
    pub max_matches_per_subject: usize,
    /// Cooperative cancellation flag, checked once per pair.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ScoreOptions {
    /// Defaults matching the historical pipeline: weak-match threshold,
    /// ten matches per subject.
    pub fn new() -> Self {
        Self {
            threshold: THRESHOLD_WEAK,
            max_matches_per_subject: 10,
            cancel: None,
        }
    }
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress callback: `(pairs_done, total_pairs)`.
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Sync + 'a;

/// Multiset-overlap (Jaccard) similarity between two n-gram count maps:
/// sum of per-key minima over sum of per-key maxima.
///
/// Two empty multisets compare as 1.0 (vacuously identical, which keeps
/// self-similarity exact for programs shorter than the window); exactly
/// one empty side compares as 0.0. No division by zero is possible.
pub fn multiset_jaccard(a: &BTreeMap<String, u64>, b: &BTreeMap<String, u64>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut intersection: u64 = 0;
    let mut union: u64 = 0;

    for (key, &count_a) in a {
        let count_b = b.get(key).copied().unwrap_or(0);
        intersection += count_a.min(count_b);
        union += count_a.max(count_b);
    }
    for (key, &count_b) in b {
        if !a.contains_key(key) {
            union += count_b;
        }
    }

    intersection as f64 / union as f64
}

/// Bounded-distance similarity between two counters:
/// `1 - |a - b| / max(a, b)`, with both-zero treated as a match.
fn counter_similarity(a: usize, b: usize) -> f64 {
    if a == 0 && b == 0 {
        return 1.0;
    }
    let (a, b) = (a as f64, b as f64);
    1.0 - (a - b).abs() / a.max(b)
}

/// Weighted trigram/quadgram overlap. Equal multiset hashes short-circuit
/// a component to 1.0 without walking the maps.
fn ngram_similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let trigram = if a.trigram_hash == b.trigram_hash {
        1.0
    } else {
        multiset_jaccard(&a.trigram_counts, &b.trigram_counts)
    };
    let quadgram = if a.quadgram_hash == b.quadgram_hash {
        1.0
    } else {
        multiset_jaccard(&a.quadgram_counts, &b.quadgram_counts)
    };
    WEIGHT_TRIGRAM * trigram + WEIGHT_QUADGRAM * quadgram
}

/// Mean bounded-distance similarity over the control-flow counters and
/// the two presence booleans. Symmetric; two all-zero sides score 1.0.
fn control_flow_similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let components = [
        counter_similarity(a.jump_count, b.jump_count),
        counter_similarity(a.jumpdest_count, b.jumpdest_count),
        counter_similarity(a.storage_read_count, b.storage_read_count),
        counter_similarity(a.storage_write_count, b.storage_write_count),
        counter_similarity(a.external_call_count, b.external_call_count),
        (1.0 - (a.branch_density - b.branch_density).abs()).max(0.0),
        if a.has_selfdestruct == b.has_selfdestruct { 1.0 } else { 0.0 },
        if a.has_delegated_call == b.has_delegated_call { 1.0 } else { 0.0 },
    ];
    components.iter().sum::<f64>() / components.len() as f64
}

/// Mean bounded-distance similarity over the shape counters. The size
/// terms keep very differently sized programs from scoring near 1 even
/// when other signals agree.
fn shape_similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let components = [
        counter_similarity(a.instruction_count, b.instruction_count),
        counter_similarity(a.unique_mnemonic_count, b.unique_mnemonic_count),
        (1.0 - (a.unique_ratio - b.unique_ratio).abs()).max(0.0),
    ];
    components.iter().sum::<f64>() / components.len() as f64
}

/// Shared trigrams, most-frequent-first by shared occurrence count,
/// ties broken lexicographically, capped.
fn shared_patterns(a: &Fingerprint, b: &Fingerprint) -> Vec<String> {
    let mut shared: Vec<(u64, &String)> = a
        .trigram_counts
        .iter()
        .filter_map(|(key, &count_a)| {
            b.trigram_counts
                .get(key)
                .map(|&count_b| (count_a.min(count_b), key))
        })
        .collect();
    shared.sort_by(|x, y| y.0.cmp(&x.0).then_with(|| x.1.cmp(y.1)));
    shared
        .into_iter()
        .take(SHARED_PATTERN_CAP)
        .map(|(_, key)| key.clone())
        .collect()
}

/// Score one fingerprint pair.
///
/// Symmetric up to the subject/matched identifiers: swapping the
/// arguments swaps the ids and changes nothing else.
pub fn score(a: &Fingerprint, b: &Fingerprint) -> SimilarityResult {
    let ngram_score = ngram_similarity(a, b);
    let control_flow_score = control_flow_similarity(a, b);
    let shape_score = shape_similarity(a, b);

    let overall_score = (WEIGHT_NGRAM * ngram_score
        + WEIGHT_CONTROL_FLOW * control_flow_score
        + WEIGHT_SHAPE * shape_score)
        .clamp(0.0, 1.0);

    let category = SimilarityCategory::from_score(overall_score);
    let confidence_percent = (overall_score * 100.0).round() as u8;
    let patterns = shared_patterns(a, b);

    let explanation = format!(
        "{}: {}% overall similarity (n-gram {}%, control-flow {}%, shape {}%); {} shared trigram pattern{}",
        category.describe(),
        confidence_percent,
        (ngram_score * 100.0).round() as u64,
        (control_flow_score * 100.0).round() as u64,
        (shape_score * 100.0).round() as u64,
        patterns.len(),
        if patterns.len() == 1 { "" } else { "s" },
    );

    SimilarityResult {
        subject_id: a.identity.clone(),
        matched_id: b.identity.clone(),
        overall_score,
        ngram_score,
        control_flow_score,
        shape_score,
        category,
        confidence_percent,
        explanation,
        shared_patterns: patterns,
    }
}

fn check_corpus_size(fingerprints: &[Fingerprint]) -> Result<()> {
    if fingerprints.len() < 2 {
        return Err(SimilarityError::CorpusTooSmall {
            needed: 2,
            actual: fingerprints.len(),
        });
    }
    Ok(())
}

fn total_pair_count(n: usize) -> u64 {
    (n as u64) * (n as u64 - 1) / 2
}

/// Score every unordered fingerprint pair, retaining at most
/// `max_matches_per_subject` matches per subject at or above `threshold`.
///
/// Each pair appears at most once, under the endpoint that comes first
/// in the input (subject = earlier, matched = later); scoring is
/// symmetric, so the reverse direction carries no extra information.
/// Output is each subject's retained list in descending score order
/// (ties by matched identifier), concatenated in subject order. The
/// progress callback, if supplied, fires every 1000 pairs and once at
/// completion.
pub fn score_all(
    fingerprints: &[Fingerprint],
    options: &ScoreOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<Vec<SimilarityResult>> {
    check_corpus_size(fingerprints)?;

    let n = fingerprints.len();
    let total_pairs = total_pair_count(n);
    tracing::debug!(subjects = n, total_pairs, "starting bulk scoring");

    let mut retained: Vec<TopK> = (0..n)
        .map(|_| TopK::new(options.max_matches_per_subject))
        .collect();
    let mut pairs_done: u64 = 0;

    for i in 0..n {
        for j in (i + 1)..n {
            if let Some(flag) = &options.cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(SimilarityError::Cancelled {
                        pairs_done,
                        total_pairs,
                    });
                }
            }

            let result = score(&fingerprints[i], &fingerprints[j]);
            pairs_done += 1;
            if pairs_done % PROGRESS_INTERVAL == 0 {
                if let Some(callback) = progress {
                    callback(pairs_done, total_pairs);
                }
            }

            if result.overall_score < options.threshold {
                continue;
            }
            retained[i].insert(result);
        }
    }

    // The interval branch already reported completion when total_pairs
    // divides evenly.
    if total_pairs % PROGRESS_INTERVAL != 0 {
        if let Some(callback) = progress {
            callback(total_pairs, total_pairs);
        }
    }

    let results: Vec<SimilarityResult> =
        retained.into_iter().flat_map(TopK::into_sorted).collect();
    tracing::debug!(retained = results.len(), "bulk scoring complete");
    Ok(results)
}

/// Parallel variant of [`score_all`].
///
/// The pair space is partitioned by subject row; each worker fills its
/// own per-subject retention maps, which are merged by per-subject top-K
/// merge, preserving the O(n·K) memory bound.
#[cfg(feature = "parallel")]
pub fn score_all_parallel(
    fingerprints: &[Fingerprint],
    options: &ScoreOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<Vec<SimilarityResult>> {
    use rayon::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;

    check_corpus_size(fingerprints)?;

    let n = fingerprints.len();
    let total_pairs = total_pair_count(n);
    let pairs_done = AtomicU64::new(0);
    let capacity = options.max_matches_per_subject;

    let merged: Result<HashMap<usize, TopK>> = (0..n.saturating_sub(1))
        .into_par_iter()
        .try_fold(HashMap::new, |mut local: HashMap<usize, TopK>, i| {
            for j in (i + 1)..n {
                if let Some(flag) = &options.cancel {
                    if flag.load(Ordering::Relaxed) {
                        return Err(SimilarityError::Cancelled {
                            pairs_done: pairs_done.load(Ordering::Relaxed),
                            total_pairs,
                        });
                    }
                }

                let result = score(&fingerprints[i], &fingerprints[j]);
                let done = pairs_done.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_INTERVAL == 0 {
                    if let Some(callback) = progress {
                        callback(done, total_pairs);
                    }
                }

                if result.overall_score < options.threshold {
                    continue;
                }
                local
                    .entry(i)
                    .or_insert_with(|| TopK::new(capacity))
                    .insert(result);
            }
            Ok(local)
        })
        .try_reduce(HashMap::new, |mut a, b| {
            for (subject, topk) in b {
                a.entry(subject)
                    .or_insert_with(|| TopK::new(capacity))
                    .merge(topk);
            }
            Ok(a)
        });
    let mut merged = merged?;

    if total_pairs % PROGRESS_INTERVAL != 0 {
        if let Some(callback) = progress {
            callback(total_pairs, total_pairs);
        }
    }

    let mut results = Vec::new();
    for subject in 0..n {
        if let Some(topk) = merged.remove(&subject) {
            results.extend(topk.into_sorted());
        }
    }
    Ok(results)
}
