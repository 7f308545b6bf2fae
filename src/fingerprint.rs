//! Fingerprint extraction.
//!
//! Derives a deterministic feature vector from a canonical instruction
//! stream. Three signal families are captured:
//!
//! - **N-grams** (window sizes 3, 4, 5): local instruction patterns,
//!   robust to insertions and deletions elsewhere in the program. Exact
//!   copies share every n-gram; edits change some and preserve the rest.
//! - **Control-flow counters**: jumps, jump targets, branch density,
//!   storage and call activity. Captures program structure.
//! - **Shape counters**: total and distinct mnemonic counts. Captures
//!   program size and vocabulary.
//!
//! Every field is a pure function of the instruction stream; extracting
//! the same stream twice yields byte-identical fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::opcodes;

/// Delimiter joining mnemonics inside an n-gram key. Mnemonics are
/// alphanumeric plus underscore, so `|` cannot collide.
const NGRAM_DELIMITER: &str = "|";

/// Hash value assigned to an empty n-gram multiset.
const EMPTY_HASH: &str = "empty";

/// Hex digest length kept from the SHA-256 of a multiset.
const HASH_PREFIX_LEN: usize = 16;

/// Lookahead window for the loop heuristic, in instructions.
const LOOP_WINDOW: usize = 50;

/// Multi-signal fingerprint of one program.
///
/// Immutable after extraction; holds no reference back to the bytecode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Identifier of the fingerprinted program (e.g. contract address).
    pub identity: String,

    /// Trigram -> occurrence count.
    pub trigram_counts: BTreeMap<String, u64>,
    /// Quadgram -> occurrence count.
    pub quadgram_counts: BTreeMap<String, u64>,
    /// Digest of the trigram multiset.
    pub trigram_hash: String,
    /// Digest of the quadgram multiset.
    pub quadgram_hash: String,
    /// Digest of the pentagram multiset (the multiset itself is not kept).
    pub pentagram_hash: String,

    /// JUMP + JUMPI instructions.
    pub jump_count: usize,
    /// JUMPDEST instructions (valid jump targets).
    pub jumpdest_count: usize,
    /// JUMPI count over total instructions, 0.0 for an empty stream.
    pub branch_density: f64,
    /// SLOAD instructions.
    pub storage_read_count: usize,
    /// SSTORE instructions.
    pub storage_write_count: usize,
    /// External-call-family instructions (CALL, CREATE, ...).
    pub external_call_count: usize,
    /// Whether SELFDESTRUCT appears anywhere in the stream.
    pub has_selfdestruct: bool,
    /// Whether DELEGATECALL appears anywhere in the stream.
    pub has_delegated_call: bool,

    /// Total instructions.
    pub instruction_count: usize,
    /// Distinct mnemonics.
    pub unique_mnemonic_count: usize,
    /// Distinct over total, 0.0 for an empty stream.
    pub unique_ratio: f64,

    /// Heuristic loop estimate; see [`estimate_loops`]. Not ground truth.
    pub estimated_loop_count: usize,

    /// Fixed-width encoding of the control-flow counters.
    pub control_flow_signature: String,
    /// Fixed-width encoding of the shape counters.
    pub shape_signature: String,
}

impl Fingerprint {
    /// Extract a fingerprint from a canonical instruction stream.
    ///
    /// An empty stream yields a fully zeroed fingerprint with the
    /// canonical all-zero signatures, so callers can compare against it
    /// without special-casing.
    pub fn extract(identity: &str, canonical: &[String]) -> Self {
        let trigram_counts = ngram_counts(canonical, 3);
        let quadgram_counts = ngram_counts(canonical, 4);
        let pentagram_counts = ngram_counts(canonical, 5);

        let count_of = |mnemonic: &str| canonical.iter().filter(|m| *m == mnemonic).count();

        let jumpi_count = count_of("JUMPI");
        let jump_count = count_of("JUMP") + jumpi_count;
        let jumpdest_count = count_of("JUMPDEST");
        let branch_density = if canonical.is_empty() {
            0.0
        } else {
            jumpi_count as f64 / canonical.len() as f64
        };

        let storage_read_count = count_of("SLOAD");
        let storage_write_count = count_of("SSTORE");
        let external_call_count = canonical
            .iter()
            .filter(|m| opcodes::is_call_family(m))
            .count();
        let has_selfdestruct = canonical.iter().any(|m| m == "SELFDESTRUCT");
        let has_delegated_call = canonical.iter().any(|m| m == "DELEGATECALL");

        let instruction_count = canonical.len();
        let unique_mnemonic_count = canonical
            .iter()
            .collect::<std::collections::BTreeSet<_>>()
            .len();
        let unique_ratio = if instruction_count == 0 {
            0.0
        } else {
            unique_mnemonic_count as f64 / instruction_count as f64
        };

        let estimated_loop_count = estimate_loops(canonical);

        let control_flow_signature = control_flow_signature(
            jump_count,
            jumpdest_count,
            branch_density,
            external_call_count,
            has_selfdestruct,
        );
        let shape_signature =
            shape_signature(instruction_count, unique_mnemonic_count, unique_ratio);

        Self {
            identity: identity.to_string(),
            trigram_hash: hash_ngram_counts(&trigram_counts),
            quadgram_hash: hash_ngram_counts(&quadgram_counts),
            pentagram_hash: hash_ngram_counts(&pentagram_counts),
            trigram_counts,
            quadgram_counts,
            jump_count,
            jumpdest_count,
            branch_density,
            storage_read_count,
            storage_write_count,
            external_call_count,
            has_selfdestruct,
            has_delegated_call,
            instruction_count,
            unique_mnemonic_count,
            unique_ratio,
            estimated_loop_count,
            control_flow_signature,
            shape_signature,
        }
    }

    /// Whether the fingerprint came from an empty instruction stream.
    pub fn is_empty(&self) -> bool {
        self.instruction_count == 0
    }
}

/// Count all contiguous length-`n` subsequences in an instruction stream.
///
/// A stream shorter than the window yields an empty multiset.
pub fn ngram_counts(stream: &[String], n: usize) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    if n == 0 || stream.len() < n {
        return counts;
    }
    for window in stream.windows(n) {
        let key = window.join(NGRAM_DELIMITER);
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

/// Deterministic digest of an n-gram multiset.
///
/// The sorted `(ngram, count)` pairs are serialized to compact JSON and
/// SHA-256 hashed; the first 16 hex characters are kept. Identical
/// multisets hash identically regardless of how they were built. Empty
/// multisets map to the literal `"empty"`.
pub fn hash_ngram_counts(counts: &BTreeMap<String, u64>) -> String {
    if counts.is_empty() {
        return EMPTY_HASH.to_string();
    }
    let pairs: Vec<(&String, &u64)> = counts.iter().collect();
    let canonical = serde_json::to_string(&pairs).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..HASH_PREFIX_LEN].to_string()
}

/// Heuristically estimate loop count from a single linear scan.
///
/// A JUMPDEST opens a window; a JUMPI within 50 instructions of it,
/// before the next JUMPDEST, counts one potential loop and closes the
/// window. This is an approximation with no dataflow analysis behind it.
/// Treat the result as a signal, never as ground truth.
pub fn estimate_loops(stream: &[String]) -> usize {
    let mut loop_count = 0;
    let mut window_open = false;
    let mut distance = 0;

    for mnemonic in stream {
        match mnemonic.as_str() {
            "JUMPDEST" => {
                window_open = true;
                distance = 0;
            }
            "JUMPI" if window_open => {
                if distance < LOOP_WINDOW {
                    loop_count += 1;
                }
                window_open = false;
            }
            _ => distance += 1,
        }
    }

    loop_count
}

/// Encode control-flow counters as a fixed-width signature.
///
/// Format: `J{jumps:04}D{dests:04}B{density*1000:04}C{calls:03}S{0|1}`.
/// Derived for fast external inspection; never authoritative for scoring.
fn control_flow_signature(
    jump_count: usize,
    jumpdest_count: usize,
    branch_density: f64,
    call_count: usize,
    has_selfdestruct: bool,
) -> String {
    format!(
        "J{:04}D{:04}B{:04}C{:03}S{}",
        jump_count,
        jumpdest_count,
        (branch_density * 1000.0) as u64,
        call_count,
        u8::from(has_selfdestruct)
    )
}

/// Encode shape counters as a fixed-width signature.
///
/// Format: `O{count:06}U{unique:03}R{ratio*1000:04}`.
fn shape_signature(instruction_count: usize, unique_count: usize, unique_ratio: f64) -> String {
    format!(
        "O{:06}U{:03}R{:04}",
        instruction_count,
        unique_count,
        (unique_ratio * 1000.0) as u64
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stream(mnemonics: &[&str]) -> Vec<String> {
        mnemonics.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ngram_counts_basic() {
        let ops = stream(&["PUSH", "PUSH", "MSTORE", "CALLVALUE", "ISZERO"]);
        let trigrams = ngram_counts(&ops, 3);
        assert_eq!(trigrams.len(), 3);
        assert_eq!(trigrams["PUSH|PUSH|MSTORE"], 1);
        assert_eq!(trigrams["PUSH|MSTORE|CALLVALUE"], 1);
        assert_eq!(trigrams["MSTORE|CALLVALUE|ISZERO"], 1);
    }

    #[test]
    fn test_ngram_counts_repeats() {
        let ops = stream(&["A", "B", "A", "B", "A"]);
        let trigrams = ngram_counts(&ops, 3);
        assert_eq!(trigrams["A|B|A"], 2);
        assert_eq!(trigrams["B|A|B"], 1);
    }

    #[test]
    fn test_ngram_counts_short_stream() {
        let ops = stream(&["PUSH", "MSTORE"]);
        assert!(ngram_counts(&ops, 3).is_empty());
        assert!(ngram_counts(&[], 3).is_empty());
    }

    #[test]
    fn test_hash_empty_multiset() {
        assert_eq!(hash_ngram_counts(&BTreeMap::new()), "empty");
    }

    #[test]
    fn test_hash_deterministic_and_order_free() {
        let mut a = BTreeMap::new();
        a.insert("X|Y|Z".to_string(), 2);
        a.insert("A|B|C".to_string(), 1);

        let mut b = BTreeMap::new();
        b.insert("A|B|C".to_string(), 1);
        b.insert("X|Y|Z".to_string(), 2);

        let ha = hash_ngram_counts(&a);
        assert_eq!(ha, hash_ngram_counts(&b));
        assert_eq!(ha.len(), HASH_PREFIX_LEN);
        assert!(ha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_sensitive_to_counts() {
        let mut a = BTreeMap::new();
        a.insert("A|B|C".to_string(), 1);
        let mut b = BTreeMap::new();
        b.insert("A|B|C".to_string(), 2);
        assert_ne!(hash_ngram_counts(&a), hash_ngram_counts(&b));
    }

    #[test]
    fn test_estimate_loops() {
        // JUMPDEST followed closely by JUMPI: one potential loop
        let looped = stream(&["JUMPDEST", "PUSH", "LT", "PUSH", "JUMPI", "STOP"]);
        assert_eq!(estimate_loops(&looped), 1);

        // No JUMPDEST before the JUMPI: nothing counted
        let no_dest = stream(&["PUSH", "LT", "JUMPI"]);
        assert_eq!(estimate_loops(&no_dest), 0);

        // A second JUMPDEST reopens the window
        let double = stream(&[
            "JUMPDEST", "PUSH", "JUMPI", "JUMPDEST", "ISZERO", "JUMPI",
        ]);
        assert_eq!(estimate_loops(&double), 2);
    }

    #[test]
    fn test_estimate_loops_window_bound() {
        // 50+ instructions between JUMPDEST and JUMPI: outside the window
        let mut ops = vec!["JUMPDEST".to_string()];
        ops.extend(std::iter::repeat("PUSH".to_string()).take(55));
        ops.push("JUMPI".to_string());
        assert_eq!(estimate_loops(&ops), 0);
    }

    #[test]
    fn test_empty_stream_fingerprint() {
        let fp = Fingerprint::extract("0xEMPTY", &[]);
        assert!(fp.is_empty());
        assert_eq!(fp.instruction_count, 0);
        assert_eq!(fp.unique_ratio, 0.0);
        assert_eq!(fp.branch_density, 0.0);
        assert_eq!(fp.trigram_hash, "empty");
        assert_eq!(fp.quadgram_hash, "empty");
        assert_eq!(fp.pentagram_hash, "empty");
        assert_eq!(fp.control_flow_signature, "J0000D0000B0000C000S0");
        assert_eq!(fp.shape_signature, "O000000U000R0000");
    }

    #[test]
    fn test_fingerprint_counters() {
        let ops = stream(&[
            "PUSH",
            "SLOAD",
            "JUMPDEST",
            "SSTORE",
            "JUMPI",
            "JUMP",
            "CALL",
            "DELEGATECALL",
            "SELFDESTRUCT",
        ]);
        let fp = Fingerprint::extract("0xABC", &ops);

        assert_eq!(fp.jump_count, 2); // JUMP + JUMPI
        assert_eq!(fp.jumpdest_count, 1);
        assert_eq!(fp.storage_read_count, 1);
        assert_eq!(fp.storage_write_count, 1);
        assert_eq!(fp.external_call_count, 2); // CALL + DELEGATECALL
        assert!(fp.has_selfdestruct);
        assert!(fp.has_delegated_call);
        assert_eq!(fp.instruction_count, 9);
        assert_eq!(fp.unique_mnemonic_count, 9);
        assert_eq!(fp.unique_ratio, 1.0);
        assert!((fp.branch_density - 1.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_signature_formats() {
        let ops = stream(&[
            "JUMPDEST", "PUSH", "PUSH", "LT", "JUMPI", "CALL", "JUMP", "STOP",
        ]);
        let fp = Fingerprint::extract("0xSIG", &ops);

        // 2 jumps, 1 dest, density 1/8 = 0.125 -> 0125, 1 call, no selfdestruct
        assert_eq!(fp.control_flow_signature, "J0002D0001B0125C001S0");
        // 8 instructions, 7 unique, ratio 0.875 -> 0875
        assert_eq!(fp.shape_signature, "O000008U007R0875");
    }

    #[test]
    fn test_extraction_deterministic() {
        let ops = stream(&["PUSH", "PUSH", "MSTORE", "JUMPDEST", "JUMPI"]);
        let a = Fingerprint::extract("0xD", &ops);
        let b = Fingerprint::extract("0xD", &ops);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
