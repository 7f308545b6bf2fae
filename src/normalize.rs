//! Bytecode normalization.
//!
//! Turns hex-encoded EVM bytecode into decoded instruction streams
//! suitable for structural comparison. Two contracts compiled from the
//! same source with different constants (addresses, limits, offsets)
//! differ only in the bytes following PUSH opcodes; collapsing every
//! PUSHn to a generic `PUSH` marker in the canonical stream exposes the
//! shared opcode skeleton.
//!
//! Normalization is total: malformed input yields an empty-but-valid
//! result with a recorded warning, never an error.

use byteorder::{BigEndian, ByteOrder};
use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::opcodes::{self, PUSH_MARKER};

/// Minimum bytecode size for metadata detection to apply.
const METADATA_MIN_CODE_SIZE: usize = 43;

/// Plausible range for the trailing metadata block length field.
const METADATA_LEN_RANGE: std::ops::RangeInclusive<usize> = 32..=100;

/// CBOR map markers that open a Solidity metadata block.
const METADATA_CBOR_MARKERS: [u8; 3] = [0xA1, 0xA2, 0xA3];

/// How far back from the end the legacy `bzzr` marker is searched for.
const BZZR_SEARCH_WINDOW: usize = 64;

/// Result of normalizing one bytecode string.
///
/// Immutable once produced; holds no reference to the raw input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedCode {
    /// Decoded mnemonics with every PUSHn collapsed to `PUSH`.
    pub canonical_instructions: Vec<String>,
    /// Decoded mnemonics with their original width-specific names.
    pub raw_instructions: Vec<String>,
    /// Number of decoded instructions.
    pub instruction_count: usize,
    /// Size of the original bytecode in bytes (before metadata stripping).
    pub original_byte_size: usize,
    /// Whether a trailing metadata block was detected and excluded.
    pub metadata_detected: bool,
    /// Byte offset where the metadata block begins, when detected.
    pub metadata_offset: Option<usize>,
    /// Non-fatal problems encountered while decoding.
    pub decode_warnings: Vec<String>,
}

impl NormalizedCode {
    fn empty(original_byte_size: usize, warning: String) -> Self {
        Self {
            canonical_instructions: Vec::new(),
            raw_instructions: Vec::new(),
            instruction_count: 0,
            original_byte_size,
            metadata_detected: false,
            metadata_offset: None,
            decode_warnings: vec![warning],
        }
    }

    /// Canonical stream as one space-separated string, for inspection.
    pub fn canonical_string(&self) -> String {
        self.canonical_instructions.join(" ")
    }
}

/// Strip a leading `0x`/`0X` prefix if present.
fn strip_hex_prefix(bytecode: &str) -> &str {
    bytecode
        .strip_prefix("0x")
        .or_else(|| bytecode.strip_prefix("0X"))
        .unwrap_or(bytecode)
}

/// Detect a trailing Solidity metadata block.
///
/// Solidity (since ~0.4.7) appends a CBOR-encoded build-provenance blob
/// whose length is encoded big-endian in the final two bytes. The block
/// is not executable and must be excluded from structural analysis. The
/// fallback covers the older convention of embedding a literal `bzzr`
/// swarm-hash marker near the end.
///
/// Best-effort and bounds-checked: a miss only degrades comparison
/// quality, it never causes an out-of-range read.
pub fn detect_metadata_offset(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < METADATA_MIN_CODE_SIZE {
        return None;
    }

    let implied_len = BigEndian::read_u16(&bytes[bytes.len() - 2..]) as usize;
    // Block plus length field must leave at least one code byte in front.
    if METADATA_LEN_RANGE.contains(&implied_len) && implied_len + 2 < bytes.len() {
        let start = bytes.len() - implied_len - 2;
        if METADATA_CBOR_MARKERS.contains(&bytes[start]) {
            return Some(start);
        }
    }

    let window_start = bytes.len().saturating_sub(BZZR_SEARCH_WINDOW);
    if let Some(pos) = memmem::rfind(&bytes[window_start..], b"bzzr") {
        let idx = window_start + pos;
        if idx > 2 {
            return Some(idx - 2);
        }
    }

    None
}

/// Normalize hex-encoded bytecode into decoded instruction streams.
///
/// 1. Strips an optional `0x` prefix.
/// 2. Detects and excludes a trailing metadata block.
/// 3. Walks the executable region, emitting each mnemonic into a raw
///    stream and a canonical stream (PUSHn collapsed), advancing past
///    operand bytes.
///
/// Empty or malformed hex produces an empty result with a warning.
/// An operand running past the executable region records a warning and
/// stops the walk; the partial streams are still returned.
pub fn normalize(bytecode: &str) -> NormalizedCode {
    let hex_str = strip_hex_prefix(bytecode);

    if hex_str.is_empty() {
        return NormalizedCode::empty(0, "empty bytecode".to_string());
    }

    let bytes = match hex::decode(hex_str) {
        Ok(b) => b,
        Err(e) => {
            return NormalizedCode::empty(hex_str.len() / 2, format!("invalid hex: {e}"));
        }
    };

    let original_byte_size = bytes.len();
    let metadata_offset = detect_metadata_offset(&bytes);
    let code_end = metadata_offset.unwrap_or(bytes.len());

    let mut raw_instructions = Vec::new();
    let mut canonical_instructions = Vec::new();
    let mut warnings = Vec::new();
    let mut position = 0;

    while position < code_end {
        let (mnemonic, operand_len) = opcodes::decode(bytes[position]);

        canonical_instructions.push(if opcodes::is_push(&mnemonic) {
            PUSH_MARKER.to_string()
        } else {
            mnemonic.clone()
        });
        raw_instructions.push(mnemonic);

        position += 1 + operand_len;

        if position > code_end && operand_len > 0 {
            warnings.push(format!(
                "operand extends past code end at offset {}",
                position - operand_len - 1
            ));
            break;
        }
    }

    NormalizedCode {
        instruction_count: canonical_instructions.len(),
        canonical_instructions,
        raw_instructions,
        original_byte_size,
        metadata_detected: metadata_offset.is_some(),
        metadata_offset,
        decode_warnings: warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_prologue() {
        // PUSH1 0x60, PUSH1 0x60, MSTORE
        let result = normalize("0x6060604052");
        assert_eq!(result.canonical_instructions, ["PUSH", "PUSH", "MSTORE"]);
        assert_eq!(result.raw_instructions, ["PUSH1", "PUSH1", "MSTORE"]);
        assert_eq!(result.instruction_count, 3);
        assert_eq!(result.original_byte_size, 5);
        assert!(!result.metadata_detected);
        assert!(result.decode_warnings.is_empty());
    }

    #[test]
    fn test_prefix_case_insensitive() {
        assert_eq!(normalize("0X6060604052"), normalize("0x6060604052"));
        assert_eq!(normalize("6060604052"), normalize("0x6060604052"));
    }

    #[test]
    fn test_empty_input() {
        let result = normalize("0x");
        assert_eq!(result.instruction_count, 0);
        assert_eq!(result.original_byte_size, 0);
        assert_eq!(result.decode_warnings, ["empty bytecode"]);
    }

    #[test]
    fn test_invalid_hex() {
        let result = normalize("0xzz60");
        assert_eq!(result.instruction_count, 0);
        assert!(result.decode_warnings[0].starts_with("invalid hex"));
    }

    #[test]
    fn test_truncated_push_operand() {
        // PUSH2 with only one operand byte available
        let result = normalize("0x61ff");
        assert_eq!(result.raw_instructions, ["PUSH2"]);
        assert_eq!(result.canonical_instructions, ["PUSH"]);
        assert_eq!(result.decode_warnings.len(), 1);
        assert!(result.decode_warnings[0].contains("past code end"));
    }

    #[test]
    fn test_unknown_opcode_decoded() {
        let result = normalize("0x0c");
        assert_eq!(result.raw_instructions, ["UNKNOWN_0C"]);
        assert_eq!(result.canonical_instructions, ["UNKNOWN_0C"]);
        assert!(result.decode_warnings.is_empty());
    }

    #[test]
    fn test_push_collapse_identical_structure() {
        // Same opcode skeleton, different embedded constants
        let a = normalize("0x6001600257");
        let b = normalize("0x60ff60ee57");
        assert_eq!(a.canonical_instructions, b.canonical_instructions);
        assert_eq!(a.raw_instructions, b.raw_instructions);
    }

    #[test]
    fn test_idempotent() {
        let code = "0x6080604052348015600f57600080fd5b50";
        assert_eq!(normalize(code), normalize(code));
    }

    #[test]
    fn test_cbor_metadata_detected() {
        // 10 code bytes, then a 52-byte block: 0xA1 marker, filler, and a
        // big-endian length field of 50 in the final two bytes
        let mut bytes = hex::decode("6060604052346000600055").unwrap();
        bytes.truncate(10);
        let code_len = bytes.len();
        bytes.push(0xA1);
        bytes.extend(std::iter::repeat(0xAB).take(49));
        bytes.extend_from_slice(&[0x00, 0x32]);

        let result = normalize(&hex::encode(&bytes));
        assert!(result.metadata_detected);
        assert_eq!(result.metadata_offset, Some(code_len));
        // Only the code region is decoded
        assert!(result.instruction_count <= code_len);
        assert_eq!(result.original_byte_size, bytes.len());
    }

    #[test]
    fn test_bzzr_fallback_detected() {
        // No valid CBOR length field, but a legacy bzzr marker in the tail
        let mut bytes = vec![0x00u8; 30];
        bytes.extend_from_slice(b"bzzr0");
        bytes.extend(std::iter::repeat(0xFF).take(10));

        let offset = detect_metadata_offset(&bytes);
        assert_eq!(offset, Some(28));
    }

    #[test]
    fn test_length_field_spanning_whole_input() {
        // 43 bytes whose trailing length field reads 42: the implied
        // block would cover more than the input holds, so nothing is
        // detected and nothing underflows
        let mut bytes = vec![0x00u8; 41];
        bytes.extend_from_slice(&[0x00, 0x2A]);
        assert_eq!(detect_metadata_offset(&bytes), None);

        let result = normalize(&hex::encode(&bytes));
        assert!(!result.metadata_detected);
        assert_eq!(result.original_byte_size, 43);
    }

    #[test]
    fn test_short_input_skips_metadata_detection() {
        // Below the 43-byte minimum nothing is ever treated as metadata
        let bytes = vec![0xA1u8; 42];
        assert_eq!(detect_metadata_offset(&bytes), None);
    }

    #[test]
    fn test_canonical_string() {
        let result = normalize("0x6060604052");
        assert_eq!(result.canonical_string(), "PUSH PUSH MSTORE");
    }
}
