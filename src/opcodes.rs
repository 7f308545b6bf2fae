//! EVM opcode decode table.
//!
//! Static mapping from opcode byte to mnemonic and operand length,
//! covering the opcode set as it existed through the Constantinople and
//! Istanbul forks. This table is reference data for the normalizer:
//! PUSH1..PUSH32 declare how many trailing bytes are operand data rather
//! than further instructions, so a correct decode walk depends on it.
//!
//! The table is built exactly once per process and is read-only after
//! construction.

use std::sync::OnceLock;

/// Canonical marker every PUSHn collapses to in normalized streams.
pub const PUSH_MARKER: &str = "PUSH";

/// A single opcode table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeEntry {
    /// Mnemonic as rendered in instruction streams (e.g. `PUSH2`, `DUP7`).
    pub mnemonic: String,
    /// Number of operand bytes that follow the opcode byte.
    pub operand_len: usize,
}

impl OpcodeEntry {
    fn new(mnemonic: &str, operand_len: usize) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            operand_len,
        }
    }
}

/// Immutable byte -> entry mapping for all 256 opcode values.
///
/// Bytes with no assigned opcode hold `None`; [`decode`] maps those to a
/// synthetic `UNKNOWN_<hex>` mnemonic so decoding never aborts.
#[derive(Debug)]
pub struct OpcodeTable {
    entries: Vec<Option<OpcodeEntry>>,
}

impl OpcodeTable {
    /// Look up the entry for an opcode byte, if one is assigned.
    pub fn lookup(&self, byte: u8) -> Option<&OpcodeEntry> {
        self.entries[byte as usize].as_ref()
    }

    /// Number of assigned opcode bytes.
    pub fn assigned_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// Decode a single opcode byte into `(mnemonic, operand_len)`.
///
/// Unassigned bytes yield `UNKNOWN_<hex>` with zero operand bytes, so the
/// caller never has to special-case gaps in the opcode space.
pub fn decode(byte: u8) -> (String, usize) {
    match table().lookup(byte) {
        Some(entry) => (entry.mnemonic.clone(), entry.operand_len),
        None => (format!("UNKNOWN_{byte:02X}"), 0),
    }
}

/// Process-wide opcode table, built on first use.
pub fn table() -> &'static OpcodeTable {
    static TABLE: OnceLock<OpcodeTable> = OnceLock::new();
    TABLE.get_or_init(build_opcode_table)
}

/// Build the full opcode table.
///
/// The bulk families (32 PUSH widths, 16 DUPs, 16 SWAPs) are generated in
/// loops rather than listed out; everything else is a literal entry.
fn build_opcode_table() -> OpcodeTable {
    let mut entries: Vec<Option<OpcodeEntry>> = (0..256).map(|_| None).collect();

    let mut set = |byte: u8, mnemonic: &str, operand_len: usize| {
        entries[byte as usize] = Some(OpcodeEntry::new(mnemonic, operand_len));
    };

    // Stop and arithmetic
    set(0x00, "STOP", 0);
    set(0x01, "ADD", 0);
    set(0x02, "MUL", 0);
    set(0x03, "SUB", 0);
    set(0x04, "DIV", 0);
    set(0x05, "SDIV", 0);
    set(0x06, "MOD", 0);
    set(0x07, "SMOD", 0);
    set(0x08, "ADDMOD", 0);
    set(0x09, "MULMOD", 0);
    set(0x0A, "EXP", 0);
    set(0x0B, "SIGNEXTEND", 0);

    // Comparison and bitwise logic
    set(0x10, "LT", 0);
    set(0x11, "GT", 0);
    set(0x12, "SLT", 0);
    set(0x13, "SGT", 0);
    set(0x14, "EQ", 0);
    set(0x15, "ISZERO", 0);
    set(0x16, "AND", 0);
    set(0x17, "OR", 0);
    set(0x18, "XOR", 0);
    set(0x19, "NOT", 0);
    set(0x1A, "BYTE", 0);
    set(0x1B, "SHL", 0);
    set(0x1C, "SHR", 0);
    set(0x1D, "SAR", 0);

    set(0x20, "SHA3", 0);

    // Environmental information
    set(0x30, "ADDRESS", 0);
    set(0x31, "BALANCE", 0);
    set(0x32, "ORIGIN", 0);
    set(0x33, "CALLER", 0);
    set(0x34, "CALLVALUE", 0);
    set(0x35, "CALLDATALOAD", 0);
    set(0x36, "CALLDATASIZE", 0);
    set(0x37, "CALLDATACOPY", 0);
    set(0x38, "CODESIZE", 0);
    set(0x39, "CODECOPY", 0);
    set(0x3A, "GASPRICE", 0);
    set(0x3B, "EXTCODESIZE", 0);
    set(0x3C, "EXTCODECOPY", 0);
    set(0x3D, "RETURNDATASIZE", 0);
    set(0x3E, "RETURNDATACOPY", 0);
    set(0x3F, "EXTCODEHASH", 0);

    // Block information
    set(0x40, "BLOCKHASH", 0);
    set(0x41, "COINBASE", 0);
    set(0x42, "TIMESTAMP", 0);
    set(0x43, "NUMBER", 0);
    set(0x44, "DIFFICULTY", 0);
    set(0x45, "GASLIMIT", 0);
    set(0x46, "CHAINID", 0);
    set(0x47, "SELFBALANCE", 0);

    // Stack, memory, storage and flow
    set(0x50, "POP", 0);
    set(0x51, "MLOAD", 0);
    set(0x52, "MSTORE", 0);
    set(0x53, "MSTORE8", 0);
    set(0x54, "SLOAD", 0);
    set(0x55, "SSTORE", 0);
    set(0x56, "JUMP", 0);
    set(0x57, "JUMPI", 0);
    set(0x58, "PC", 0);
    set(0x59, "MSIZE", 0);
    set(0x5A, "GAS", 0);
    set(0x5B, "JUMPDEST", 0);

    // PUSH1..PUSH32: 0x60 + i pushes i+1 operand bytes
    for i in 0..32u8 {
        set(0x60 + i, &format!("PUSH{}", i + 1), usize::from(i) + 1);
    }

    // DUP1..DUP16 and SWAP1..SWAP16: distinct zero-operand mnemonics so
    // the decoder never special-cases stack shuffles
    for i in 0..16u8 {
        set(0x80 + i, &format!("DUP{}", i + 1), 0);
        set(0x90 + i, &format!("SWAP{}", i + 1), 0);
    }

    // Logging
    set(0xA0, "LOG0", 0);
    set(0xA1, "LOG1", 0);
    set(0xA2, "LOG2", 0);
    set(0xA3, "LOG3", 0);
    set(0xA4, "LOG4", 0);

    // System operations
    set(0xF0, "CREATE", 0);
    set(0xF1, "CALL", 0);
    set(0xF2, "CALLCODE", 0);
    set(0xF3, "RETURN", 0);
    set(0xF4, "DELEGATECALL", 0);
    set(0xF5, "CREATE2", 0);
    set(0xFA, "STATICCALL", 0);
    set(0xFD, "REVERT", 0);
    set(0xFE, "INVALID", 0);
    set(0xFF, "SELFDESTRUCT", 0);

    OpcodeTable { entries }
}

/// Check whether a mnemonic is a width-specific PUSH (PUSH1..PUSH32).
pub fn is_push(mnemonic: &str) -> bool {
    mnemonic
        .strip_prefix("PUSH")
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=32).contains(&n))
}

/// Check whether a mnemonic makes an external call or deploys code.
pub fn is_call_family(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "CALL" | "CALLCODE" | "DELEGATECALL" | "STATICCALL" | "CREATE" | "CREATE2"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_opcodes() {
        let (m, len) = decode(0x00);
        assert_eq!(m, "STOP");
        assert_eq!(len, 0);

        let (m, len) = decode(0x52);
        assert_eq!(m, "MSTORE");
        assert_eq!(len, 0);
    }

    #[test]
    fn test_push_family() {
        let (m, len) = decode(0x60);
        assert_eq!(m, "PUSH1");
        assert_eq!(len, 1);

        let (m, len) = decode(0x7F);
        assert_eq!(m, "PUSH32");
        assert_eq!(len, 32);
    }

    #[test]
    fn test_dup_swap_families() {
        assert_eq!(decode(0x80), ("DUP1".to_string(), 0));
        assert_eq!(decode(0x8F), ("DUP16".to_string(), 0));
        assert_eq!(decode(0x90), ("SWAP1".to_string(), 0));
        assert_eq!(decode(0x9F), ("SWAP16".to_string(), 0));
    }

    #[test]
    fn test_unknown_byte() {
        let (m, len) = decode(0x0C);
        assert_eq!(m, "UNKNOWN_0C");
        assert_eq!(len, 0);

        let (m, _) = decode(0xEF);
        assert_eq!(m, "UNKNOWN_EF");
    }

    #[test]
    fn test_assigned_count() {
        // 78 literal entries + 32 PUSH + 16 DUP + 16 SWAP
        assert_eq!(table().assigned_count(), 142);
    }

    #[test]
    fn test_is_push() {
        assert!(is_push("PUSH1"));
        assert!(is_push("PUSH32"));
        assert!(!is_push("PUSH"));
        assert!(!is_push("PUSH33"));
        assert!(!is_push("PUSH0"));
        assert!(!is_push("MSTORE"));
    }

    #[test]
    fn test_is_call_family() {
        assert!(is_call_family("CALL"));
        assert!(is_call_family("DELEGATECALL"));
        assert!(is_call_family("CREATE2"));
        assert!(!is_call_family("JUMP"));
        assert!(!is_call_family("RETURN"));
    }
}
