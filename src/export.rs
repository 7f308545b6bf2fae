//! Exporters for fingerprints and similarity results.
//!
//! Output targets the downstream loading pipeline: CSV shaped for
//! PostgreSQL `COPY`, JSON Lines for streaming consumers, and batched
//! SQL upserts for direct import into the `contract_similarity` table.
//! Every writer is deterministic: the same inputs produce byte-identical
//! files.

use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::similarity::SimilarityResult;

/// Rows per SQL INSERT statement.
const SQL_BATCH_SIZE: usize = 100;

/// Decimal places kept for scores in exported rows.
fn round_score(value: f64) -> f64 {
    (value * 1e10).round() / 1e10
}

/// Minimal CSV quoting: quote only when the field needs it.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Escape a string for a single-quoted SQL literal.
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render shared patterns as a PostgreSQL array literal.
fn pg_array(patterns: &[String]) -> String {
    let quoted: Vec<String> = patterns
        .iter()
        .map(|p| format!("\"{}\"", p.replace('"', "\"\"")))
        .collect();
    format!("{{{}}}", quoted.join(","))
}

/// Flat row view of a similarity result, shared by JSONL and SQL.
#[derive(Serialize)]
struct SimilarityRow<'a> {
    contract_address: &'a str,
    matched_address: &'a str,
    similarity_score: f64,
    ngram_similarity: f64,
    control_flow_similarity: f64,
    shape_similarity: f64,
    similarity_type: &'a str,
    confidence_score: u8,
    explanation: &'a str,
    shared_patterns: &'a [String],
}

impl<'a> SimilarityRow<'a> {
    fn from_result(result: &'a SimilarityResult) -> Self {
        Self {
            contract_address: &result.subject_id,
            matched_address: &result.matched_id,
            similarity_score: round_score(result.overall_score),
            ngram_similarity: round_score(result.ngram_score),
            control_flow_similarity: round_score(result.control_flow_score),
            shape_similarity: round_score(result.shape_score),
            similarity_type: result.category.as_str(),
            confidence_score: result.confidence_percent,
            explanation: &result.explanation,
            shared_patterns: &result.shared_patterns,
        }
    }
}

/// Header row of `bytecode_analysis.csv`.
const FINGERPRINT_HEADER: &str = "contract_address,opcode_count,unique_opcode_count,jump_count,\
jumpdest_count,branch_density,storage_ops_count,call_ops_count,heuristic_has_loops,\
heuristic_loop_count,opcode_trigram_hash,opcode_quadgram_hash,opcode_pentagram_hash,\
control_flow_signature,shape_signature,opcode_trigrams";

/// Render fingerprints as CSV matching the `bytecode_analysis` schema.
/// The n-gram count map is embedded as one JSON blob column.
pub fn fingerprints_to_csv(fingerprints: &[Fingerprint]) -> String {
    let mut out = String::new();
    out.push_str(FINGERPRINT_HEADER);
    out.push('\n');

    for fp in fingerprints {
        let trigram_blob = serde_json::to_string(&fp.trigram_counts).unwrap_or_default();
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            csv_field(&fp.identity),
            fp.instruction_count,
            fp.unique_mnemonic_count,
            fp.jump_count,
            fp.jumpdest_count,
            round_score(fp.branch_density),
            fp.storage_read_count + fp.storage_write_count,
            fp.external_call_count,
            fp.estimated_loop_count > 0,
            fp.estimated_loop_count,
            fp.trigram_hash,
            fp.quadgram_hash,
            fp.pentagram_hash,
            fp.control_flow_signature,
            fp.shape_signature,
            csv_field(&trigram_blob),
        );
    }
    out
}

/// Header row of `contract_similarity.csv`.
const SIMILARITY_HEADER: &str = "contract_address,matched_address,similarity_score,\
ngram_similarity,control_flow_similarity,shape_similarity,similarity_type,confidence_score,\
explanation,shared_patterns";

/// Render similarity results as CSV matching the `contract_similarity`
/// schema. `shared_patterns` becomes a PostgreSQL array literal.
pub fn similarities_to_csv(results: &[SimilarityResult]) -> String {
    let mut out = String::new();
    out.push_str(SIMILARITY_HEADER);
    out.push('\n');

    for result in results {
        let row = SimilarityRow::from_result(result);
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{}",
            csv_field(row.contract_address),
            csv_field(row.matched_address),
            row.similarity_score,
            row.ngram_similarity,
            row.control_flow_similarity,
            row.shape_similarity,
            row.similarity_type,
            row.confidence_score,
            csv_field(row.explanation),
            csv_field(&pg_array(row.shared_patterns)),
        );
    }
    out
}

/// Render similarity results as JSON Lines, one object per row.
pub fn similarities_to_jsonl(results: &[SimilarityResult]) -> Result<String> {
    let mut out = String::new();
    for result in results {
        let row = SimilarityRow::from_result(result);
        let line = serde_json::to_string(&row)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Render similarity results as batched `INSERT ... ON CONFLICT` upserts
/// for the `contract_similarity` table.
pub fn similarities_to_sql(results: &[SimilarityResult]) -> String {
    let mut out = String::new();
    out.push_str("-- Generated by the bytecode similarity pipeline\n");
    out.push_str("-- Import with: psql $DATABASE_URL -f this_file.sql\n\n");
    out.push_str("BEGIN;\n\n");

    for batch in results.chunks(SQL_BATCH_SIZE) {
        out.push_str("INSERT INTO contract_similarity (\n");
        out.push_str("  contract_address, matched_address, similarity_score,\n");
        out.push_str("  ngram_similarity, control_flow_similarity, shape_similarity,\n");
        out.push_str("  similarity_type, confidence_score, explanation, shared_patterns\n");
        out.push_str(") VALUES\n");

        let values: Vec<String> = batch
            .iter()
            .map(|result| {
                let row = SimilarityRow::from_result(result);
                let patterns = if row.shared_patterns.is_empty() {
                    "ARRAY[]::TEXT[]".to_string()
                } else {
                    let items: Vec<String> =
                        row.shared_patterns.iter().map(|p| sql_string(p)).collect();
                    format!("ARRAY[{}]::TEXT[]", items.join(","))
                };
                format!(
                    "  ({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
                    sql_string(row.contract_address),
                    sql_string(row.matched_address),
                    row.similarity_score,
                    row.ngram_similarity,
                    row.control_flow_similarity,
                    row.shape_similarity,
                    sql_string(row.similarity_type),
                    row.confidence_score,
                    sql_string(row.explanation),
                    patterns,
                )
            })
            .collect();
        out.push_str(&values.join(",\n"));

        out.push_str("\nON CONFLICT (contract_address, matched_address) DO UPDATE SET\n");
        out.push_str("  similarity_score = EXCLUDED.similarity_score,\n");
        out.push_str("  ngram_similarity = EXCLUDED.ngram_similarity,\n");
        out.push_str("  control_flow_similarity = EXCLUDED.control_flow_similarity,\n");
        out.push_str("  shape_similarity = EXCLUDED.shape_similarity,\n");
        out.push_str("  similarity_type = EXCLUDED.similarity_type,\n");
        out.push_str("  confidence_score = EXCLUDED.confidence_score,\n");
        out.push_str("  explanation = EXCLUDED.explanation,\n");
        out.push_str("  shared_patterns = EXCLUDED.shared_patterns;\n\n");
    }

    out.push_str("COMMIT;\n");
    out
}

/// Writes every export format into one output directory.
#[derive(Debug, Clone)]
pub struct SimilarityExporter {
    output_dir: PathBuf,
}

impl SimilarityExporter {
    /// Create an exporter targeting `output_dir` (created if missing).
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// Export fingerprints and similarities in every format, returning
    /// `(label, path)` pairs for each file written.
    pub fn export_all(
        &self,
        fingerprints: &[Fingerprint],
        results: &[SimilarityResult],
    ) -> Result<Vec<(String, PathBuf)>> {
        let mut outputs = Vec::new();

        let fp_path = self.output_dir.join("bytecode_analysis.csv");
        fs::write(&fp_path, fingerprints_to_csv(fingerprints))?;
        outputs.push(("fingerprints_csv".to_string(), fp_path));

        let csv_path = self.output_dir.join("contract_similarity.csv");
        fs::write(&csv_path, similarities_to_csv(results))?;
        outputs.push(("similarities_csv".to_string(), csv_path));

        let jsonl_path = self.output_dir.join("contract_similarity.jsonl");
        fs::write(&jsonl_path, similarities_to_jsonl(results)?)?;
        outputs.push(("similarities_jsonl".to_string(), jsonl_path));

        let sql_path = self.output_dir.join("contract_similarity.sql");
        fs::write(&sql_path, similarities_to_sql(results))?;
        outputs.push(("similarities_sql".to_string(), sql_path));

        tracing::info!(
            files = outputs.len(),
            dir = %self.output_dir.display(),
            "export complete"
        );
        Ok(outputs)
    }

    /// The directory this exporter writes into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
