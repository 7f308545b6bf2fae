//! Bytecode Similarity CLI
//!
//! Batch tool for scoring structural similarity across an EVM bytecode
//! corpus and exporting the results.

use anyhow::Context;
use bytecode_similarity::{
    analyze_corpus, records_from_json, CorpusAnalysis, ScoreOptions, SimilarityCategory,
    SimilarityExporter,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Deterministic structural similarity analysis for EVM bytecode.
///
/// Reads a JSON array of contract records, fingerprints every usable
/// record, scores all pairs, and writes CSV/JSONL/SQL exports.
#[derive(Parser, Debug)]
#[command(name = "bytecode-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input JSON file: an array of objects with address and bytecode fields
    #[arg(required = true)]
    input: PathBuf,

    /// Directory for exported result files
    #[arg(short, long, default_value = "similarity_output")]
    output: PathBuf,

    /// Minimum overall score a pair must reach to be retained (0.0 - 1.0)
    #[arg(short, long, default_value = "0.55")]
    threshold: f64,

    /// Maximum retained matches per subject
    #[arg(short, long, default_value = "10")]
    max_matches: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only output essential info)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging if verbose
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("bytecode_similarity=debug")
            .init();
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let (records, parse_report) = records_from_json(&json)?;

    if !args.quiet && parse_report.skipped > 0 {
        eprintln!(
            "Warning: {} of {} records could not be parsed",
            parse_report.skipped, parse_report.processed
        );
    }

    let mut options = ScoreOptions::new();
    options.threshold = args.threshold;
    options.max_matches_per_subject = args.max_matches;

    let quiet = args.quiet;
    let progress = move |done: u64, total: u64| {
        if !quiet {
            eprintln!("  scored {done}/{total} pairs");
        }
    };

    let analysis = analyze_corpus(&records, &options, Some(&progress))?;

    let exporter = SimilarityExporter::new(&args.output)?;
    let outputs = exporter.export_all(&analysis.fingerprints, &analysis.results)?;

    if args.quiet {
        println!(
            "{} fingerprints, {} matches",
            analysis.fingerprints.len(),
            analysis.results.len()
        );
    } else {
        print_summary(&analysis, args.threshold);
        println!("Exported files:");
        for (label, path) in &outputs {
            println!("  {}: {}", label, path.display());
        }
    }

    Ok(())
}

fn print_summary(analysis: &CorpusAnalysis, threshold: f64) {
    println!("Corpus:");
    println!("  Records:      {}", analysis.report.processed);
    println!("  Fingerprints: {}", analysis.report.fingerprinted);
    println!("  Skipped:      {}", analysis.report.skipped);
    println!();
    println!("Similarity (threshold {threshold:.2}):");
    println!("  Retained pairs: {}", analysis.results.len());

    for category in [
        SimilarityCategory::NearIdenticalCopy,
        SimilarityCategory::StructuralVariant,
        SimilarityCategory::SimilarPattern,
        SimilarityCategory::WeakMatch,
    ] {
        let count = analysis
            .results
            .iter()
            .filter(|r| r.category == category)
            .count();
        println!("  {:<15} {}", format!("{category}:"), count);
    }

    let strongest = analysis
        .results
        .iter()
        .max_by(|a, b| a.overall_score.total_cmp(&b.overall_score));
    if let Some(top) = strongest {
        println!();
        println!(
            "  Strongest: {} ~ {} ({:.1}%)",
            top.subject_id,
            top.matched_id,
            top.overall_score * 100.0
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["bytecode-sim", "contracts.json"]).unwrap();
        assert_eq!(args.input, PathBuf::from("contracts.json"));
        assert_eq!(args.threshold, 0.55);
        assert_eq!(args.max_matches, 10);
        assert!(!args.verbose);
    }

    #[test]
    fn test_threshold_option() {
        let args =
            Args::try_parse_from(["bytecode-sim", "-t", "0.85", "contracts.json"]).unwrap();
        assert_eq!(args.threshold, 0.85);
    }

    #[test]
    fn test_output_option() {
        let args =
            Args::try_parse_from(["bytecode-sim", "-o", "results", "contracts.json"]).unwrap();
        assert_eq!(args.output, PathBuf::from("results"));
    }
}
