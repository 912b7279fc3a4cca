use crate::models::{RunSummary, SampleResult};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output format options
#[derive(Debug, Clone, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Rewrite the full result file: one JSON object per scored sample.
///
/// Called after every sample, so an interrupted run loses at most the
/// in-flight item. Raw image bytes never reach this file.
pub fn write_results(path: &Path, results: &[SampleResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut content = String::new();
    for result in results {
        let line = serde_json::to_string(result).context("Failed to serialize sample result")?;
        content.push_str(&line);
        content.push('\n');
    }

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write results to: {}", path.display()))
}

/// Print the run summary in the specified format
pub fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(summary),
        OutputFormat::Json => print_json(summary),
    }
}

fn print_plain(summary: &RunSummary) {
    println!("Samples scored: {}", summary.total);
    println!("Correct:        {}", summary.correct);
    println!("Accuracy:       {:.3}", summary.accuracy);
    println!("Results:        {}", summary.results_path);
}

fn print_json(summary: &RunSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing summary to JSON: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_result(id: &str, is_correct: bool) -> SampleResult {
        SampleResult {
            id: id.to_string(),
            question: "Which option?".to_string(),
            options: vec!["A".to_string(), "B".to_string()],
            answer: "A".to_string(),
            prompts: vec!["prompt one".to_string()],
            raw_outputs: vec!["raw one".to_string()],
            pred: if is_correct { "A" } else { "B" }.to_string(),
            is_correct,
        }
    }

    #[test]
    fn test_write_results_jsonl() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("results.jsonl");

        let results = vec![make_result("q1", true), make_result("q2", false)];
        write_results(&path, &results).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: SampleResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.id, "q1");
        assert!(first.is_correct);
    }

    #[test]
    fn test_write_results_creates_nested_directories() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir
            .path()
            .join("science_qa")
            .join("openai_vision")
            .join("cot_multi_extract.jsonl");

        write_results(&path, &[make_result("q1", true)]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_write_results_full_rewrite() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("results.jsonl");

        write_results(&path, &[make_result("q1", true)]).unwrap();
        write_results(&path, &[make_result("q1", true), make_result("q2", false)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        // Shrinking rewrites must not leave stale lines behind
        write_results(&path, &[make_result("q3", true)]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("q3"));
    }

    #[test]
    fn test_write_results_empty() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("results.jsonl");

        write_results(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_print_summary_both_formats() {
        let summary = RunSummary {
            total: 5,
            correct: 3,
            accuracy: 0.6,
            results_path: "outputs/results.jsonl".to_string(),
        };
        print_summary(&summary, OutputFormat::Plain);
        print_summary(&summary, OutputFormat::Json);
    }
}
