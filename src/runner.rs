use crate::backend::{invoke, select_backend, ModelBackend};
use crate::config::{Config, RetryPolicy};
use crate::models::{Dataset, RunSummary, Sample, SampleResult, StageRecord};
use crate::output::write_results;
use crate::prompting::{select_prompter, Prompter};
use crate::scoring::{is_correct, ScoreAccumulator};
use anyhow::{Context, Result};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::info;

/// Drives the two-stage evaluation loop over a dataset.
///
/// Samples are processed strictly one at a time; the backend is invoked at
/// most twice per sample (initial prompt, then the extraction fallback when
/// the first answer does not parse to a valid option).
#[derive(Debug)]
pub struct Runner {
    config: Config,
    prompter: Prompter,
    backend: Box<dyn ModelBackend>,
    policy: RetryPolicy,
    scores: ScoreAccumulator,
}

impl Runner {
    /// Build a runner from the run configuration.
    ///
    /// Backend and prompt-strategy selection happen here so that an invalid
    /// name fails before any sample is processed.
    pub fn new(config: Config) -> Result<Self> {
        let prompter = select_prompter(&config.prompt)?;
        let backend = select_backend(&config.model)?;
        let policy = RetryPolicy::from(&config.retry);

        Ok(Self {
            config,
            prompter,
            backend,
            policy,
            scores: ScoreAccumulator::new(),
        })
    }

    /// Where the per-sample results land: {output_dir}/{data_stem}/{model}/{prompt}.jsonl
    pub fn results_path(&self) -> PathBuf {
        let stem = Path::new(&self.config.data_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());

        Path::new(&self.config.output_dir)
            .join(stem)
            .join(&self.config.model.name)
            .join(format!("{}.jsonl", self.config.prompt.name))
    }

    /// Evaluate every sample in order, persisting the accumulated results
    /// after each one.
    pub async fn run(&mut self, dataset: &Dataset) -> Result<RunSummary> {
        let results_path = self.results_path();
        info!(path = %results_path.display(), "Writing results");

        let progress = create_progress_bar(dataset.len() as u64);
        let mut results: Vec<SampleResult> = Vec::with_capacity(dataset.len());

        for sample in &dataset.samples {
            let result = self
                .evaluate_sample(sample)
                .await
                .with_context(|| format!("Failed to evaluate sample {}", sample.id))?;

            let accuracy = self.scores.record_result(&result);
            info!(
                id = %result.id,
                pred = %result.pred,
                correct = result.is_correct,
                accuracy,
                "Sample scored"
            );

            results.push(result);
            write_results(&results_path, &results)?;

            progress.set_message(format!("accuracy {:.3}", accuracy));
            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(RunSummary {
            total: self.scores.len(),
            correct: self.scores.correct_count(),
            accuracy: self.scores.accuracy(),
            results_path: results_path.to_string_lossy().to_string(),
        })
    }

    /// Run the per-sample state machine: prompt, parse, and fall back to one
    /// extraction round when the answer is not a valid option.
    async fn evaluate_sample(&mut self, sample: &Sample) -> Result<SampleResult> {
        let image = self.materialize_image(sample)?;

        let first = self
            .run_stage(self.prompter.build_initial_prompt(sample), sample, image.as_ref())
            .await?;

        let stages = if sample.options.contains(&first.pred) {
            vec![first]
        } else {
            // Same image, one extraction round; the second parse is final.
            let extraction_prompt = self.prompter.build_extraction_prompt(sample, &first.raw_output);
            let second = self.run_stage(extraction_prompt, sample, image.as_ref()).await?;
            vec![first, second]
        };

        let pred = stages.last().map(|s| s.pred.as_str()).unwrap_or_default();
        let correct = is_correct(sample, pred);
        Ok(SampleResult::from_stages(sample, stages, correct))
    }

    /// One prompting stage: invoke the backend and parse the output.
    async fn run_stage(
        &mut self,
        prompt: String,
        sample: &Sample,
        image: Option<&DynamicImage>,
    ) -> Result<StageRecord> {
        let raw_output = invoke(self.backend.as_mut(), &self.policy, &prompt, image).await?;
        let pred = self.prompter.parse_answer(&raw_output, &sample.options);

        Ok(StageRecord {
            prompt,
            raw_output,
            pred,
        })
    }

    /// Decode the sample's image once per sample. Text-only samples and
    /// text-only backends pass through with no image, skipping the decode.
    fn materialize_image(&self, sample: &Sample) -> Result<Option<DynamicImage>> {
        if !sample.has_image() || !self.backend.supports_vision() {
            return Ok(None);
        }
        Ok(Some(sample.load_image(&self.config.image_dir)?))
    }
}

/// Progress bar carrying the running accuracy in its message slot.
fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );
    pb
}
