use anyhow::{Context, Result};
use base64::Engine;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Marker returned when no valid option label can be parsed from model output.
///
/// Deliberately a string rather than an `Option`: the orchestrator tests
/// membership in the sample's option set, and the marker is never a member.
pub const INVALID_ANSWER: &str = "INVALID";

/// One multiple-choice evaluation item as loaded from the dataset
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sample {
    /// Stable identifier within the dataset
    pub id: String,
    /// Question text
    pub question: String,
    /// Valid short answer labels, in presentation order
    pub options: Vec<String>,
    /// Ground-truth label; must be one of `options`
    pub answer: String,
    /// Base64-encoded image bytes embedded in the dataset record
    #[serde(default, skip_serializing)]
    pub image_string: Option<String>,
    /// Image file relative to the run's image directory
    #[serde(default)]
    pub image_path: Option<String>,
}

impl Sample {
    /// Whether this sample carries an image at all
    pub fn has_image(&self) -> bool {
        self.image_string.is_some() || self.image_path.is_some()
    }

    /// Decode this sample's image, preferring embedded base64 over a file path.
    pub fn load_image(&self, image_dir: &str) -> Result<DynamicImage> {
        if let Some(encoded) = &self.image_string {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .with_context(|| format!("Invalid base64 image for sample {}", self.id))?;
            return image::load_from_memory(&bytes)
                .with_context(|| format!("Failed to decode embedded image for sample {}", self.id));
        }

        let relative = self
            .image_path
            .as_deref()
            .with_context(|| format!("Sample {} has no image", self.id))?;
        let path = Path::new(image_dir).join(relative);
        image::open(&path)
            .with_context(|| format!("Failed to load image: {}", path.display()))
    }
}

/// Ordered collection of samples for one run
#[derive(Debug, Clone)]
pub struct Dataset {
    pub samples: Vec<Sample>,
}

impl Dataset {
    /// Load a dataset from a JSON Lines file, one sample object per line.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;

        let mut samples = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(line).with_context(|| {
                format!("Malformed sample on line {} of {}", line_num + 1, path.display())
            })?;
            samples.push(sample);
        }

        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Output of one prompting stage: an immutable snapshot threaded through the
/// orchestrator, never mutated in place.
#[derive(Debug, Clone)]
pub struct StageRecord {
    /// Prompt sent to the backend
    pub prompt: String,
    /// Raw model output for that prompt
    pub raw_output: String,
    /// Parsed prediction, or [`INVALID_ANSWER`]
    pub pred: String,
}

/// Fully scored sample, persisted after every item.
///
/// Once built, prediction and correctness are final for the run. Raw image
/// bytes are intentionally excluded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SampleResult {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    /// Prompt for each stage that ran (one or two entries)
    pub prompts: Vec<String>,
    /// Raw output for each stage that ran
    pub raw_outputs: Vec<String>,
    /// Final prediction used for scoring
    pub pred: String,
    pub is_correct: bool,
}

impl SampleResult {
    /// Assemble the scored record from the sample and its stage snapshots.
    /// Correctness is decided by the scorer and passed in.
    pub fn from_stages(sample: &Sample, stages: Vec<StageRecord>, is_correct: bool) -> Self {
        let pred = stages
            .last()
            .map(|s| s.pred.clone())
            .unwrap_or_else(|| INVALID_ANSWER.to_string());

        Self {
            id: sample.id.clone(),
            question: sample.question.clone(),
            options: sample.options.clone(),
            answer: sample.answer.clone(),
            prompts: stages.iter().map(|s| s.prompt.clone()).collect(),
            raw_outputs: stages.iter().map(|s| s.raw_output.clone()).collect(),
            pred,
            is_correct,
        }
    }
}

/// Aggregate outcome of an evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Samples scored
    pub total: usize,
    /// Samples scored correct
    pub correct: usize,
    /// correct / total; 0.0 when nothing was scored
    pub accuracy: f64,
    /// Path the per-sample results were written to
    pub results_path: String,
}
