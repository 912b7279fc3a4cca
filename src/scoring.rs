use crate::models::{Sample, SampleResult};

/// Exact-match correctness: the prediction must equal the ground-truth label
/// byte for byte. Near misses and case variants score zero.
pub fn is_correct(sample: &Sample, pred: &str) -> bool {
    pred == sample.answer
}

/// Running accuracy over the ordered stream of scored samples
#[derive(Debug, Default)]
pub struct ScoreAccumulator {
    outcomes: Vec<f64>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one scored sample. Sequence length tracks samples scored so far.
    pub fn record(&mut self, is_correct: bool) {
        self.outcomes.push(if is_correct { 1.0 } else { 0.0 });
    }

    /// Mean of recorded outcomes; 0.0 before anything is scored.
    pub fn accuracy(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes.iter().sum::<f64>() / self.outcomes.len() as f64
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn correct_count(&self) -> usize {
        self.outcomes.iter().filter(|&&o| o == 1.0).count()
    }

    /// Record a result and return the updated running accuracy.
    pub fn record_result(&mut self, result: &SampleResult) -> f64 {
        self.record(result.is_correct);
        self.accuracy()
    }
}
