use crate::config::PromptConfig;
use crate::models::{Sample, INVALID_ANSWER};
use anyhow::{bail, Result};

/// Known prompt strategy names, used for selection and error messages
const PROMPTER_NAMES: &[&str] = &["cot_multi_extract"];

/// Builds zero-shot and extraction prompts and parses free-text answers
/// into option labels.
#[derive(Debug, Clone)]
pub struct Prompter {
    /// Ask for reasoning before the final answer instead of a bare label
    pub prevent_direct_answer: bool,
    /// Solicit an image description before answering
    pub use_describe_image_prompt: bool,
}

/// Look up a prompt strategy by name, failing fast on unknown names.
pub fn select_prompter(config: &PromptConfig) -> Result<Prompter> {
    match config.name.as_str() {
        "cot_multi_extract" => Ok(Prompter {
            prevent_direct_answer: config.prevent_direct_answer,
            use_describe_image_prompt: config.use_describe_image_prompt,
        }),
        other => bail!(
            "Unknown prompt strategy: {}. Choose from {:?}",
            other,
            PROMPTER_NAMES
        ),
    }
}

impl Prompter {
    /// Build the zero-shot prompt for the first stage.
    ///
    /// Deterministic over the sample's question and options plus the two
    /// configured toggles.
    pub fn build_initial_prompt(&self, sample: &Sample) -> String {
        let mut parts = Vec::new();

        if self.use_describe_image_prompt {
            parts.push("First, describe the image in detail.".to_string());
        }

        parts.push(format!("Question: {}", sample.question));
        parts.push(format!("Options: {}", sample.options.join(", ")));

        if self.prevent_direct_answer {
            parts.push(
                "Explain your reasoning step by step before stating the final answer."
                    .to_string(),
            );
        }
        parts.push("Answer with one of the given options.".to_string());

        parts.join("\n")
    }

    /// Build the follow-up prompt that forces the model to restate its choice
    /// as exactly one valid option label.
    pub fn build_extraction_prompt(&self, sample: &Sample, first_raw_output: &str) -> String {
        format!(
            "Question: {}\nOptions: {}\n\nModel response:\n{}\n\nBased on the response above, \
             reply with exactly one of the options and nothing else.",
            sample.question,
            sample.options.join(", "),
            first_raw_output
        )
    }

    /// Scan raw model output for the first occurrence of a valid option label.
    ///
    /// Matching is case-insensitive and tolerant of common wrappers such as
    /// "(A)", "A.", "A)" and "A:". Returns [`INVALID_ANSWER`] when no option
    /// can be identified; never panics, never invents a label.
    pub fn parse_answer(&self, raw_text: &str, options: &[String]) -> String {
        let text = raw_text.trim();
        if text.is_empty() || options.is_empty() {
            return INVALID_ANSWER.to_string();
        }

        // A trimmed output that is exactly one option wins outright.
        for option in options {
            if text.eq_ignore_ascii_case(option) {
                return option.clone();
            }
        }

        // Otherwise take the option whose delimited occurrence appears first.
        let mut best: Option<(usize, &String)> = None;
        for option in options {
            if let Some(pos) = find_delimited(text, option) {
                match best {
                    Some((best_pos, _)) if best_pos <= pos => {}
                    _ => best = Some((pos, option)),
                }
            }
        }

        match best {
            Some((_, option)) => option.clone(),
            None => INVALID_ANSWER.to_string(),
        }
    }
}

/// Find the byte offset of `label` in `text`, case-insensitively, requiring
/// non-alphanumeric characters (or text boundaries) on both sides so that
/// option "A" does not match inside "Apple".
fn find_delimited(text: &str, label: &str) -> Option<usize> {
    if label.is_empty() {
        return None;
    }
    let haystack = text.to_lowercase();
    let needle = label.to_lowercase();

    let mut search_from = 0;
    while let Some(offset) = haystack[search_from..].find(&needle) {
        let start = search_from + offset;
        let end = start + needle.len();

        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);

        if before_ok && after_ok {
            return Some(start);
        }
        search_from = end;
    }
    None
}
