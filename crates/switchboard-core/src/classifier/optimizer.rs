//! Bootstrap few-shot optimizer
//!
//! Runs the uncompiled classifier over a labeled training set, keeps the
//! predictions that agree with the label as demos (reasoning included), pads
//! the program with plain labeled examples, and writes the result as an
//! artifact.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::llm::LlmClassifier;
use super::program::{CompiledProgram, Demo};
use super::TargetAgent;
use crate::error::ClassifierError;
use crate::providers::{ChatOptions, LlmProvider};

/// Temperature used for retry rounds so the model can answer differently
const RETRY_TEMPERATURE: f32 = 1.0;

/// One labeled conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub chat_history: String,
    pub target_agent: TargetAgent,
}

impl TrainingExample {
    pub fn new(chat_history: impl Into<String>, target_agent: TargetAgent) -> Self {
        Self {
            chat_history: chat_history.into(),
            target_agent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_labeled_demos: usize,
    pub max_bootstrapped_demos: usize,
    pub max_rounds: usize,
    pub max_errors: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_labeled_demos: 22,
            max_bootstrapped_demos: 22,
            max_rounds: 10,
            max_errors: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizeOutcome {
    /// An artifact already existed and overwrite was not requested
    Skipped { path: PathBuf },
    Compiled {
        path: PathBuf,
        bootstrapped: usize,
        labeled: usize,
        errors: usize,
    },
}

/// Read a training set: a JSON array of `{chat_history, target_agent}`
pub async fn load_training_set(path: &Path) -> Result<Vec<TrainingExample>, ClassifierError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let examples: Vec<TrainingExample> = serde_json::from_str(&raw)?;
    if examples.is_empty() {
        return Err(ClassifierError::EmptyTrainingSet);
    }
    Ok(examples)
}

/// Compile a classifier program from `training_set` and persist it at `path`.
///
/// Does nothing when `path` exists and `overwrite` is false. Fails without
/// touching `path` when every prediction errored or `config.max_errors`
/// predictions errored.
pub async fn optimize(
    provider: Arc<dyn LlmProvider>,
    training_set: &[TrainingExample],
    path: &Path,
    overwrite: bool,
    config: &OptimizerConfig,
) -> Result<OptimizeOutcome, ClassifierError> {
    if !overwrite && tokio::fs::try_exists(path).await? {
        info!(
            "Classifier artifact {} already exists, skipping optimization",
            path.display()
        );
        return Ok(OptimizeOutcome::Skipped {
            path: path.to_path_buf(),
        });
    }
    if training_set.is_empty() {
        return Err(ClassifierError::EmptyTrainingSet);
    }

    let student = LlmClassifier::uncompiled(provider.clone());
    let mut bootstrapped: Vec<Demo> = Vec::new();
    let mut matched: HashSet<usize> = HashSet::new();
    let mut attempts = 0usize;
    let mut errors = 0usize;
    let mut last_error: Option<ClassifierError> = None;

    info!(
        "Bootstrapping classifier demos from {} examples with {}",
        training_set.len(),
        provider.model()
    );

    'rounds: for round in 0..config.max_rounds {
        let options = if round == 0 {
            ChatOptions::json()
        } else {
            ChatOptions::json().with_temperature(RETRY_TEMPERATURE)
        };

        for (index, example) in training_set.iter().enumerate() {
            if bootstrapped.len() >= config.max_bootstrapped_demos {
                break 'rounds;
            }
            if matched.contains(&index) {
                continue;
            }

            attempts += 1;
            match student.classify_with(&example.chat_history, &options).await {
                Ok(prediction) if prediction.target == example.target_agent => {
                    matched.insert(index);
                    bootstrapped.push(Demo {
                        chat_history: example.chat_history.clone(),
                        target_agent: example.target_agent,
                        reasoning: prediction.reasoning,
                        confidence: Some(prediction.confidence),
                        augmented: true,
                    });
                }
                Ok(prediction) => {
                    debug!(
                        "Round {}: example {} predicted {}, expected {}",
                        round, index, prediction.target, example.target_agent
                    );
                }
                Err(e) => {
                    errors += 1;
                    warn!("Round {}: example {} failed: {}", round, index, e);
                    if errors >= config.max_errors {
                        return Err(ClassifierError::Backend(format!(
                            "optimization aborted after {} errors, last: {}",
                            errors, e
                        )));
                    }
                    last_error = Some(e);
                }
            }
        }

        if matched.len() == training_set.len() {
            break;
        }
    }

    if attempts > 0 && errors == attempts {
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no prediction succeeded".to_string());
        return Err(ClassifierError::Backend(format!(
            "every prediction failed during optimization: {}",
            reason
        )));
    }

    // Labeled demos only fill what bootstrapping left of the demo budget
    let labeled_budget = config.max_labeled_demos.saturating_sub(bootstrapped.len());
    let labeled: Vec<Demo> = training_set
        .iter()
        .enumerate()
        .filter(|(index, _)| !matched.contains(index))
        .take(labeled_budget)
        .map(|(_, example)| Demo {
            chat_history: example.chat_history.clone(),
            target_agent: example.target_agent,
            reasoning: None,
            confidence: None,
            augmented: false,
        })
        .collect();

    let bootstrapped_count = bootstrapped.len();
    let labeled_count = labeled.len();

    let mut demos = bootstrapped;
    demos.extend(labeled);

    let program = CompiledProgram {
        demos,
        model: Some(provider.model().to_string()),
        compiled_at: Some(Utc::now()),
        ..CompiledProgram::default()
    };
    program.save(path).await?;

    info!(
        "Compiled classifier to {}: {} bootstrapped, {} labeled demos, {} errors",
        path.display(),
        bootstrapped_count,
        labeled_count,
        errors
    );

    Ok(OptimizeOutcome::Compiled {
        path: path.to_path_buf(),
        bootstrapped: bootstrapped_count,
        labeled: labeled_count,
        errors,
    })
}
