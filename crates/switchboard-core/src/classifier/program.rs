//! Compiled classifier program and its on-disk artifact

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TargetAgent;
use crate::error::ClassifierError;

const ARTIFACT_VERSION: u32 = 1;

pub const DEFAULT_INSTRUCTIONS: &str = "\
You are the Triage agent in a multi-agent insurance support system. \
Classify the conversation and route it to the agent that should answer next.

Fallback rules:
- Route to TicketingAgent if unsure where to send an insurance-related query.
- Route to TriageAgent if the query is not insurance-related.";

/// One few-shot example shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demo {
    pub chat_history: String,
    pub target_agent: TargetAgent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// True when the demo came from a successful model prediction rather
    /// than straight from the training set
    #[serde(default)]
    pub augmented: bool,
}

/// Instructions plus few-shot demos; what `optimize` produces and `load` reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub version: u32,
    pub instructions: String,
    #[serde(default)]
    pub demos: Vec<Demo>,
    /// Model the demos were bootstrapped with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_at: Option<DateTime<Utc>>,
}

impl Default for CompiledProgram {
    /// The uncompiled zero-shot program
    fn default() -> Self {
        Self {
            version: ARTIFACT_VERSION,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            demos: Vec::new(),
            model: None,
            compiled_at: None,
        }
    }
}

impl CompiledProgram {
    pub fn bootstrapped_demos(&self) -> impl Iterator<Item = &Demo> {
        self.demos.iter().filter(|d| d.augmented)
    }

    /// Read and validate an artifact
    pub async fn load(path: &Path) -> Result<Self, ClassifierError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClassifierError::artifact(
                    path,
                    "not found (run `switchboard optimize` first)",
                ));
            }
            Err(e) => return Err(ClassifierError::artifact(path, e.to_string())),
        };

        let program: Self = serde_json::from_str(&raw)
            .map_err(|e| ClassifierError::artifact(path, format!("malformed: {}", e)))?;
        program.validate(path)?;

        debug!(
            "Loaded classifier artifact {} ({} demos)",
            path.display(),
            program.demos.len()
        );
        Ok(program)
    }

    fn validate(&self, path: &Path) -> Result<(), ClassifierError> {
        if self.version != ARTIFACT_VERSION {
            return Err(ClassifierError::artifact(
                path,
                format!("unsupported version {}", self.version),
            ));
        }
        if self.instructions.trim().is_empty() {
            return Err(ClassifierError::artifact(path, "instructions are empty"));
        }
        Ok(())
    }

    /// Write the artifact as pretty JSON, replacing any existing file
    pub async fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');

        // Write beside the target then rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
