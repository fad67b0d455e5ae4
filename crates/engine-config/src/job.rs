//! Job definitions as loaded from a job file.

use crate::settings::{
    error::SettingsError, parallel::ParallelSettings, validated::ValidatedSettings,
    validator::SettingsValidator,
};
use model::execution::{target::TargetTable, transform::TransformSpec};
use planner::query::dialect::DialectKind;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path};
use tracing::info;

pub const ENV_MAX_WORKERS: &str = "CHUNKFLOW_MAX_WORKERS";
pub const ENV_SOURCE_URL: &str = "CHUNKFLOW_SOURCE_URL";
pub const ENV_TARGET_URL: &str = "CHUNKFLOW_TARGET_URL";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub dialect: DialectKind,
    #[serde(default)]
    pub url: Option<String>,
    pub query: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TargetSpec {
    #[serde(default)]
    pub url: Option<String>,
    pub table: TargetTable,
}

/// One "source query to target table" job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub job_id: String,
    pub source: SourceSpec,
    pub target: TargetSpec,
    /// Row transforms applied between extract and load, in order.
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
    #[serde(default)]
    pub settings: ParallelSettings,
}

impl JobSpec {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let spec: JobSpec = serde_json::from_str(text)?;
        if spec.job_id.trim().is_empty() {
            return Err(SettingsError::InvalidValue {
                key: "job_id".to_string(),
                value: spec.job_id,
            });
        }
        Ok(spec)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let spec = Self::from_json(&text)?;
        info!(job_id = %spec.job_id, path = %path.display(), "Loaded job definition");
        Ok(spec)
    }

    /// Applies `CHUNKFLOW_*` overrides from `vars`.
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<(), SettingsError> {
        if let Some(raw) = vars.get(ENV_MAX_WORKERS) {
            let workers = raw.trim().parse::<usize>().map_err(|_| SettingsError::InvalidValue {
                key: ENV_MAX_WORKERS.to_string(),
                value: raw.clone(),
            })?;
            self.settings.max_workers = Some(workers);
        }
        if let Some(url) = vars.get(ENV_SOURCE_URL) {
            self.source.url = Some(url.clone());
        }
        if let Some(url) = vars.get(ENV_TARGET_URL) {
            self.target.url = Some(url.clone());
        }
        Ok(())
    }

    pub fn source_url(&self) -> Result<&str, SettingsError> {
        self.source
            .url
            .as_deref()
            .ok_or_else(|| SettingsError::MissingUrl("source".to_string()))
    }

    pub fn target_url(&self) -> Result<&str, SettingsError> {
        self.target
            .url
            .as_deref()
            .ok_or_else(|| SettingsError::MissingUrl("target".to_string()))
    }

    pub fn validate(&self) -> Result<ValidatedSettings, SettingsError> {
        SettingsValidator::new(&self.target.table).validate(&self.settings)
    }
}
