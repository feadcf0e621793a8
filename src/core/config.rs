//! Pipeline configuration from YAML

use crate::core::{
    error::DefinitionError,
    pipeline::{Pipeline, PipelineSettings},
    stage::{CommandSpec, MatrixAxis, Stage},
};
use crate::report::gate::{FailureTolerance, GatePolicy};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Run settings
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Pass/fail policy (required)
    pub gate: GateConfig,

    /// Pipeline stages
    pub stages: Vec<StageConfig>,
}

/// Run settings as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    /// Concurrent execution slots (default: available parallelism)
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Global run timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Grace period for cancelled jobs in seconds
    #[serde(default)]
    pub cancel_grace_secs: Option<u64>,

    /// Cache lookup bound in milliseconds
    #[serde(default)]
    pub cache_lookup_timeout_ms: Option<u64>,
}

/// Gate configuration as defined in YAML
///
/// Exactly one of the two tolerance forms must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Maximum number of failed non-critical jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<usize>,

    /// Maximum percentage of failed non-critical jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failure_percent: Option<f64>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Stages this stage depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Matrix axes: ordered mapping of axis name to values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Mapping>,

    /// Command descriptor
    pub command: CommandSpec,

    /// Whether a failure fails the pipeline
    #[serde(default = "default_true")]
    pub critical: bool,

    /// Whether results may be reused from the cache
    #[serde(default = "default_true")]
    pub cache: bool,

    /// Declared input paths
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Per-job timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    ///
    /// Checks everything that can be checked per definition: unique and
    /// well-formed stage names, matrix axes, gate and settings. Dependency
    /// references and cycles belong to the graph builder.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        self.to_pipeline().map(|_| ())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, DefinitionError> {
        let mut seen_names = HashSet::new();
        let mut stages = Vec::with_capacity(self.stages.len());

        for stage_config in &self.stages {
            if !is_valid_name(&stage_config.name) {
                return Err(DefinitionError::InvalidStageName(stage_config.name.clone()));
            }
            if !seen_names.insert(stage_config.name.as_str()) {
                return Err(DefinitionError::DuplicateStage(stage_config.name.clone()));
            }
            stages.push(stage_config.to_stage()?);
        }

        Ok(Pipeline {
            name: self.name.clone(),
            stages,
            settings: self.settings.to_settings()?,
            gate: self.gate.to_policy()?,
        })
    }
}

impl StageConfig {
    fn to_stage(&self) -> Result<Stage, DefinitionError> {
        let matrix = match &self.matrix {
            Some(mapping) => parse_matrix(&self.name, mapping)?,
            None => Vec::new(),
        };

        Ok(Stage {
            name: self.name.clone(),
            depends_on: self.depends_on.clone(),
            matrix,
            command: self.command.clone(),
            critical: self.critical,
            cache: self.cache,
            inputs: self.inputs.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
        })
    }
}

impl SettingsConfig {
    fn to_settings(&self) -> Result<PipelineSettings, DefinitionError> {
        let mut settings = PipelineSettings::default();

        if let Some(max_parallel) = self.max_parallel {
            if max_parallel == 0 {
                return Err(DefinitionError::InvalidSettings(
                    "max_parallel must be at least 1".to_string(),
                ));
            }
            settings.max_parallel = max_parallel;
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.cancel_grace_secs {
            settings.cancel_grace = Duration::from_secs(secs);
        }
        if let Some(ms) = self.cache_lookup_timeout_ms {
            settings.cache_lookup_timeout = Duration::from_millis(ms);
        }

        Ok(settings)
    }
}

impl GateConfig {
    fn to_policy(&self) -> Result<GatePolicy, DefinitionError> {
        let tolerance = match (self.max_failures, self.max_failure_percent) {
            (Some(count), None) => FailureTolerance::Count(count),
            (None, Some(percent)) => {
                if !(0.0..=100.0).contains(&percent) {
                    return Err(DefinitionError::InvalidGate(format!(
                        "max_failure_percent must be between 0 and 100, got {}",
                        percent
                    )));
                }
                FailureTolerance::Percent(percent)
            }
            (Some(_), Some(_)) => {
                return Err(DefinitionError::InvalidGate(
                    "specify either max_failures or max_failure_percent, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(DefinitionError::InvalidGate(
                    "a failure tolerance is required: set max_failures or max_failure_percent"
                        .to_string(),
                ))
            }
        };

        Ok(GatePolicy::new(tolerance))
    }
}

/// Stage and axis names: ASCII letters, digits, '_', '-', '.'
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn parse_matrix(stage: &str, mapping: &Mapping) -> Result<Vec<MatrixAxis>, DefinitionError> {
    let malformed = |axis: &str, reason: &str| DefinitionError::MalformedAxis {
        stage: stage.to_string(),
        axis: axis.to_string(),
        reason: reason.to_string(),
    };

    let mut axes = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            Value::String(name) if is_valid_name(name) => name.clone(),
            Value::String(name) => return Err(malformed(name, "invalid axis name")),
            other => return Err(malformed(&format!("{:?}", other), "axis name must be a string")),
        };

        let raw_values = match value {
            Value::Sequence(values) => values,
            _ => return Err(malformed(&name, "axis values must be a list")),
        };
        if raw_values.is_empty() {
            return Err(malformed(&name, "axis has no values"));
        }

        let mut values = Vec::with_capacity(raw_values.len());
        let mut seen = HashSet::new();
        for raw in raw_values {
            let value = scalar_to_string(raw)
                .ok_or_else(|| malformed(&name, "axis values must be scalars"))?;
            if !seen.insert(value.clone()) {
                return Err(malformed(&name, &format!("duplicate value '{}'", value)));
            }
            values.push(value);
        }

        axes.push(MatrixAxis { name, values });
    }

    Ok(axes)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
