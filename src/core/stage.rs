//! Stage domain model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque command descriptor attached to a stage.
///
/// The engine never interprets it; it is handed to a `CommandExecutor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// A script run through the shell
    Shell(String),
    /// A program invoked directly with arguments
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Shell(script) => write!(f, "{}", script),
            CommandSpec::Exec { program, args, .. } => {
                write!(f, "{}", program)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}

/// One matrix axis: a name and its ordered values
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

/// A declared unit of pipeline work, immutable after load
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    /// Unique stage name
    pub name: String,

    /// Names of stages this stage depends on, in declaration order
    pub depends_on: Vec<String>,

    /// Matrix axes in declaration order (empty if the stage has none)
    pub matrix: Vec<MatrixAxis>,

    /// What to run
    pub command: CommandSpec,

    /// Whether a failure of this stage fails the pipeline and cancels the run
    pub critical: bool,

    /// Whether results of this stage may be reused from the cache
    pub cache: bool,

    /// Declared input paths used for fingerprinting
    pub inputs: Vec<String>,

    /// Per-job timeout
    pub timeout: Option<Duration>,
}

impl Stage {
    /// Create a critical, cacheable stage with no dependencies or axes
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            matrix: Vec::new(),
            command,
            critical: true,
            cache: true,
            inputs: Vec::new(),
            timeout: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_axis<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matrix.push(MatrixAxis {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Axis names in declaration order
    pub fn axis_names(&self) -> impl Iterator<Item = &str> {
        self.matrix.iter().map(|axis| axis.name.as_str())
    }

    /// Whether the stage declares any matrix axes
    pub fn has_matrix(&self) -> bool {
        !self.matrix.is_empty()
    }

    /// Number of jobs this stage expands to
    pub fn job_count(&self) -> usize {
        self.matrix.iter().map(|axis| axis.values.len()).product()
    }
}
