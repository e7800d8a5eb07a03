use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as AnyhowContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{MessageError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Input,
    Config,
    Output,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Input => "input",
            SchemaKind::Config => "config",
            SchemaKind::Output => "output",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait SchemaValidator: Send + Sync {
    fn validate(&self, document: &Value, kind: SchemaKind) -> Result<()>;
}

/// Accepts every document.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSchemas;

impl SchemaValidator for NoSchemas {
    fn validate(&self, _document: &Value, _kind: SchemaKind) -> Result<()> {
        Ok(())
    }
}

/// Schema locations from a call envelope, relative to the task root.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchemaPaths {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl SchemaPaths {
    fn get(&self, kind: SchemaKind) -> Option<&str> {
        match kind {
            SchemaKind::Input => self.input.as_deref(),
            SchemaKind::Config => self.config.as_deref(),
            SchemaKind::Output => self.output.as_deref(),
        }
    }
}

/// Loads JSON Schema files from disk; a kind without a schema file is not validated.
#[derive(Debug, Clone)]
pub struct FsSchemaValidator {
    root: PathBuf,
    paths: SchemaPaths,
}

impl FsSchemaValidator {
    pub fn new(root: impl Into<PathBuf>, paths: SchemaPaths) -> Self {
        Self {
            root: root.into(),
            paths,
        }
    }

    fn schema_file(&self, kind: SchemaKind) -> PathBuf {
        let relative = self
            .paths
            .get(kind)
            .map(str::to_string)
            .unwrap_or_else(|| format!("schemas/{kind}.json"));
        self.root.join(relative)
    }
}

fn load_schema(path: &Path) -> anyhow::Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("unable to read schema {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON schema {}", path.display()))
}

impl SchemaValidator for FsSchemaValidator {
    fn validate(&self, document: &Value, kind: SchemaKind) -> Result<()> {
        let path = self.schema_file(kind);
        if !path.is_file() {
            debug!(schema = %path.display(), "no {kind} schema, skipping validation");
            return Ok(());
        }
        let schema = load_schema(&path)?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| anyhow!("unusable {kind} schema {}: {err}", path.display()))?;
        validator
            .validate(document)
            .map_err(|err| MessageError::Validation {
                kind,
                message: err.to_string(),
            })
    }
}
