use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Knobs passed explicitly into the pipeline entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Serialized size at which a `ReplaceConfig` target is offloaded.
    pub max_inline_bytes: u64,
    /// Top-level keys removed from outgoing messages that carry a `ReplaceConfig`.
    pub stripped_keys: Vec<String>,
    pub retention: Duration,
    pub task_root: PathBuf,
    pub blob_root: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_inline_bytes: 0,
            stripped_keys: vec!["ReplaceConfig".to_string(), "task_config".to_string()],
            retention: DEFAULT_RETENTION,
            task_root: PathBuf::from("."),
            blob_root: PathBuf::from("./.cma/blobs"),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from any variable source; unset or empty variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut settings = Self::default();
        if let Some(raw) = var("CMA_MAX_INLINE_BYTES") {
            settings.max_inline_bytes = raw
                .trim()
                .parse()
                .with_context(|| format!("CMA_MAX_INLINE_BYTES must be a byte count, got `{raw}`"))?;
        }
        if let Some(raw) = var("CMA_RETENTION") {
            settings.retention = humantime::parse_duration(raw.trim())
                .with_context(|| format!("CMA_RETENTION must be a duration, got `{raw}`"))?;
        }
        if let Some(root) = var("LAMBDA_TASK_ROOT") {
            settings.task_root = PathBuf::from(root);
        }
        if let Some(root) = var("CMA_BLOB_ROOT") {
            settings.blob_root = PathBuf::from(root);
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.retention, Duration::from_secs(604_800));
    }

    #[test]
    fn variables_override_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("CMA_MAX_INLINE_BYTES", "256000"),
            ("CMA_RETENTION", "2days"),
            ("LAMBDA_TASK_ROOT", "/var/task"),
            ("CMA_BLOB_ROOT", ""),
        ]))
        .unwrap();
        assert_eq!(settings.max_inline_bytes, 256_000);
        assert_eq!(settings.retention, Duration::from_secs(2 * 86_400));
        assert_eq!(settings.task_root, PathBuf::from("/var/task"));
        assert_eq!(settings.blob_root, PathBuf::from("./.cma/blobs"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(Settings::from_lookup(lookup(&[("CMA_MAX_INLINE_BYTES", "lots")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("CMA_RETENTION", "soon")])).is_err());
    }
}
