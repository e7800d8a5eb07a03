use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use humantime::{format_rfc3339, parse_rfc3339};
use tracing::debug;

use super::BlobStore;

/// Blob store laid out on disk as `<root>/<bucket>/<key>`, with each object's
/// expiry kept beside it in `<key>.expires` as an RFC 3339 timestamp.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

fn check_relative(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("empty {label}");
    }
    let path = Path::new(value);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        bail!("{label} `{value}` must stay inside the store");
    }
    Ok(())
}

fn sidecar(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".expires");
    PathBuf::from(name)
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        check_relative("bucket", bucket)?;
        check_relative("key", key)?;
        Ok(self.root.join(bucket).join(key))
    }

    /// Expiry recorded for an object, if it has one.
    pub fn expiry(&self, bucket: &str, key: &str) -> Result<Option<SystemTime>> {
        let marker = sidecar(&self.object_path(bucket, key)?);
        if !marker.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&marker)
            .with_context(|| format!("unable to read {}", marker.display()))?;
        let expires = parse_rfc3339(text.trim())
            .with_context(|| format!("invalid expiry in {}", marker.display()))?;
        Ok(Some(expires))
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        if !path.is_file() {
            return Err(anyhow!("NoSuchKey: {bucket}/{key}"));
        }
        if let Some(expires) = self.expiry(bucket, key)? {
            if expires <= SystemTime::now() {
                return Err(anyhow!("NoSuchKey: {bucket}/{key} expired"));
            }
        }
        debug!(path = %path.display(), "reading blob");
        fs::read(&path).with_context(|| format!("unable to read {}", path.display()))
    }

    fn put(&self, bucket: &str, key: &str, body: &[u8], expires: SystemTime) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("unable to create {}", parent.display()))?;
        }
        fs::write(&path, body).with_context(|| format!("unable to write {}", path.display()))?;
        let marker = sidecar(&path);
        fs::write(&marker, format_rfc3339(expires).to_string())
            .with_context(|| format!("unable to write {}", marker.display()))?;
        debug!(path = %path.display(), bytes = body.len(), "stored blob");
        Ok(())
    }
}
