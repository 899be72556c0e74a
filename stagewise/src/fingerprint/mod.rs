//! Content fingerprinting for declared dependencies.
//!
//! A fingerprint is a SHA-256 digest over whatever identifies a dependency:
//! file bytes, a recursive directory manifest, or the canonical JSON
//! serialization of a parameter value. Two fingerprints are equal exactly
//! when the executor may treat the dependency as unchanged.

use crate::config::RunParameters;
use crate::errors::PipelineError;
use crate::registry::DependencyRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// A content-derived identity for a dependency at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the hex digest.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Returns an abbreviated digest for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digests a byte slice.
#[must_use]
pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Streams a file's bytes through the hash.
pub fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Digests a directory as an ordered manifest of its regular files.
///
/// Every regular file under the root is digested and the sorted list of
/// `(relative path, digest)` pairs is digested in turn, so the result is
/// invariant to traversal order but sensitive to any added, removed, or
/// modified file.
pub fn fingerprint_dir(path: &Path) -> std::io::Result<Fingerprint> {
    if !path.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("'{}' is not a directory", path.display()),
        ));
    }

    let mut manifest: Vec<(String, Fingerprint)> = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(path)
            .map_err(std::io::Error::other)?
            .to_string_lossy()
            .replace('\\', "/");
        manifest.push((relative, fingerprint_file(entry.path())?));
    }
    manifest.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, digest) in &manifest {
        hasher.update(relative.as_bytes());
        hasher.update(b"\0");
        hasher.update(digest.as_hex().as_bytes());
        hasher.update(b"\n");
    }
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Digests a path, dispatching on whether it is a file or a directory.
pub fn fingerprint_path(path: &Path) -> std::io::Result<Fingerprint> {
    if path.is_dir() {
        fingerprint_dir(path)
    } else {
        fingerprint_file(path)
    }
}

/// Serializes a JSON value canonically: object keys sorted recursively,
/// sequences order-preserving, no insignificant whitespace.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
                sorted.sort_by_key(|(key, _)| key.as_str());
                serde_json::Value::Object(
                    sorted
                        .into_iter()
                        .map(|(key, inner)| (key.clone(), canonicalize(inner)))
                        .collect(),
                )
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(canonicalize).collect())
            }
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

/// Computes fingerprints for declared dependencies against the current
/// on-disk and configuration state.
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    params: Arc<RunParameters>,
}

impl FingerprintEngine {
    /// Creates an engine bound to a configuration snapshot.
    #[must_use]
    pub fn new(params: Arc<RunParameters>) -> Self {
        Self { params }
    }

    /// Fingerprints a single dependency.
    ///
    /// A missing or unreadable file or directory is a
    /// [`PipelineError::DependencyUnavailable`] attributed to `stage`; an
    /// unknown parameter key is a configuration error.
    pub fn fingerprint(
        &self,
        stage: &str,
        dep: &DependencyRef,
    ) -> Result<Fingerprint, PipelineError> {
        match dep {
            DependencyRef::File(path) => {
                let resolved = self.params.resolve(path);
                fingerprint_file(&resolved).map_err(|e| {
                    PipelineError::dependency_unavailable(stage, dep.to_string(), e.to_string())
                })
            }
            DependencyRef::Dir(path) => {
                let resolved = self.params.resolve(path);
                fingerprint_dir(&resolved).map_err(|e| {
                    PipelineError::dependency_unavailable(stage, dep.to_string(), e.to_string())
                })
            }
            DependencyRef::Param(key) => {
                let value = self.params.param_value(key)?;
                Ok(fingerprint_bytes(canonical_json(&value).as_bytes()))
            }
        }
    }

    /// Fingerprints a produced output path, file or directory.
    pub fn fingerprint_output(&self, stage: &str, path: &Path) -> Result<Fingerprint, PipelineError> {
        let resolved = self.params.resolve(path);
        fingerprint_path(&resolved).map_err(|e| {
            PipelineError::stage_execution(
                stage,
                format!("cannot fingerprint output '{}': {e}", resolved.display()),
            )
        })
    }
}
