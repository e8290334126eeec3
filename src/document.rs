//! Whole-document JSON persistence.
//!
//! Each document is rewritten in full: the new content goes to a sibling
//! `.tmp` file which is then renamed over the original, so readers only ever
//! see a complete document.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::error::PersistenceError;

/// Load a document. A missing file is `Ok(None)`.
pub async fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize `value` and atomically replace the document at `path`.
pub async fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let body = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| PersistenceError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, &body)
        .await
        .map_err(|source| PersistenceError::Write {
            path: tmp.clone(),
            source,
        })?;
    fs::rename(&tmp, path)
        .await
        .map_err(|source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "document".into());
    name.push(".tmp");
    path.with_file_name(name)
}
