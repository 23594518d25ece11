//! On-disk key records for the software credential store.
//!
//! One CBOR file per username at `dir/{sha3(username)}.key`. On unix the
//! directory is owner-only (0700) and each file is 0600.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use zeroize::Zeroize;

use crate::error::{PassportError, Result};

const KEY_FILE_EXTENSION: &str = "key";

#[derive(Serialize, Deserialize)]
pub(crate) struct KeyRecord {
    pub username: String,
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

impl Drop for KeyRecord {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

pub(crate) fn key_path(dir: &Path, username: &str) -> PathBuf {
    let mut hasher = Sha3_256::new();
    hasher.update(username.as_bytes());
    let name = hex::encode(hasher.finalize());
    dir.join(format!("{name}.{KEY_FILE_EXTENSION}"))
}

/// Create the key directory, restricting it to the owner.
pub(crate) fn create_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        builder.mode(0o700);
        builder.create(dir)?;
        // an existing directory keeps its old mode otherwise
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    {
        builder.create(dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // a stale temp file keeps its old mode otherwise
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// Write `record` atomically (temp file, then rename).
pub(crate) fn write_record(dir: &Path, record: &KeyRecord) -> Result<()> {
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf)
        .map_err(|e| PassportError::SerializationError(e.to_string()))?;

    let path = key_path(dir, &record.username);
    let tmp = path.with_extension("tmp");
    let written = open_private(&tmp).and_then(|mut file| {
        file.write_all(&buf)?;
        file.sync_all()
    });
    buf.zeroize();
    written?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

pub(crate) fn read_record(path: &Path) -> Result<KeyRecord> {
    let mut bytes = std::fs::read(path)?;
    let record = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| PassportError::SerializationError(e.to_string()));
    bytes.zeroize();
    record
}

/// Remove the key file for `username`. A missing file is not an error.
pub(crate) fn delete_record(dir: &Path, username: &str) -> Result<()> {
    match std::fs::remove_file(key_path(dir, username)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Load every readable key file in `dir`. Logs and skips corrupt files.
pub(crate) fn load_all(dir: &Path) -> Result<Vec<KeyRecord>> {
    let mut records = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(KEY_FILE_EXTENSION) {
            continue;
        }
        match read_record(&path) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt key file");
            }
        }
    }
    Ok(records)
}
