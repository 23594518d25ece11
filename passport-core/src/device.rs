//! Local device identity.
//!
//! The device identifier is derived from the OS machine id, hashed with an
//! application-specific prefix so the raw machine id never leaves the host.
//! Machines without a machine id get a random identifier persisted in the
//! data directory.

use std::path::Path;

use sha3::{Digest, Sha3_256};
use tracing::{debug, warn};
use uuid::{Builder, Uuid};

use crate::error::Result;
use crate::types::DeviceId;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];
const DEVICE_ID_FILE: &str = "device-id";
const DERIVATION_PREFIX: &[u8] = b"passport-device-id:";

impl DeviceId {
    /// Derive a stable identifier from arbitrary seed bytes.
    pub fn derive(seed: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(DERIVATION_PREFIX);
        hasher.update(seed);
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self::from(Builder::from_custom_bytes(bytes).into_uuid())
    }
}

/// Identifier derived from the OS machine id, if one is available.
pub fn machine_device_id() -> Option<DeviceId> {
    MACHINE_ID_PATHS.iter().find_map(|path| {
        let contents = std::fs::read_to_string(path).ok()?;
        let machine_id = contents.trim();
        (!machine_id.is_empty()).then(|| DeviceId::derive(machine_id.as_bytes()))
    })
}

/// Resolve this machine's identifier, falling back to one stored in `data_dir`.
pub fn resolve_device_id(data_dir: &Path) -> Result<DeviceId> {
    if let Some(id) = machine_device_id() {
        debug!(device_id = %id, "Derived device id from machine id");
        return Ok(id);
    }

    let path = data_dir.join(DEVICE_ID_FILE);
    if let Ok(contents) = std::fs::read_to_string(&path) {
        match contents.trim().parse::<DeviceId>() {
            Ok(id) => return Ok(id),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable device id file"),
        }
    }

    let id = DeviceId::from(Uuid::new_v4());
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, id.to_string())?;
    debug!(device_id = %id, path = %path.display(), "Generated device id");
    Ok(id)
}
