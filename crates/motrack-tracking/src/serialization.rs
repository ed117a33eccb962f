//! Tracking document persistence with versioning and migration.

use motrack_core::{MotrackError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::Tracking;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Versioned tracking file wrapper.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackingFile {
    pub version: u32,
    pub tracking: Tracking,
    /// Crate version that wrote this file.
    pub app_version: String,
}

impl TrackingFile {
    pub fn new(tracking: Tracking) -> Self {
        Self {
            version: CURRENT_VERSION,
            tracking,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| MotrackError::Serialization(format!("Failed to serialize tracking: {}", e)))
    }

    /// Deserialize from JSON bytes, applying migrations if needed.
    ///
    /// Marker histories are re-sorted on load, so hand-edited files keep the
    /// frame ordering lookups rely on.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| MotrackError::Serialization(format!("Invalid JSON: {}", e)))?;

        let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        if version > CURRENT_VERSION {
            return Err(MotrackError::Serialization(format!(
                "Tracking file version {} is newer than supported version {}",
                version, CURRENT_VERSION
            )));
        }

        let migrated = migrate(raw, version)?;
        let mut file: TrackingFile = serde_json::from_value(migrated)
            .map_err(|e| MotrackError::Serialization(format!("Failed to parse tracking: {}", e)))?;
        normalize(&mut file.tracking)?;
        debug!(
            version,
            objects = file.tracking.objects.len(),
            tracks = file.tracking.track_count(),
            "Tracking file loaded"
        );
        Ok(file)
    }

    pub fn into_tracking(self) -> Tracking {
        self.tracking
    }
}

/// Apply sequential migrations from `from_version` to CURRENT_VERSION.
fn migrate(mut data: serde_json::Value, from_version: u32) -> Result<serde_json::Value> {
    let mut version = from_version;

    while version < CURRENT_VERSION {
        match version {
            0 => {
                // v0 → v1: a bare document without the wrapper
                if data.get("version").is_none() {
                    data = serde_json::json!({
                        "version": 1,
                        "tracking": data,
                        "app_version": "0.0.0",
                    });
                }
                version = 1;
            }
            _ => {
                return Err(MotrackError::Serialization(format!(
                    "No migration path from version {}",
                    version
                )));
            }
        }
    }

    Ok(data)
}

fn normalize(doc: &mut Tracking) -> Result<()> {
    if doc.objects.is_empty() || !doc.objects.iter().any(|o| o.is_camera) {
        return Err(MotrackError::Serialization(
            "Tracking document has no camera object".into(),
        ));
    }
    doc.active_object = doc.active_object.min(doc.objects.len() - 1);
    for obj in &mut doc.objects {
        for track in &mut obj.tracks {
            let markers = track.markers().to_vec();
            track.set_markers(markers);
        }
        for plane in &mut obj.plane_tracks {
            let markers = plane.markers().to_vec();
            plane.set_markers(markers);
        }
    }
    Ok(())
}
