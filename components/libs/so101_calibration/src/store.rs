//! The persisted calibration document.
//!
//! One JSON file holds both arms of a leader/follower pair:
//!
//! ```json
//! {
//!   "follower": {
//!     "port": "/dev/ttyACM0",
//!     "calibration": {
//!       "gripper": { "id": 6, "homing_offset": 53, "range_min": 1980, "range_max": 3350 }
//!     }
//!   },
//!   "leader": { "port": "/dev/ttyACM1", "calibration": {} }
//! }
//! ```
//!
//! The file is read once when a session starts and rewritten as a whole when
//! it ends. Writes go through a temporary file in the same directory followed
//! by a rename, so a crash never leaves a half-written document behind.

use crate::error::{CalibrationError, CalibrationResult};
use crate::record::ArmCalibration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Default file name, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "so101.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => f.write_str("follower"),
            Role::Leader => f.write_str("leader"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follower" => Ok(Role::Follower),
            "leader" => Ok(Role::Leader),
            other => Err(format!("unknown arm role '{other}' (expected follower or leader)")),
        }
    }
}

/// Port and calibration of one arm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default)]
    pub calibration: ArmCalibration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationStore {
    arms: BTreeMap<Role, ArmConfig>,
}

impl CalibrationStore {
    /// Load the document. A missing file is an empty document.
    pub fn load(path: &Path) -> CalibrationResult<Self> {
        if !path.exists() {
            log::info!("no calibration document at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).map_err(|source| CalibrationError::StoreIo {
                path: path.to_path_buf(),
                source,
            })?;
        let store: Self =
            serde_json::from_str(&contents).map_err(|source| CalibrationError::StoreFormat {
                path: path.to_path_buf(),
                source,
            })?;
        store.check()?;
        Ok(store)
    }

    /// Rewrite the whole document atomically.
    ///
    /// Refuses to write if any entry is degenerate.
    pub fn save(&self, path: &Path) -> CalibrationResult<()> {
        self.check()?;
        let io_err = |source: std::io::Error| CalibrationError::StoreIo {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            CalibrationError::StoreFormat {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        log::debug!("calibration document written to {}", path.display());
        Ok(())
    }

    pub fn port(&self, role: Role) -> Option<&str> {
        self.arms.get(&role).and_then(|arm| arm.port.as_deref())
    }

    pub fn set_port(&mut self, role: Role, port: impl Into<String>) {
        self.arms.entry(role).or_default().port = Some(port.into());
    }

    /// Stored calibration of an arm, empty when there is none.
    pub fn calibration(&self, role: Role) -> ArmCalibration {
        self.arms
            .get(&role)
            .map(|arm| arm.calibration.clone())
            .unwrap_or_default()
    }

    /// Merge freshly calibrated motors into an arm's entry.
    ///
    /// Motors not present in `fresh` keep whatever was stored before.
    pub fn commit(&mut self, role: Role, fresh: ArmCalibration) -> CalibrationResult<()> {
        fresh.check()?;
        self.arms.entry(role).or_default().calibration.merge(fresh);
        Ok(())
    }

    fn check(&self) -> CalibrationResult<()> {
        self.arms.values().try_for_each(|arm| arm.calibration.check())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MotorCalibration;

    fn motor(name: &str, id: u8, min: u16, max: u16) -> ArmCalibration {
        let mut arm = ArmCalibration::new();
        arm.insert(name, MotorCalibration::new(name, id, -12, min, max).unwrap());
        arm
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store, CalibrationStore::default());
        assert!(store.calibration(Role::Follower).is_empty());
    }

    #[test]
    fn save_then_load_keeps_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("so101.json");

        let mut store = CalibrationStore::default();
        store.set_port(Role::Follower, "/dev/ttyACM0");
        store.commit(Role::Follower, motor("gripper", 6, 1980, 3350)).unwrap();
        store.save(&path).unwrap();

        let loaded = CalibrationStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.port(Role::Follower), Some("/dev/ttyACM0"));
        assert_eq!(loaded.port(Role::Leader), None);
    }

    #[test]
    fn document_uses_role_and_motor_names() {
        let mut store = CalibrationStore::default();
        store.set_port(Role::Leader, "/dev/ttyACM1");
        store.commit(Role::Leader, motor("wrist_roll", 5, 100, 4000)).unwrap();

        let value = serde_json::to_value(&store).unwrap();
        assert_eq!(value["leader"]["port"], "/dev/ttyACM1");
        assert_eq!(value["leader"]["calibration"]["wrist_roll"]["id"], 5);
        assert_eq!(value["leader"]["calibration"]["wrist_roll"]["homing_offset"], -12);
        assert_eq!(value["leader"]["calibration"]["wrist_roll"]["range_min"], 100);
        assert_eq!(value["leader"]["calibration"]["wrist_roll"]["range_max"], 4000);
    }

    #[test]
    fn degenerate_entry_on_disk_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("so101.json");
        std::fs::write(
            &path,
            r#"{"follower":{"calibration":{"gripper":{"id":6,"homing_offset":0,"range_min":2000,"range_max":2000}}}}"#,
        )
        .unwrap();

        let err = CalibrationStore::load(&path).unwrap_err();
        assert!(matches!(err, CalibrationError::DegenerateCalibration { .. }));
    }

    #[test]
    fn commit_leaves_other_motors_and_roles_alone() {
        let mut store = CalibrationStore::default();
        store.commit(Role::Follower, motor("elbow_flex", 3, 800, 3000)).unwrap();
        store.commit(Role::Leader, motor("elbow_flex", 3, 700, 3100)).unwrap();
        store.commit(Role::Follower, motor("gripper", 6, 2000, 3300)).unwrap();

        let follower = store.calibration(Role::Follower);
        assert_eq!(follower.len(), 2);
        assert_eq!(follower.get("elbow_flex").map(|c| c.range_min), Some(800));
        assert_eq!(
            store.calibration(Role::Leader).get("elbow_flex").map(|c| c.range_min),
            Some(700)
        );
    }

    #[test]
    fn role_parses_from_cli_text() {
        assert_eq!("leader".parse::<Role>(), Ok(Role::Leader));
        assert_eq!(Role::Follower.to_string(), "follower");
        assert!("arm".parse::<Role>().is_err());
    }
}
