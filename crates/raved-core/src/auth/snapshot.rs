use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Profile;

/// Snapshot file name in the data directory
const PROFILE_FILE: &str = "profile.json";

/// The last signed-in profile, kept so a resumed session has an identity to
/// show. Holds no secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub profile: Profile,
    pub saved_at: DateTime<Utc>,
}

pub struct ProfileCache {
    dir: PathBuf,
}

impl ProfileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load the snapshot from disk, if one was saved
    pub fn load(&self) -> Result<Option<ProfileSnapshot>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read profile snapshot")?;
        let snapshot = serde_json::from_str(&contents)
            .context("Failed to parse profile snapshot")?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, profile: &Profile) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .context("Failed to create data directory")?;
        let snapshot = ProfileSnapshot {
            profile: profile.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(self.path(), contents).context("Failed to write profile snapshot")?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove profile snapshot")?;
        }
        Ok(())
    }

    fn path(&self) -> PathBuf {
        self.dir.join(PROFILE_FILE)
    }
}
