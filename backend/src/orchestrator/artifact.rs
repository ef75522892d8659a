//! Artifact store - versioned per-location draw outputs
//!
//! Each (location, draw) result is written as one JSON file under
//! `<root>/<version>/<location>/draw_NNNN.json`. The version directory name
//! embeds a hash of the simulation config, so results produced under
//! different configs can never be mixed, and a restart against the same
//! config finds exactly the draws it already completed.
//!
//! # Critical Invariants
//!
//! - **Atomicity**: a draw file either exists complete or not at all
//!   (write to a temp file in the same directory, then rename)
//! - **Idempotence**: re-writing a completed draw is a no-op overwrite
//!   with identical content, never a corruption
//! - **Config Matching**: draws are only visible under the version
//!   directory of the config that produced them

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::orchestrator::engine::{DrawResult, SimulationConfig, SimulationError};

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute deterministic SHA256 hash of a config.
///
/// Uses canonical JSON serialization with sorted keys so the hash does not
/// depend on map iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config)
        .map_err(|e| SimulationError::Serialization(format!("config serialization failed: {e}")))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value))
        .map_err(|e| SimulationError::Serialization(format!("config serialization failed: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Store
// ============================================================================

/// On-disk store of completed draw results for one config version.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    version: String,
    /// One lock per location directory; serializes the temp-write + rename
    /// pair so concurrent writers for the same location cannot interleave
    /// on the same temp name
    location_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactStore {
    /// Open (creating if needed) the store for a config at `root`.
    pub fn open(root: impl AsRef<Path>, config: &SimulationConfig) -> Result<Self, SimulationError> {
        let hash = compute_config_hash(config)?;
        let version = format!("v1-{}", &hash[..8]);
        let store = Self {
            root: root.as_ref().to_path_buf(),
            version,
            location_locks: Mutex::new(HashMap::new()),
        };
        fs::create_dir_all(store.version_dir())?;
        Ok(store)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn version_dir(&self) -> PathBuf {
        self.root.join(&self.version)
    }

    /// Directory names come from location strings; spaces and separators
    /// are flattened to underscores
    fn location_dir(&self, location: &str) -> PathBuf {
        let sanitized: String = location
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect();
        self.version_dir().join(sanitized)
    }

    fn draw_path(&self, location: &str, draw: u32) -> PathBuf {
        self.location_dir(location).join(format!("draw_{draw:04}.json"))
    }

    fn lock_for(&self, location: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .location_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(location.to_string()).or_default())
    }

    /// Persist one draw result atomically.
    pub fn write_draw(&self, result: &DrawResult) -> Result<(), SimulationError> {
        let dir = self.location_dir(&result.location);
        fs::create_dir_all(&dir)?;

        let lock = self.lock_for(&result.location);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let json = serde_json::to_vec_pretty(result)?;
        let tmp = dir.join(format!(".tmp_draw_{:04}", result.draw));
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, self.draw_path(&result.location, result.draw))?;
        Ok(())
    }

    /// Draw indices already completed for a location, from the filenames
    /// present on disk. Temp files and foreign names are ignored.
    pub fn completed_draws(&self, location: &str) -> Result<BTreeSet<u32>, SimulationError> {
        let dir = self.location_dir(location);
        let mut draws = BTreeSet::new();
        if !dir.exists() {
            return Ok(draws);
        }
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(index) = name
                .strip_prefix("draw_")
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                if let Ok(index) = index.parse::<u32>() {
                    draws.insert(index);
                }
            }
        }
        Ok(draws)
    }

    pub fn draw_count(&self, location: &str) -> Result<usize, SimulationError> {
        Ok(self.completed_draws(location)?.len())
    }

    /// Draw indices still required to reach `expected` for a location, in
    /// ascending order.
    pub fn missing_draws(&self, location: &str, expected: u32) -> Result<Vec<u32>, SimulationError> {
        let completed = self.completed_draws(location)?;
        Ok((0..expected).filter(|d| !completed.contains(d)).collect())
    }

    pub fn load_draw(&self, location: &str, draw: u32) -> Result<DrawResult, SimulationError> {
        let bytes = fs::read(self.draw_path(location, draw))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All completed draws for a location, ascending by draw index.
    pub fn load_location(&self, location: &str) -> Result<Vec<DrawResult>, SimulationError> {
        self.completed_draws(location)?
            .into_iter()
            .map(|draw| self.load_draw(location, draw))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paf::Stratifier;
    use tempfile::TempDir;

    fn config() -> SimulationConfig {
        SimulationConfig {
            population_size: 100,
            num_steps: 2,
            step_size_days: 28.0,
            start_year: 2021.0,
            global_seed: 7,
            age_range: (40.0, 70.0),
            locations: vec!["Alabama".to_string(), "New York".to_string()],
            expected_draws: 10,
            stratifier: Stratifier::unstratified(),
        }
    }

    fn result(location: &str, draw: u32) -> DrawResult {
        DrawResult {
            location: location.to_string(),
            draw,
            paf_records: Vec::new(),
            joint_records: Vec::new(),
            mean_rr_observations: Vec::new(),
            observed_events: 17,
        }
    }

    #[test]
    fn test_config_hash_deterministic() {
        let h1 = compute_config_hash(&config()).unwrap();
        let h2 = compute_config_hash(&config()).unwrap();
        assert_eq!(h1, h2);

        let mut other = config();
        other.global_seed = 8;
        assert_ne!(h1, compute_config_hash(&other).unwrap());
    }

    #[test]
    fn test_version_embeds_config_hash() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path(), &config()).unwrap();
        assert!(store.version().starts_with("v1-"));
        assert_eq!(store.version().len(), "v1-".len() + 8);
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path(), &config()).unwrap();
        let original = result("Alabama", 3);
        store.write_draw(&original).unwrap();
        let loaded = store.load_draw("Alabama", 3).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_missing_draws_reported_in_order() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path(), &config()).unwrap();
        for draw in [0, 1, 2, 4, 5, 8, 9] {
            store.write_draw(&result("Alabama", draw)).unwrap();
        }
        assert_eq!(store.missing_draws("Alabama", 10).unwrap(), vec![3, 6, 7]);
        assert_eq!(store.draw_count("Alabama").unwrap(), 7);
    }

    #[test]
    fn test_locations_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path(), &config()).unwrap();
        store.write_draw(&result("Alabama", 0)).unwrap();
        assert_eq!(store.draw_count("New York").unwrap(), 0);
        assert_eq!(store.missing_draws("New York", 3).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_temp_files_never_count_as_complete() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path(), &config()).unwrap();
        store.write_draw(&result("Alabama", 0)).unwrap();
        let loc_dir = store.location_dir("Alabama");
        std::fs::write(loc_dir.join(".tmp_draw_0005"), b"partial").unwrap();
        assert_eq!(store.completed_draws("Alabama").unwrap().len(), 1);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path(), &config()).unwrap();
        store.write_draw(&result("Alabama", 2)).unwrap();
        store.write_draw(&result("Alabama", 2)).unwrap();
        assert_eq!(store.draw_count("Alabama").unwrap(), 1);
    }
}
