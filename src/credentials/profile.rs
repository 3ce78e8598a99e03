//! Profile persistence: one JSON file per profile in the user config dir.
//!
//! Layout: `<config>/profiles/<name>.json` holding
//! `{keyId, issuerId, privateKey|privateKeyPath, bundleId?, displayName?}`,
//! plus `<config>/state.json` recording the active profile name.

use crate::atomic::atomic_write_sync;
use crate::constants;
use crate::credentials::material::KeyMaterial;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk shape of one profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub key_id: String,
    pub issuer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Profile {
    /// The key material this profile carries, if any.
    #[must_use]
    pub fn key_material(&self) -> Option<KeyMaterial> {
        if let Some(pem) = &self.private_key {
            Some(KeyMaterial::InlinePem(pem.clone()))
        } else {
            self.private_key_path
                .as_ref()
                .map(|p| KeyMaterial::Path(p.clone()))
        }
    }
}

/// Per-user state shared across profiles.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    #[serde(skip_serializing_if = "Option::is_none")]
    active_profile: Option<String>,
}

/// File-backed profile store rooted at the user config dir.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Open the store at the default location (`ASC_CONFIG_DIR` override
    /// respected).
    ///
    /// # Errors
    ///
    /// Returns an error when no user config directory can be determined.
    pub fn open_default() -> Result<Self, Error> {
        Ok(Self::at(config_dir()?))
    }

    /// Open the store at an explicit root (used by tests).
    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    fn profiles_dir(&self) -> PathBuf {
        self.root.join(constants::DIR_PROFILES)
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir()
            .join(format!("{name}{}", constants::FILE_EXT_JSON))
    }

    fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Load a profile by name.
    ///
    /// # Errors
    ///
    /// Returns `ProfileNotFound` when the file does not exist, or a parse
    /// error when it is malformed.
    pub fn load(&self, name: &str) -> Result<Profile, Error> {
        let path = self.profile_path(name);
        let content = std::fs::read_to_string(&path).map_err(|_| Error::ProfileNotFound {
            name: name.to_string(),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist a profile, replacing any existing file of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error when the profile cannot be serialized or written.
    pub fn save(&self, name: &str, profile: &Profile) -> Result<(), Error> {
        validate_profile_name(name)?;
        std::fs::create_dir_all(self.profiles_dir())?;
        let data = serde_json::to_vec_pretty(profile)?;
        atomic_write_sync(&self.profile_path(name), &data)?;
        Ok(())
    }

    /// Names of all stored profiles, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the profiles directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<String>, Error> {
        let dir = self.profiles_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let file_name = entry.file_name().to_string_lossy().to_string();
                file_name
                    .strip_suffix(constants::FILE_EXT_JSON)
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Mark `name` as the active profile.
    ///
    /// # Errors
    ///
    /// Returns `ProfileNotFound` when no such profile exists.
    pub fn set_active(&self, name: &str) -> Result<(), Error> {
        // Replacement only: the profile must already exist
        self.load(name)?;
        let state = StoreState {
            active_profile: Some(name.to_string()),
        };
        std::fs::create_dir_all(&self.root)?;
        atomic_write_sync(&self.state_path(), &serde_json::to_vec_pretty(&state)?)?;
        Ok(())
    }

    /// The active profile name, if one was selected.
    #[must_use]
    pub fn active(&self) -> Option<String> {
        let content = std::fs::read_to_string(self.state_path()).ok()?;
        let state: StoreState = serde_json::from_str(&content).ok()?;
        state.active_profile
    }

    /// Delete a profile. Clears the active marker when it pointed here.
    ///
    /// # Errors
    ///
    /// Returns `ProfileNotFound` when no such profile exists.
    pub fn delete(&self, name: &str) -> Result<(), Error> {
        let path = self.profile_path(name);
        if !path.exists() {
            return Err(Error::ProfileNotFound {
                name: name.to_string(),
            });
        }
        std::fs::remove_file(path)?;
        if self.active().as_deref() == Some(name) {
            atomic_write_sync(
                &self.state_path(),
                &serde_json::to_vec_pretty(&StoreState::default())?,
            )?;
        }
        Ok(())
    }

    /// Write a copy of the profile JSON to `dest`.
    ///
    /// # Errors
    ///
    /// Returns `ProfileNotFound` or an I/O error.
    pub fn export(&self, name: &str, dest: &Path) -> Result<(), Error> {
        let profile = self.load(name)?;
        let data = serde_json::to_vec_pretty(&profile)?;
        std::fs::write(dest, data)?;
        Ok(())
    }
}

/// The user config directory for asc, honoring `ASC_CONFIG_DIR`.
///
/// # Errors
///
/// Returns an error when no config directory can be determined.
pub fn config_dir() -> Result<PathBuf, Error> {
    if let Ok(dir) = std::env::var(constants::ENV_CONFIG_DIR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|d| d.join("asc"))
        .ok_or_else(|| Error::config("could not determine user config directory"))
}

fn validate_profile_name(name: &str) -> Result<(), Error> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::usage(format!(
            "invalid profile name '{name}': use letters, digits, '-', '_', '.' (max 64 chars)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_profile() -> Profile {
        Profile {
            key_id: "ABC123DEFG".to_string(),
            issuer_id: "57246542-96fe-1a63-e053-0824d011072a".to_string(),
            private_key: None,
            private_key_path: Some("/keys/AuthKey_ABC123DEFG.p8".to_string()),
            bundle_id: Some("com.example.app".to_string()),
            display_name: Some("Example".to_string()),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());

        store.save("work", &sample_profile()).unwrap();
        let loaded = store.load("work").unwrap();
        assert_eq!(loaded.key_id, "ABC123DEFG");
        assert_eq!(
            loaded.private_key_path.as_deref(),
            Some("/keys/AuthKey_ABC123DEFG.p8")
        );
    }

    #[test]
    fn test_persisted_shape_is_camel_case() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());
        store.save("work", &sample_profile()).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("profiles/work.json")).unwrap();
        assert!(raw.contains("\"keyId\""));
        assert!(raw.contains("\"issuerId\""));
        assert!(raw.contains("\"privateKeyPath\""));
        assert!(!raw.contains("\"privateKey\":null"));
    }

    #[test]
    fn test_list_sorted() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());
        store.save("beta", &sample_profile()).unwrap();
        store.save("alpha", &sample_profile()).unwrap();
        assert_eq!(store.list().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_active_profile_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());
        store.save("work", &sample_profile()).unwrap();

        assert!(store.active().is_none());
        store.set_active("work").unwrap();
        assert_eq!(store.active().as_deref(), Some("work"));
    }

    #[test]
    fn test_set_active_unknown_profile_fails() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());
        assert!(matches!(
            store.set_active("nope"),
            Err(Error::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn test_delete_clears_active_marker() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());
        store.save("work", &sample_profile()).unwrap();
        store.set_active("work").unwrap();

        store.delete("work").unwrap();
        assert!(store.active().is_none());
        assert!(matches!(
            store.load("work"),
            Err(Error::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn test_export_writes_copy() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());
        store.save("work", &sample_profile()).unwrap();

        let dest = dir.path().join("exported.json");
        store.export("work", &dest).unwrap();
        let exported: Profile =
            serde_json::from_str(&std::fs::read_to_string(dest).unwrap()).unwrap();
        assert_eq!(exported.key_id, "ABC123DEFG");
    }

    #[test]
    fn test_invalid_profile_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::at(dir.path().to_path_buf());
        assert!(store.save("../evil", &sample_profile()).is_err());
        assert!(store.save("", &sample_profile()).is_err());
    }
}
