//! OS keychain storage for credential sets.
//!
//! One keychain entry per profile (service `asc-cli`, account = profile
//! name) whose secret is the profile JSON. An unreachable keychain is never
//! fatal: resolution treats it as an absent source.

use crate::constants;
use crate::credentials::profile::Profile;
use crate::error::Error;

/// Store a profile's credential set in the OS keychain.
///
/// # Errors
///
/// Returns an error when the keychain rejects the write.
pub fn store(profile_name: &str, profile: &Profile) -> Result<(), Error> {
    let entry = keyring::Entry::new(constants::KEYCHAIN_SERVICE, profile_name)
        .map_err(|e| Error::config(format!("keychain unavailable: {e}")))?;
    let secret = serde_json::to_string(profile)?;
    entry
        .set_password(&secret)
        .map_err(|e| Error::config(format!("keychain write failed: {e}")))?;
    Ok(())
}

/// Load a profile's credential set from the OS keychain.
///
/// Returns `None` when the entry is missing or the keychain is unreachable.
#[must_use]
pub fn load(profile_name: &str) -> Option<Profile> {
    let entry = keyring::Entry::new(constants::KEYCHAIN_SERVICE, profile_name).ok()?;
    let secret = entry.get_password().ok()?;
    serde_json::from_str(&secret).ok()
}

/// Remove a profile's keychain entry. Missing entries are not an error.
pub fn delete(profile_name: &str) {
    if let Ok(entry) = keyring::Entry::new(constants::KEYCHAIN_SERVICE, profile_name) {
        let _ = entry.delete_credential();
    }
}

/// Whether keychain access is disabled for this invocation.
#[must_use]
pub fn bypassed() -> bool {
    constants::env_flag(constants::ENV_BYPASS_KEYCHAIN)
}
