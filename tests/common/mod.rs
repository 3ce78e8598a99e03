//! Shared test utilities.

use std::path::PathBuf;

/// Cached binary path for the asc CLI to avoid repeated compilation
#[allow(deprecated)]
pub static ASC_BIN: std::sync::LazyLock<PathBuf> =
    std::sync::LazyLock::new(|| assert_cmd::cargo::cargo_bin("asc"));

/// Test helper to create a command with the cached binary.
///
/// Updates are disabled and the config/cache dirs are pointed at a fresh
/// temp dir so tests never touch real user state.
pub fn asc_cmd(scratch: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(&*ASC_BIN);
    cmd.env("ASC_NO_UPDATE", "1")
        .env("ASC_BYPASS_KEYCHAIN", "1")
        .env("ASC_CONFIG_DIR", scratch.join("config"))
        .env("ASC_CACHE_DIR", scratch.join("cache"))
        .env_remove("ASC_KEY_ID")
        .env_remove("ASC_ISSUER_ID")
        .env_remove("ASC_PRIVATE_KEY")
        .env_remove("ASC_PRIVATE_KEY_B64")
        .env_remove("ASC_PRIVATE_KEY_PATH")
        .env_remove("ASC_DEFAULT_OUTPUT");
    cmd
}
