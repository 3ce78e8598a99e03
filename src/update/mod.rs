//! Self-update: version check, signed-archive download, atomic executable
//! swap, and process restart.
//!
//! A cached check result gates how much work runs before the user's command:
//! a fresh "up to date" entry costs one file read, a stale entry triggers a
//! synchronous check. Update failures are logged to stderr and never prevent
//! the underlying command from running; the dispatcher treats every error
//! here as advisory.

pub mod signature;

use crate::atomic::{atomic_write, DirLock};
use crate::constants;
use crate::error::Error;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted result of the last release check. Written atomically: a
/// background check may race a foreground reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCacheEntry {
    pub last_check: DateTime<Utc>,
    pub latest_version: String,
    pub asset_url: String,
    pub signature_url: String,
    pub check_interval_expires_at: DateTime<Utc>,
}

/// Release metadata fetched from the distribution endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifest {
    pub version: String,
    pub asset_url: String,
    pub signature_url: String,
}

/// Everything the updater needs; injectable so tests never touch the real
/// endpoint or executable.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub current_version: String,
    pub cache_dir: PathBuf,
    pub manifest_url: String,
    pub pubkey_hex: String,
    /// Executable to swap; defaults to `std::env::current_exe()`.
    pub executable: Option<PathBuf>,
}

impl UpdateOptions {
    /// Production configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when no cache directory can be determined.
    pub fn production() -> Result<Self, Error> {
        Ok(Self {
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            cache_dir: cache_dir()?,
            manifest_url: "https://get.asc.dev/releases/latest.json".to_string(),
            pubkey_hex: signature::RELEASE_PUBKEY_HEX.to_string(),
            executable: None,
        })
    }
}

/// Result of a synchronous update attempt.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    pub updated: bool,
    pub executable: Option<PathBuf>,
}

/// Whether updates are disabled for this invocation.
#[must_use]
pub fn disabled() -> bool {
    constants::env_flag(constants::ENV_NO_UPDATE)
}

fn cache_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(constants::UPDATE_CACHE_FILENAME)
}

/// The user cache directory for asc, honoring `ASC_CACHE_DIR`.
///
/// # Errors
///
/// Returns an error when no cache directory can be determined.
pub fn cache_dir() -> Result<PathBuf, Error> {
    if let Ok(dir) = std::env::var(constants::ENV_CACHE_DIR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::cache_dir()
        .map(|d| d.join("asc"))
        .ok_or_else(|| Error::config("could not determine user cache directory"))
}

/// Read the cache entry, tolerating absence and corruption.
#[must_use]
pub fn read_cache(cache_dir: &Path) -> Option<UpdateCacheEntry> {
    let content = std::fs::read_to_string(cache_path(cache_dir)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Whether the cache already knows about a newer version.
#[must_use]
pub fn cached_update_available(opts: &UpdateOptions) -> bool {
    read_cache(&opts.cache_dir)
        .is_some_and(|entry| is_newer(&entry.latest_version, &opts.current_version))
}

/// Whether the cached check is still fresh (no fetch needed).
#[must_use]
pub fn cache_is_fresh(opts: &UpdateOptions, now: DateTime<Utc>) -> bool {
    read_cache(&opts.cache_dir).is_some_and(|entry| entry.check_interval_expires_at > now)
}

/// Fetch the release manifest and refresh the cache. Used by the detached
/// background check; holds the advisory lock so concurrent processes don't
/// both fetch.
///
/// # Errors
///
/// Returns an error when the fetch or the cache write fails.
pub async fn refresh_cache(opts: &UpdateOptions) -> Result<UpdateCacheEntry, Error> {
    let Some(_lock) = DirLock::try_acquire(&opts.cache_dir)? else {
        // Another process is already checking
        return read_cache(&opts.cache_dir)
            .ok_or_else(|| Error::update("concurrent check in progress"));
    };

    let manifest = fetch_manifest(&opts.manifest_url).await?;
    let now = Utc::now();
    let entry = UpdateCacheEntry {
        last_check: now,
        latest_version: manifest.version,
        asset_url: manifest.asset_url,
        signature_url: manifest.signature_url,
        check_interval_expires_at: now
            + ChronoDuration::seconds(
                i64::try_from(constants::UPDATE_CHECK_INTERVAL_SECS).unwrap_or(86_400),
            ),
    };
    tokio::fs::create_dir_all(&opts.cache_dir).await?;
    atomic_write(&cache_path(&opts.cache_dir), &serde_json::to_vec_pretty(&entry)?).await?;
    Ok(entry)
}

/// Synchronous update path: refresh the cache if stale, and when a newer
/// release exists, download, verify, unpack, and swap the executable.
///
/// # Errors
///
/// Any failure is returned for the dispatcher to log; it must never stop
/// the underlying command.
pub async fn check_and_update(opts: &UpdateOptions) -> Result<UpdateOutcome, Error> {
    if disabled() {
        return Ok(UpdateOutcome::default());
    }

    let entry = match read_cache(&opts.cache_dir) {
        Some(entry) if entry.check_interval_expires_at > Utc::now() => entry,
        _ => refresh_cache(opts).await?,
    };

    if !is_newer(&entry.latest_version, &opts.current_version) {
        return Ok(UpdateOutcome::default());
    }

    let new_binary = download_and_verify(opts, &entry).await?;
    let executable = match &opts.executable {
        Some(path) => path.clone(),
        None => std::env::current_exe()?,
    };

    match swap_executable(&new_binary, &executable) {
        Ok(()) => Ok(UpdateOutcome {
            updated: true,
            executable: Some(executable),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            // Not writable (system install); leave the binary in place
            Ok(UpdateOutcome::default())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Replace the running process image with `path`, preserving argv and the
/// environment. On unix this does not return on success.
///
/// # Errors
///
/// Returns the exec/spawn error, or the child's exit code off unix.
pub fn restart(path: &Path, argv: &[String]) -> Result<i32, Error> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let mut command = std::process::Command::new(path);
        command.args(argv.get(1..).unwrap_or(&[]));
        // exec only returns on failure
        let err = command.exec();
        Err(Error::Io(err))
    }
    #[cfg(not(unix))]
    {
        let status = std::process::Command::new(path)
            .args(argv.get(1..).unwrap_or(&[]))
            .status()?;
        Ok(status.code().unwrap_or(constants::EXIT_ERROR))
    }
}

async fn fetch_manifest(url: &str) -> Result<ReleaseManifest, Error> {
    let client = http_client()?;
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(Error::update(format!(
            "release manifest fetch returned HTTP {}",
            response.status().as_u16()
        )));
    }
    Ok(response.json().await?)
}

async fn download_and_verify(
    opts: &UpdateOptions,
    entry: &UpdateCacheEntry,
) -> Result<PathBuf, Error> {
    let client = http_client()?;

    let archive = client
        .get(&entry.asset_url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::update(format!("asset download failed: {e}")))?
        .bytes()
        .await?;
    let sig = client
        .get(&entry.signature_url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::update(format!("signature download failed: {e}")))?
        .text()
        .await?;

    signature::verify_detached(&archive, &sig, &opts.pubkey_hex)?;

    let staging = opts.cache_dir.join(format!("stage-{:016x}", fastrand::u64(..)));
    tokio::fs::create_dir_all(&staging).await?;
    let archive_bytes = archive.to_vec();
    let staging_clone = staging.clone();
    let binary = tokio::task::spawn_blocking(move || unpack_binary(&archive_bytes, &staging_clone))
        .await
        .map_err(|e| Error::update(format!("unpack task failed: {e}")))??;

    make_executable(&binary)?;
    Ok(binary)
}

/// Extract the `asc` binary from a tar.gz archive into `dest`.
fn unpack_binary(archive: &[u8], dest: &Path) -> Result<PathBuf, Error> {
    let decoder = flate2::read::GzDecoder::new(archive);
    let mut tar = tar::Archive::new(decoder);

    for entry in tar.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.file_name().map(std::ffi::OsStr::to_os_string);
        let Some(name) = name else { continue };
        if name == "asc" || name == "asc.exe" {
            let out = dest.join(&name);
            entry.unpack(&out)?;
            return Ok(out);
        }
    }
    Err(Error::update("release archive does not contain an asc binary"))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), Error> {
    Ok(())
}

/// Swap by rename on the same filesystem. The new binary is first copied
/// next to the target so the rename cannot cross devices.
fn swap_executable(new_binary: &Path, target: &Path) -> std::io::Result<()> {
    let sibling = target.with_extension(format!("new-{:08x}", fastrand::u32(..)));
    std::fs::copy(new_binary, &sibling)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&sibling, std::fs::Permissions::from_mode(0o755))?;
    }
    if let Err(e) = std::fs::rename(&sibling, target) {
        let _ = std::fs::remove_file(&sibling);
        return Err(e);
    }
    Ok(())
}

fn http_client() -> Result<reqwest::Client, Error> {
    Ok(reqwest::Client::builder()
        .timeout(crate::duration::request_timeout())
        .user_agent(format!("asc/{}", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Dotted-numeric version comparison: `is_newer("1.2.10", "1.2.9")`.
#[must_use]
pub fn is_newer(candidate: &str, current: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let a = parse(candidate);
    let b = parse(current);
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x > y;
        }
    }
    false
}
