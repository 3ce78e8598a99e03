//! Credential store commands: login, list, use, delete, export.

use crate::cli::AuthCommands;
use crate::credentials::{keychain, Profile, ProfileStore};
use crate::error::Error;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Execute an `auth` subcommand against the default profile store.
///
/// # Errors
///
/// Returns credential-store errors; `delete` without `--confirm` is a
/// usage error.
pub fn execute(command: AuthCommands) -> Result<(), Error> {
    let store = ProfileStore::open_default()?;
    match command {
        AuthCommands::Login {
            key_id,
            issuer_id,
            key,
            name,
            bundle_id,
            display_name,
            keychain: use_keychain,
        } => login(
            &store,
            &name,
            LoginInput {
                key_id,
                issuer_id,
                key_path: key,
                bundle_id,
                display_name,
            },
            use_keychain,
        ),
        AuthCommands::List => list(&store),
        AuthCommands::Use { name } => {
            store.set_active(&name)?;
            println!("Now using profile '{name}'.");
            Ok(())
        }
        AuthCommands::Delete { name, confirm } => delete(&store, &name, confirm),
        AuthCommands::Export { name, path } => export(&store, &name, &path),
    }
}

struct LoginInput {
    key_id: Option<String>,
    issuer_id: Option<String>,
    key_path: Option<String>,
    bundle_id: Option<String>,
    display_name: Option<String>,
}

fn login(
    store: &ProfileStore,
    name: &str,
    input: LoginInput,
    use_keychain: bool,
) -> Result<(), Error> {
    let key_id = prompt_or(input.key_id, "API key ID")?;
    let issuer_id = prompt_or(input.issuer_id, "Issuer ID")?;
    let key_path = prompt_or(input.key_path, "Path to private key (.p8)")?;

    let profile = Profile {
        key_id,
        issuer_id,
        private_key: None,
        private_key_path: Some(key_path),
        bundle_id: input.bundle_id,
        display_name: input.display_name,
    };

    // The key material must be loadable before we persist anything
    profile
        .key_material()
        .ok_or_else(|| Error::invalid_key("no key material supplied"))?
        .pem()?;

    store.save(name, &profile)?;
    if store.active().is_none() {
        store.set_active(name)?;
    }

    if use_keychain {
        keychain::store(name, &profile)?;
        println!("Profile '{name}' saved and stored in the OS keychain.");
    } else {
        println!("Profile '{name}' saved.");
    }
    Ok(())
}

fn list(store: &ProfileStore) -> Result<(), Error> {
    let names = store.list()?;
    if names.is_empty() {
        println!("No profiles configured. Run 'asc auth login' to add one.");
        return Ok(());
    }
    let active = store.active();
    println!("Stored profiles:");
    for name in names {
        let profile = store.load(&name)?;
        let marker = if active.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        let label = profile
            .display_name
            .map_or_else(String::new, |d| format!(" ({d})"));
        println!(
            "{marker} {name}{label}  key {} / issuer {}",
            profile.key_id, profile.issuer_id
        );
    }
    Ok(())
}

fn delete(store: &ProfileStore, name: &str, confirm: bool) -> Result<(), Error> {
    if !confirm {
        return Err(Error::usage(format!(
            "deleting profile '{name}' is destructive; re-run with --confirm"
        )));
    }
    store.delete(name)?;
    keychain::delete(name);
    println!("Profile '{name}' deleted.");
    Ok(())
}

fn export(store: &ProfileStore, name: &str, path: &PathBuf) -> Result<(), Error> {
    store.export(name, path)?;
    println!("Profile '{name}' exported to {}.", path.display());
    Ok(())
}

/// Use the flag value when given; otherwise prompt on stderr and read one
/// line from stdin.
fn prompt_or(value: Option<String>, label: &str) -> Result<String, Error> {
    if let Some(value) = value {
        return Ok(value);
    }
    eprint!("{label}: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim().to_string();
    if trimmed.is_empty() {
        return Err(Error::usage(format!("{label} is required")));
    }
    Ok(trimmed)
}
