//! Workflow commands: `run` and `validate`.
//!
//! Both print machine-readable JSON on stdout even on failure, then exit
//! non-zero through the already-reported error path so CI can parse the
//! outcome and still see the failure.

use crate::constants;
use crate::error::Error;
use crate::workflow::validate::validate;
use crate::workflow::{Definition, RunOptions, RunStatus};
use indexmap::IndexMap;
use std::path::Path;

/// Run one workflow from a definition file.
///
/// # Errors
///
/// Definition-level problems (unknown/private workflow, no shell, depth
/// overflow) surface as ordinary errors. Step failures are reported inside
/// the printed result and exit via `AlreadyReported`.
pub async fn run(
    file: &Path,
    workflow: &str,
    params: &[String],
    dry_run: bool,
) -> Result<(), Error> {
    let definition = Definition::load(file)?;
    let opts = RunOptions {
        workflow: workflow.to_string(),
        params: parse_params(params)?,
        dry_run,
    };

    let result = crate::workflow::run(&definition, &opts).await?;
    println!("{}", serde_json::to_string(&result)?);

    if result.status == RunStatus::Error {
        return Err(Error::AlreadyReported {
            exit_code: constants::EXIT_ERROR,
        });
    }
    Ok(())
}

/// Validate a definition file, printing the issue list as JSON.
///
/// # Errors
///
/// Unparseable files surface as ordinary errors; validation findings exit
/// via `AlreadyReported` after being printed.
pub fn check(file: &Path) -> Result<(), Error> {
    let definition = Definition::load(file)?;
    let issues = validate(&definition);
    println!("{}", serde_json::to_string(&issues)?);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::AlreadyReported {
            exit_code: constants::EXIT_ERROR,
        })
    }
}

/// Parse repeated `--param NAME=VALUE` flags, preserving order.
fn parse_params(params: &[String]) -> Result<IndexMap<String, String>, Error> {
    let mut map = IndexMap::new();
    for param in params {
        let Some((name, value)) = param.split_once('=') else {
            return Err(Error::usage(format!(
                "invalid --param '{param}': expected NAME=VALUE"
            )));
        };
        if name.trim().is_empty() {
            return Err(Error::usage(format!(
                "invalid --param '{param}': empty name"
            )));
        }
        map.insert(name.trim().to_string(), value.to_string());
    }
    Ok(map)
}
