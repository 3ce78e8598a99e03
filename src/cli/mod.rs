//! Command-line surface: global flags, the subcommand tree, and unknown-
//! command suggestions.
//!
//! All flags are long-form only. Destructive operations take `--confirm`.

pub mod commands;
pub mod tracing_init;

use crate::render::OutputFormat;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportKind {
    /// JUnit XML, one testcase per invocation
    Junit,
}

#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)]
#[command(
    name = "asc",
    version,
    about = "asc: command-line client for the App Store Connect API",
    long_about = "asc talks to the App Store Connect API with short-lived ES256\n\
                  bearer tokens minted from your team's API key.\n\n\
                  Examples:\n  \
                  asc auth login --key-id ABC123DEFG --issuer-id <uuid> --key AuthKey.p8\n  \
                  asc apps list --limit 50 --output table\n  \
                  asc run deploy --param TRACK=beta\n\n\
                  CI features:\n  \
                  asc --report junit --report-file report.xml apps list\n  \
                  asc run deploy --dry-run   # preview without executing"
)]
pub struct Cli {
    /// Resolve credentials from this profile file, ignoring other sources
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Fail when a complete credential set resolves from more than one source
    #[arg(long, global = true)]
    pub strict_auth: bool,

    /// Increase diagnostic logging (--debug for debug, twice for trace)
    #[arg(long, global = true, action = ArgAction::Count)]
    pub debug: u8,

    /// Trace every API attempt to stderr (equivalent to ASC_DEBUG=api)
    #[arg(long, global = true)]
    pub api_debug: bool,

    /// Record this invocation to a CI report
    #[arg(long, global = true, value_enum, value_name = "KIND")]
    pub report: Option<ReportKind>,

    /// Where to write the CI report
    #[arg(long, global = true, value_name = "PATH")]
    pub report_file: Option<PathBuf>,

    /// Output format (default json; ASC_DEFAULT_OUTPUT overrides the default)
    #[arg(long, global = true, value_enum, value_name = "FORMAT")]
    pub output: Option<OutputFormat>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// API key ID (with --issuer-id and --private-key)
    #[arg(long, global = true, value_name = "ID")]
    pub key_id: Option<String>,

    /// API key issuer ID
    #[arg(long, global = true, value_name = "ID")]
    pub issuer_id: Option<String>,

    /// Path to the PEM-encoded P-256 private key
    #[arg(long, global = true, value_name = "PATH")]
    pub private_key: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Credential overrides carried by global flags.
    #[must_use]
    pub fn credential_overrides(&self) -> crate::credentials::Overrides {
        crate::credentials::Overrides {
            key_id: self.key_id.clone(),
            issuer_id: self.issuer_id.clone(),
            private_key_path: self.private_key.clone(),
            profile: self.profile.clone(),
            strict: self.strict_auth,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage stored API credentials (login, list, use, delete, export)
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Inspect apps on the team
    Apps {
        #[command(subcommand)]
        command: AppsCommands,
    },
    /// Run a workflow from a definition file
    Run {
        /// Workflow name to run
        workflow: String,
        /// Definition file (YAML or JSON)
        #[arg(long, value_name = "PATH", default_value = "asc.yml")]
        file: PathBuf,
        /// Runtime parameter, NAME=VALUE (highest-precedence env layer)
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Preview steps and hooks without executing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a workflow definition file
    Validate {
        /// Definition file (YAML or JSON)
        #[arg(long, value_name = "PATH", default_value = "asc.yml")]
        file: PathBuf,
    },
    /// Generate a shell completion script on stdout
    Completion {
        /// Target shell
        #[arg(long, value_enum)]
        shell: clap_complete::Shell,
    },
    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Register an API key as a profile
    Login {
        /// API key ID; prompted for when omitted
        #[arg(long, value_name = "ID")]
        key_id: Option<String>,
        /// Issuer ID; prompted for when omitted
        #[arg(long, value_name = "ID")]
        issuer_id: Option<String>,
        /// Path to the .p8 private key; prompted for when omitted
        #[arg(long, value_name = "PATH")]
        key: Option<String>,
        /// Profile name
        #[arg(long, value_name = "NAME", default_value = "default")]
        name: String,
        /// Default bundle ID for app-scoped commands
        #[arg(long, value_name = "BUNDLE_ID")]
        bundle_id: Option<String>,
        /// Human-readable label shown by `auth list`
        #[arg(long, value_name = "LABEL")]
        display_name: Option<String>,
        /// Also store the credential set in the OS keychain
        #[arg(long)]
        keychain: bool,
    },
    /// List stored profiles
    List,
    /// Select the active profile
    Use {
        /// Profile name
        name: String,
    },
    /// Delete a profile (and its keychain entry)
    Delete {
        /// Profile name
        name: String,
        /// Required: deleting credentials is destructive
        #[arg(long)]
        confirm: bool,
    },
    /// Export a profile's JSON to a file
    Export {
        /// Profile name
        name: String,
        /// Destination path
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum AppsCommands {
    /// List apps, optionally following pagination
    List {
        /// Page size (capped at the API maximum of 200)
        #[arg(long, value_name = "N", default_value_t = 200)]
        limit: u32,
        /// Follow links.next and aggregate every page
        #[arg(long)]
        paginate: bool,
        /// Follow links.next, emitting one NDJSON line per app
        #[arg(long, conflicts_with = "paginate")]
        stream: bool,
        /// Filter by exact app name
        #[arg(long, value_name = "NAME")]
        filter_name: Option<String>,
    },
    /// Fetch one app by ID
    Get {
        /// App Store Connect app ID
        id: String,
    },
}

/// Known top-level command names, for suggestions.
const KNOWN_COMMANDS: &[&str] = &["auth", "apps", "run", "validate", "completion", "help"];

/// Closest known command to `attempted`, if any is plausible.
#[must_use]
pub fn suggest_command(attempted: &str) -> Option<&'static str> {
    let matcher = SkimMatcherV2::default();
    KNOWN_COMMANDS
        .iter()
        .filter_map(|candidate| {
            matcher
                .fuzzy_match(candidate, attempted)
                .map(|score| (score, *candidate))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, candidate)| candidate)
}
