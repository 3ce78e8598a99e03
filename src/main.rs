use asc_cli::cli::{commands, suggest_command, tracing_init, Cli, Commands, ReportKind};
use asc_cli::constants;
use asc_cli::credentials::drain_temp_keys;
use asc_cli::error::{classify, Error};
use asc_cli::render::{resolve_format, Renderer};
use asc_cli::report::{write_junit_report, TestCase};
use asc_cli::update::{self, UpdateOptions};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() {
    // reqwest is built with rustls-no-provider; install the process-wide
    // crypto provider before the first TLS handshake.
    #[cfg(not(windows))]
    let _ = rustls::crypto::ring::default_provider().install_default();
    #[cfg(windows)]
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // The temp-key registry must drain on signal-driven termination too
    let _ = ctrlc::set_handler(|| {
        drain_temp_keys();
        std::process::exit(130);
    });

    let exit_code = run().await;
    drain_temp_keys();
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let mut cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => constants::EXIT_OK,
                _ => constants::EXIT_USAGE,
            };
            let _ = e.print();
            return code;
        }
    };

    tracing_init::init_tracing(cli.debug);
    if cli.api_debug {
        std::env::set_var(constants::ENV_DEBUG, constants::DEBUG_MODE_API);
    }

    if let Err(e) = check_report_flags(&cli) {
        eprintln!("Error: {e}");
        return constants::EXIT_USAGE;
    }

    // Consult the updater before dispatching. May re-exec and not return.
    let background_check = consult_updater().await;

    let command = cli.command.take();
    let command_path = command.as_ref().map(command_path);
    let started = Instant::now();
    let result = dispatch(command, &cli).await;
    let elapsed = started.elapsed();

    if let Some(handle) = background_check {
        handle.abort();
    }

    if let Err(e) = record_report(&cli, command_path.as_deref(), elapsed, result.as_ref()) {
        let classified = classify(&e);
        eprintln!("Error: {}", classified.message);
        // CI depends on the report: a write failure is fatal even when the
        // command itself succeeded
        return constants::EXIT_ERROR;
    }

    match result {
        Ok(()) => constants::EXIT_OK,
        Err(Error::AlreadyReported { exit_code }) => exit_code,
        Err(e) => {
            let classified = classify(&e);
            eprintln!("Error: {}", classified.message);
            if let Some(hint) = classified.hint {
                eprintln!("Hint: {hint}");
            }
            e.exit_code()
        }
    }
}

fn check_report_flags(cli: &Cli) -> Result<(), String> {
    if cli.report_file.is_some() && cli.report.is_none() {
        return Err("--report is required when --report-file is set".to_string());
    }
    if cli.report.is_some() && cli.report_file.is_none() {
        return Err("--report-file is required when --report is set".to_string());
    }
    Ok(())
}

async fn dispatch(command: Option<Commands>, cli: &Cli) -> Result<(), Error> {
    let Some(command) = command else {
        // Bare `asc` shows the grouped root help and succeeds
        let mut root = Cli::command();
        root.print_help().map_err(Error::Io)?;
        return Ok(());
    };

    let renderer = Renderer::new(resolve_format(cli.output), cli.pretty);

    match command {
        Commands::Auth { command } => commands::auth::execute(command),
        Commands::Apps { command } => {
            let client = commands::authenticated_client(&cli.credential_overrides())?;
            commands::apps::execute(&client, command, renderer).await
        }
        Commands::Run {
            workflow,
            file,
            params,
            dry_run,
        } => commands::workflow::run(&file, &workflow, &params, dry_run).await,
        Commands::Validate { file } => commands::workflow::check(&file),
        Commands::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "asc", &mut std::io::stdout());
            Ok(())
        }
        Commands::External(args) => {
            let name = args.first().cloned().unwrap_or_default();
            let mut message = format!("Unknown command: {name}");
            if let Some(suggestion) = suggest_command(&name) {
                message.push_str(&format!(". Did you mean 'asc {suggestion}'?"));
            }
            Err(Error::usage(message))
        }
    }
}

/// The joined command path used as the JUnit testcase name.
fn command_path(command: &Commands) -> String {
    match command {
        Commands::Auth { command } => {
            let sub = match command {
                asc_cli::cli::AuthCommands::Login { .. } => "login",
                asc_cli::cli::AuthCommands::List => "list",
                asc_cli::cli::AuthCommands::Use { .. } => "use",
                asc_cli::cli::AuthCommands::Delete { .. } => "delete",
                asc_cli::cli::AuthCommands::Export { .. } => "export",
            };
            format!("auth {sub}")
        }
        Commands::Apps { command } => {
            let sub = match command {
                asc_cli::cli::AppsCommands::List { .. } => "list",
                asc_cli::cli::AppsCommands::Get { .. } => "get",
            };
            format!("apps {sub}")
        }
        Commands::Run { workflow, .. } => format!("run {workflow}"),
        Commands::Validate { .. } => "validate".to_string(),
        Commands::Completion { .. } => "completion".to_string(),
        Commands::External(args) => args.join(" "),
    }
}

fn record_report(
    cli: &Cli,
    command_path: Option<&str>,
    elapsed: Duration,
    result: Result<&(), &Error>,
) -> Result<(), Error> {
    let (Some(ReportKind::Junit), Some(path)) = (cli.report, cli.report_file.as_ref()) else {
        return Ok(());
    };

    let failure = match result {
        Ok(()) => None,
        Err(Error::AlreadyReported { .. }) => Some("command failed (see output)".to_string()),
        Err(e) => Some(classify(e).message),
    };

    write_junit_report(
        path,
        &TestCase {
            name: command_path.unwrap_or("asc").to_string(),
            time_secs: elapsed.as_secs_f64(),
            failure,
        },
    )
}

/// Pre-dispatch updater consult.
///
/// Cache says a newer release exists → synchronous download/swap/re-exec.
/// Cache stale or missing → detached background refresh with a hard
/// deadline, aborted when the command finishes first. Every failure is
/// advisory: it logs to stderr and never blocks the command.
async fn consult_updater() -> Option<tokio::task::JoinHandle<()>> {
    if update::disabled() {
        return None;
    }
    let Ok(opts) = UpdateOptions::production() else {
        return None;
    };

    if update::cached_update_available(&opts) {
        match update::check_and_update(&opts).await {
            Ok(outcome) if outcome.updated => {
                if let Some(executable) = outcome.executable {
                    eprintln!("asc: updated, restarting");
                    let argv: Vec<String> = std::env::args().collect();
                    match update::restart(&executable, &argv) {
                        Ok(code) => std::process::exit(code),
                        Err(e) => eprintln!("asc update: restart failed: {e}"),
                    }
                }
            }
            Ok(_) => {}
            Err(e) => eprintln!("asc update: {e}"),
        }
        return None;
    }

    if update::cache_is_fresh(&opts, Utc::now()) {
        return None;
    }

    Some(tokio::spawn(async move {
        let deadline = Duration::from_secs(10);
        if let Ok(Err(e)) = tokio::time::timeout(deadline, update::refresh_cache(&opts)).await {
            tracing::debug!("background update check failed: {e}");
        }
    }))
}
