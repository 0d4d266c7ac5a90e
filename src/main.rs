//! Tiller CLI - keeps git branches in sync with their issue tracker records.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use tiller::cli::{CacheCommands, Cli, Commands, ConfigCommands};
use tiller::commands::{self, App, Output};
use tiller::config::ConfigPaths;
use tiller::notices::Notices;
use tiller::telemetry::{self, TelemetryConfig};

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    // Determine repo path: --repo flag > TL_REPO env > cwd
    let repo_path = resolve_repo_path(cli.repo_path, human);

    let paths = match ConfigPaths::from_env() {
        Ok(paths) => paths,
        Err(e) => {
            report_error(&e, human);
            process::exit(1);
        }
    };

    let telemetry = telemetry::init(TelemetryConfig::new(cli.verbose, Some(paths.log_dir())));
    let notices = Arc::new(Notices::new());

    let result = run_command(cli.command, &repo_path, paths, &notices, human);
    print_notices(&notices, human);

    if let Err(e) = result {
        tracing::debug!("Command failed: {}", e);
        report_error(&e, human);
        drop(telemetry);
        process::exit(1);
    }
}

/// Resolve the repository path from the explicit flag or the current directory.
///
/// An explicit path must exist. Repository discovery walks up from here.
fn resolve_repo_path(explicit_path: Option<PathBuf>, human: bool) -> PathBuf {
    match explicit_path {
        Some(path) => {
            if !path.exists() {
                let message = format!("Specified repo path does not exist: {}", path.display());
                if human {
                    eprintln!("Error: {}", message);
                } else {
                    eprintln!("{}", serde_json::json!({ "error": message }));
                }
                process::exit(1);
            }
            path
        }
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn run_command(
    command: Commands,
    repo_path: &Path,
    paths: ConfigPaths,
    notices: &Arc<Notices>,
    human: bool,
) -> Result<(), tiller::Error> {
    match command {
        // Configuration commands only touch the files so a broken config can be fixed
        Commands::Configure => {
            let stdin = io::stdin();
            let result = commands::configure(&paths, &mut stdin.lock(), &mut io::stderr())?;
            output(&result, human);
            Ok(())
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => output(&commands::config_show(&paths)?, human),
                ConfigCommands::Get { key } => output(&commands::config_get(&paths, &key)?, human),
                ConfigCommands::Set { key, value } => {
                    output(&commands::config_set(&paths, &key, &value)?, human)
                }
            }
            Ok(())
        }
        Commands::Branches { expand } => with_app(paths, notices, async move |app: &App| {
            output(&commands::branches(app, repo_path, expand).await?, human);
            Ok(())
        }),
        Commands::Watch { expand } => with_app(paths, notices, async move |app: &App| {
            commands::watch(app, repo_path, expand, |update| {
                output(update, human);
                print_notices(&app.notices, human);
            })
            .await
        }),
        Commands::Refresh => with_app(paths, notices, async move |app: &App| {
            output(&commands::refresh(app, repo_path).await?, human);
            Ok(())
        }),
        Commands::Issue { key } => with_app(paths, notices, async move |app: &App| {
            output(&commands::issue(app, &key).await?, human);
            Ok(())
        }),
        Commands::Key { branch } => with_app(paths, notices, async move |app: &App| {
            output(&commands::extract_key(&app.settings, &branch), human);
            Ok(())
        }),
        Commands::Open { key } => with_app(paths, notices, async move |app: &App| {
            output(&commands::open(app, repo_path, key).await?, human);
            Ok(())
        }),
        Commands::Copy { key } => with_app(paths, notices, async move |app: &App| {
            output(&commands::copy(app, repo_path, key).await?, human);
            Ok(())
        }),
        Commands::Cache { command } => with_app(paths, notices, async move |app: &App| {
            match command {
                CacheCommands::Clear => output(&commands::cache_clear(app).await?, human),
                CacheCommands::Stats => output(&commands::cache_stats(app).await?, human),
            }
            Ok(())
        }),
    }
}

/// Load the app and drive `run` to completion on a multi-thread runtime.
fn with_app(
    paths: ConfigPaths,
    notices: &Arc<Notices>,
    run: impl AsyncFnOnce(&App) -> Result<(), tiller::Error>,
) -> Result<(), tiller::Error> {
    let app = App::load(paths, notices.clone())?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| tiller::Error::Other(format!("Failed to create runtime: {}", e)))?
        .block_on(run(&app))
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Write pending notices to stderr.
fn print_notices(notices: &Notices, human: bool) {
    for notice in notices.drain() {
        if human {
            eprintln!("{}", notice);
        } else {
            eprintln!("{}", serde_json::json!({ "notice": notice }));
        }
    }
}

fn report_error(error: &tiller::Error, human: bool) {
    if human {
        eprintln!("Error: {}", error);
    } else {
        eprintln!("{}", serde_json::json!({ "error": error.to_string() }));
    }
}
