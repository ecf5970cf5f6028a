use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use skillpack_core::{exit_code, Scope, SkillError, SkillName};
use skillpack_installer::{
    default_home_dir, inspect_package, install_skill, lock_path_for, read_lock_info,
    uninstall_skill, update_skill, InstallRequest, OperationContext, ScopeLayout,
    SkillpackConfig, TarGzExtractor, UninstallOptions, UninstallRequest, UpdateRequest,
};
use skillpack_security::{detect_hard_link_warnings, get_symlink_summary};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod render;

use render::{
    current_output_style, format_check_lines, format_error_lines, format_install_lines,
    format_lock_lines, format_uninstall_lines, format_update_lines, OutputStyle,
};

const LOG_ENV_VAR: &str = "SKILLPACK_LOG";

#[derive(Parser, Debug)]
#[command(name = "skillpack")]
#[command(about = "Install, update and remove skill bundles without touching anything else", long_about = None)]
struct Cli {
    /// Project whose `.claude/skills` is the project scope [default: current dir]
    #[arg(long, global = true, env = "SKILLPACK_PROJECT_DIR")]
    project_dir: Option<PathBuf>,
    /// Where update backups and staging directories live
    #[arg(long, global = true)]
    backups_dir: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a `.skill` package as a new skill
    Install {
        package: PathBuf,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Replace an installed skill, rolling back if the new version fails
    Update {
        name: String,
        package: PathBuf,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        dry_run: bool,
        /// Replace files that have other hard links
        #[arg(long)]
        force: bool,
        #[arg(long)]
        keep_backup: bool,
    },
    /// Remove an installed skill
    Uninstall {
        name: String,
        #[arg(long)]
        scope: Option<String>,
        /// Remove even when the pre-removal scan found user data
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Report symlinks and hard links in a directory, or inspect a package
    Check { path: PathBuf },
    /// Show who holds the lock on a skill
    LockStatus {
        name: String,
        #[arg(long)]
        scope: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let style = current_output_style();

    let cancel = CancellationToken::new();
    if let Err(err) = spawn_signal_listener(cancel.clone()) {
        warn!(error = %err, "signal handling unavailable; interrupts will not be graceful");
    }

    match run_cli(cli, cancel, style) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            for line in format_error_lines(&err, style) {
                eprintln!("{line}");
            }
            ExitCode::from(error_exit_code(&err))
        }
    }
}

fn error_exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<SkillError>()
        .map(SkillError::exit_code)
        .unwrap_or(exit_code::GENERAL_FAILURE)
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Cancels `cancel` on Ctrl+C or SIGTERM. The orchestrators notice between
/// file operations, so the one in flight always completes.
fn spawn_signal_listener(cancel: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    std::thread::Builder::new()
        .name("skillpack-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                shutdown_signal().await;
                warn!("interrupt received; stopping after the current file operation");
                cancel.cancel();
            });
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn parse_scope(raw: Option<&str>) -> Result<Scope> {
    Ok(Scope::parse(raw)?)
}

fn parse_name(raw: &str) -> Result<SkillName> {
    Ok(SkillName::parse(raw)?)
}

fn resolve_layout(cli: &Cli, config: &SkillpackConfig, home: &Path) -> Result<ScopeLayout> {
    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let mut layout = ScopeLayout::from_dirs(&project_dir, home);
    if let Some(dir) = cli.backups_dir.as_ref().or(config.backups_dir.as_ref()) {
        layout = layout.with_backups_dir(dir.clone());
    }
    Ok(layout)
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

fn run_cli(cli: Cli, cancel: CancellationToken, style: OutputStyle) -> Result<u8> {
    let home = default_home_dir()?;
    let config = SkillpackConfig::load_default(&home)?;
    let layout = resolve_layout(&cli, &config, &home)?;
    let ctx = OperationContext::new(&layout, &config).with_cancellation(cancel);

    match cli.command {
        Commands::Install {
            package,
            scope,
            dry_run,
        } => {
            let request = InstallRequest {
                package_path: package,
                scope: parse_scope(scope.as_deref())?,
                dry_run,
            };
            let outcome = install_skill(&ctx, &request)?;
            print_lines(&format_install_lines(&outcome, style));
            Ok(outcome.exit_code())
        }
        Commands::Update {
            name,
            package,
            scope,
            dry_run,
            force,
            keep_backup,
        } => {
            let request = UpdateRequest {
                name: parse_name(&name)?,
                scope: parse_scope(scope.as_deref())?,
                package_path: package,
                dry_run,
                force,
                keep_backup,
            };
            let outcome = update_skill(&ctx, &request)?;
            print_lines(&format_update_lines(&outcome, style));
            Ok(outcome.exit_code())
        }
        Commands::Uninstall {
            name,
            scope,
            force,
            dry_run,
        } => {
            let request = UninstallRequest {
                name: parse_name(&name)?,
                scope: parse_scope(scope.as_deref())?,
                options: UninstallOptions { force, dry_run },
            };
            let outcome = uninstall_skill(&ctx, &request)?;
            print_lines(&format_uninstall_lines(&outcome, style));
            Ok(outcome.exit_code())
        }
        Commands::Check { path } => {
            if path.is_file() {
                let summary = inspect_package(&TarGzExtractor::from_config(&config), &path)?;
                println!(
                    "package {}: skill '{}', {} entries, {} bytes",
                    path.display(),
                    summary.root_name,
                    summary.entries,
                    summary.bytes
                );
                return Ok(exit_code::SUCCESS);
            }
            let summary = get_symlink_summary(&path)?;
            let hard_links = detect_hard_link_warnings(&path)?;
            print_lines(&format_check_lines(&summary, hard_links.as_ref(), style));
            if summary.has_security_concerns {
                Ok(exit_code::SECURITY_VIOLATION)
            } else {
                Ok(exit_code::SUCCESS)
            }
        }
        Commands::LockStatus { name, scope } => {
            let name = parse_name(&name)?;
            let skill_path = layout.skill_dir(parse_scope(scope.as_deref())?, &name);
            let info = read_lock_info(&skill_path)?;
            print_lines(&format_lock_lines(&lock_path_for(&skill_path), info.as_ref()));
            if info.is_some() {
                Ok(exit_code::LOCKED)
            } else {
                Ok(exit_code::SUCCESS)
            }
        }
    }
}
