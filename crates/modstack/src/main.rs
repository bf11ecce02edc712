use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    apply_overlays, backup_create, backup_reset, list_conflicts, restore_install,
    set_backup_root, set_install_root, show_config, show_status, ApplyArgs, ConflictsArgs,
};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::config::LoadedConfig;

mod commands;
mod errors;
mod utils;

const DEFAULT_LOG_FILTER: &str = "modstack=info,modstack_core=info";
const VERBOSE_LOG_FILTER: &str = "modstack=debug,modstack_core=debug";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the config file (defaults to modstack.toml next to the executable)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log per-file detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore the pristine install and apply the active overlays
    Apply {
        /// Apply even if the overlay list is unchanged since the last apply
        #[arg(short, long)]
        force: bool,
    },
    /// List files written by more than one active overlay
    Conflicts {
        /// Only show conflicts involving this overlay
        #[arg(short, long)]
        overlay: Option<String>,

        /// Print the conflicts as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the active overlays and whether an apply is needed
    Status,
    /// Restore the pristine install without applying any overlay
    Restore,
    /// Manage the pristine backup
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Show or edit the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Snapshot the install root as the pristine backup
    Create,
    /// Replace the backup with a fresh snapshot of the install root
    Reset,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show,
    /// Set the directory overlays are applied to
    SetInstallRoot {
        /// The game installation directory
        path: String,
    },
    /// Set the directory holding the pristine backup
    SetBackupRoot {
        /// The backup directory
        path: String,
    },
}

fn parse_args() -> Result<Args> {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).into_diagnostic()
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

fn main() -> Result<()> {
    let args = parse_args()?;
    init_logging(args.verbose);

    let mut config = LoadedConfig::locate(args.config.as_deref())?;

    match args.command {
        Commands::Apply { force } => apply_overlays(&config, ApplyArgs { force }),
        Commands::Conflicts { overlay, json } => {
            list_conflicts(&config, ConflictsArgs { overlay, json })
        }
        Commands::Status => show_status(&config),
        Commands::Restore => restore_install(&config),
        Commands::Backup { command } => match command {
            BackupCommands::Create => backup_create(&config),
            BackupCommands::Reset => backup_reset(&config),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => show_config(&config),
            ConfigCommands::SetInstallRoot { path } => set_install_root(&mut config, path),
            ConfigCommands::SetBackupRoot { path } => set_backup_root(&mut config, path),
        },
    }
}
