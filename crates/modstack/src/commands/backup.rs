use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::LoadedConfig;
use camino::Utf8Path;
use colored::Colorize;
use miette::Result;
use modstack_core::{create_backup, reset_backup, ApplyStateTracker, RestoreReport};

/// Snapshot the (unmodded) install root as the pristine backup.
pub fn backup_create(config: &LoadedConfig) -> Result<()> {
    let installation = config.installation()?;
    println!(
        "{}",
        format!("Backing up {}...", installation.install_root).bright_cyan()
    );
    let report = create_backup(&installation).map_err(CliError::from)?;
    print_done("✓ Backup created", &report, &installation.backup_root);
    Ok(())
}

/// Replace the backup with a fresh snapshot, e.g. after the game was updated.
///
/// The recorded apply state refers to the old backup, so it is cleared too.
pub fn backup_reset(config: &LoadedConfig) -> Result<()> {
    let installation = config.installation()?;
    println!(
        "{}",
        format!("Re-creating backup of {}...", installation.install_root).bright_cyan()
    );
    let report = reset_backup(&installation).map_err(CliError::from)?;
    ApplyStateTracker::new()
        .save(&config.state_file())
        .map_err(CliError::from)?;
    print_done("✓ Backup reset", &report, &installation.backup_root);
    Ok(())
}

fn print_done(message: &str, report: &RestoreReport, backup_root: &Utf8Path) {
    println!("{}", message.bright_green().bold());
    println!();
    println_pad!("{} {}", "Backup:".bright_white().bold(), backup_root);
    println_pad!(
        "{} {}",
        "Files:".bright_white().bold(),
        report.files_restored
    );
}
