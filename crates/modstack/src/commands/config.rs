use crate::errors::CliError;
use crate::utils::config::{absolute_path, LoadedConfig};
use crate::utils::print_path_status;
use camino::Utf8PathBuf;
use colored::Colorize;
use miette::Result;

pub fn show_config(config: &LoadedConfig) -> Result<()> {
    let is_dir = |p: &camino::Utf8Path| p.as_std_path().is_dir();

    println!();
    println!("  {} {}", "config_file:".bright_white(), config.path);
    print_path_status(
        "install_root",
        config.install_root().ok().as_deref(),
        is_dir,
    );
    print_path_status("backup_root", config.backup_root().ok().as_deref(), is_dir);
    println!(
        "  {} {}",
        "state_file:".bright_white(),
        config.state_file()
    );

    println!();
    if config.config.overlays.is_empty() {
        println!("  {}", "No overlays configured".bright_yellow());
    } else {
        println!("  {}", "overlays:".bright_white());
        for overlay in &config.config.overlays {
            let state = if overlay.active {
                "on".bright_green()
            } else {
                "off".dimmed()
            };
            println!(
                "    {} {} {} {} {}",
                format!("{:>3}", overlay.order).dimmed(),
                overlay.id.bright_cyan().bold(),
                format!("[{}]", overlay.kind).dimmed(),
                overlay.path,
                state
            );
        }
    }
    println!();
    Ok(())
}

pub fn set_install_root(config: &mut LoadedConfig, path: String) -> Result<()> {
    let path = absolute_path(&path)?;
    if !path.as_std_path().is_dir() {
        return Err(CliError::DirectoryNotFound { path }.into());
    }

    config.config.install_root = Some(path.clone());
    config.save()?;
    print_updated("Install root", &path);
    Ok(())
}

/// The backup directory does not need to exist yet; `backup create` makes it.
pub fn set_backup_root(config: &mut LoadedConfig, path: String) -> Result<()> {
    let path = absolute_path(&path)?;
    config.config.backup_root = Some(path.clone());
    config.save()?;
    print_updated("Backup root", &path);
    Ok(())
}

fn print_updated(name: &str, path: &Utf8PathBuf) {
    println!(
        "{}",
        format!("✓ {} set successfully!", name).bright_green().bold()
    );
    println!();
    println!(
        "  {} {}",
        "Path:".bright_white().bold(),
        path.as_str().bright_green()
    );
}
