use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::LoadedConfig;
use crate::utils::print_path_status;
use colored::Colorize;
use miette::Result;
use modstack_core::{AppliedSnapshot, ApplyStateTracker};

/// Why an apply is needed, or `None` if the install is up to date.
fn change_reason(last: Option<&AppliedSnapshot>, proposed: &AppliedSnapshot) -> Option<String> {
    let Some(last) = last else {
        return Some("no successful apply recorded".to_string());
    };
    if !modstack_core::has_changed(Some(last), proposed, false) {
        return None;
    }
    if last.len() != proposed.len() {
        return Some(format!(
            "overlay count changed ({} -> {})",
            last.len(),
            proposed.len()
        ));
    }
    let rank = last
        .entries()
        .iter()
        .zip(proposed.entries())
        .position(|(a, b)| a != b)
        .unwrap_or_default();
    Some(format!("overlay list differs at position {}", rank + 1))
}

pub fn show_status(config: &LoadedConfig) -> Result<()> {
    let installation = config.installation()?;
    let sequence = config.sequence()?;
    let tracker = ApplyStateTracker::load(&config.state_file()).map_err(CliError::from)?;

    println!();
    print_path_status("install_root", Some(installation.install_root.as_path()), |p| {
        p.as_std_path().is_dir()
    });
    print_path_status("backup_root", Some(installation.backup_root.as_path()), |p| {
        p.as_std_path().is_dir()
    });
    println!();

    if sequence.is_empty() {
        println_pad!("{}", "No active overlays".bright_yellow());
    } else {
        println_pad!("{}", "Active overlays (lowest priority first):".bright_white().bold());
        for entry in &sequence {
            println_pad!(
                "  {} {} {}",
                "•".bright_cyan(),
                entry.id.bright_cyan().bold(),
                format!("({})", entry.source).dimmed()
            );
        }
    }
    println!();

    if !installation.has_backup() {
        println!(
            "{}",
            "✗ No pristine backup; run 'modstack backup create' first".bright_red().bold()
        );
        return Ok(());
    }

    match change_reason(tracker.last_snapshot(), sequence.snapshot()) {
        Some(reason) => println!(
            "{} {}",
            "● Apply needed:".bright_yellow().bold(),
            reason.bright_white()
        ),
        None => println!("{}", "✓ Install is up to date".bright_green().bold()),
    }
    Ok(())
}
