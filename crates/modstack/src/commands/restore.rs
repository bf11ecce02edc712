use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::LoadedConfig;
use colored::Colorize;
use miette::Result;
use modstack_core::{ApplyStateTracker, OverlayApplier};

/// Copy the pristine backup over the install root and forget the last apply.
pub fn restore_install(config: &LoadedConfig) -> Result<()> {
    let installation = config.installation()?;
    let state_file = config.state_file();
    let mut tracker = ApplyStateTracker::load(&state_file).map_err(CliError::from)?;

    println!("{}", "Restoring pristine files...".bright_cyan());
    let report = OverlayApplier::new(installation)
        .restore(&mut tracker)
        .map_err(CliError::from)?;
    tracker.save(&state_file).map_err(CliError::from)?;

    if !report.is_clean() {
        for error in &report.errors {
            println_pad!("{} {}", "•".bright_red(), error);
        }
        return Err(CliError::RestoreFailed {
            failed_files: report.errors.len(),
        }
        .into());
    }

    println!("{}", "✓ Install restored".bright_green().bold());
    println_pad!(
        "{} {}",
        "Files restored:".bright_white().bold(),
        report.files_restored
    );
    Ok(())
}
