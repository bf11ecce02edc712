use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::LoadedConfig;
use colored::Colorize;
use miette::Result;
use modstack_core::{ApplyProgress, ApplyResult, ApplyStage, ApplyStateTracker, OverlayApplier};

pub struct ApplyArgs {
    pub force: bool,
}

pub fn apply_overlays(config: &LoadedConfig, args: ApplyArgs) -> Result<()> {
    let installation = config.installation()?;
    let sequence = config.sequence()?;
    let state_file = config.state_file();
    let mut tracker = ApplyStateTracker::load(&state_file).map_err(CliError::from)?;

    let applier = OverlayApplier::new(installation).with_progress(print_progress);
    let Some(result) = applier
        .apply_if_changed(&sequence, &mut tracker, args.force)
        .map_err(CliError::from)?
    else {
        println!(
            "{}",
            "✓ Overlays unchanged since the last apply; nothing to do"
                .bright_green()
                .bold()
        );
        println_pad!(
            "{}",
            "Use 'modstack apply --force' to rebuild anyway".bright_cyan()
        );
        return Ok(());
    };

    print_summary(&result);

    if !result.succeeded {
        return Err(CliError::ApplyFailed {
            failed_overlays: result.overlay_failures.len(),
            failed_files: result.failed_file_count(),
        }
        .into());
    }

    tracker.save(&state_file).map_err(CliError::from)?;
    Ok(())
}

fn print_progress(progress: ApplyProgress) {
    match progress.stage {
        ApplyStage::Restoring => {
            println!("{}", "Restoring pristine files...".bright_cyan());
        }
        ApplyStage::Applying => {
            println!(
                "  {} {} {}",
                format!("[{}/{}]", progress.current, progress.total).dimmed(),
                "Applying".bright_white(),
                progress
                    .current_overlay
                    .as_deref()
                    .unwrap_or_default()
                    .bright_cyan()
                    .bold()
            );
        }
        ApplyStage::Complete => println!(),
    }
}

fn print_summary(result: &ApplyResult) {
    if result.succeeded {
        println!("{}", "✓ Overlays applied successfully!".bright_green().bold());
    } else {
        println!("{}", "✗ Apply finished with errors".bright_red().bold());
    }
    println!();
    println_pad!(
        "{} {}",
        "Overlays applied:".bright_white().bold(),
        result.overlays_applied.len()
    );
    println_pad!(
        "{} {}",
        "Files restored:".bright_white().bold(),
        result.files_restored
    );
    println_pad!(
        "{} {}",
        "Files copied:".bright_white().bold(),
        result.files_copied
    );
    println_pad!(
        "{} {:.2?}",
        "Elapsed:".bright_white().bold(),
        result.elapsed
    );

    if !result.restore_errors.is_empty() {
        println!();
        println_pad!("{}", "Restore errors:".bright_red().bold());
        for error in &result.restore_errors {
            println_pad!("  {} {}", "•".bright_red(), error);
        }
    }

    if !result.overlay_failures.is_empty() {
        println!();
        println_pad!("{}", "Failed overlays:".bright_red().bold());
        for failure in &result.overlay_failures {
            println_pad!(
                "  {} {}",
                "•".bright_red(),
                failure.overlay_id.bright_white().bold()
            );
            for error in &failure.errors {
                println_pad!("      {}", error.to_string().dimmed());
            }
        }
    }
    println!();
}
