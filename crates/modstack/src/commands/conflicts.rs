use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::LoadedConfig;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use modstack_core::{ConflictDetector, ConflictRecord};

pub struct ConflictsArgs {
    pub overlay: Option<String>,
    pub json: bool,
}

pub fn list_conflicts(config: &LoadedConfig, args: ConflictsArgs) -> Result<()> {
    let sequence = config.sequence()?;
    if let Some(id) = &args.overlay {
        if sequence.get(id).is_none() {
            return Err(CliError::OverlayNotFound { id: id.clone() }.into());
        }
    }

    let report = ConflictDetector::default().detect(&sequence);
    let conflicts: Vec<&ConflictRecord> = match &args.overlay {
        Some(id) => report.involving(id).collect(),
        None => report.conflicts.iter().collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&conflicts).into_diagnostic()?);
        return Ok(());
    }

    for failure in &report.failures {
        println!(
            "{} {}",
            "⚠ Could not read overlay".bright_yellow(),
            failure.to_string().bright_yellow()
        );
    }

    if conflicts.is_empty() {
        println!("{}", "✓ No conflicts between active overlays".bright_green().bold());
        return Ok(());
    }

    println!(
        "{}",
        format!("{} conflicting file(s):", conflicts.len())
            .bright_yellow()
            .bold()
    );
    println!();
    for conflict in &conflicts {
        print_conflict(conflict, args.overlay.as_deref());
    }
    Ok(())
}

fn print_conflict(conflict: &ConflictRecord, focus: Option<&str>) {
    println_pad!("{}", conflict.relative_path.bright_white().bold());
    let contributors = conflict
        .contributors
        .iter()
        .map(|id| {
            if Some(id.as_str()) == focus {
                id.bright_cyan().bold().to_string()
            } else {
                id.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" < ");
    println_pad!("  {} {}", "order:".dimmed(), contributors);
    println_pad!(
        "  {} {}",
        "winner:".dimmed(),
        conflict.winner.bright_green().bold()
    );
}
