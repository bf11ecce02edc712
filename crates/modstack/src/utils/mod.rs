use camino::Utf8Path;
use colored::Colorize;

pub mod config;

#[macro_export]
macro_rules! println_pad {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        for __line in __s.lines() {
            println!("    {}", __line);
        }
    }};
}

/// Print a path entry with a ✓/✗ status indicator.
pub fn print_path_status(name: &str, path: Option<&Utf8Path>, exists: impl Fn(&Utf8Path) -> bool) {
    match path {
        Some(p) => {
            let status = if exists(p) {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {} {} {}", format!("{}:", name).bright_white(), p, status);
        }
        None => {
            println!(
                "  {} {}",
                format!("{}:", name).bright_white(),
                "(not set)".bright_yellow()
            );
        }
    }
}
