//! Terminal output helpers.

use crossterm::style::Stylize;
use stackyard_core::{OperationResult, ServiceState};

/// Display width, counting non-ASCII (CJK, emoji) as two cells.
fn display_width(s: &str) -> usize {
    s.chars().map(|c| if c.is_ascii() { 1 } else { 2 }).sum()
}

/// Print a section header with box drawing characters.
pub fn print_header(title: &str) {
    let inner_width: usize = 58;
    let total_padding = inner_width.saturating_sub(display_width(title));
    let left_pad = total_padding / 2;
    let right_pad = total_padding - left_pad;

    println!();
    println!("{}", format!("╔{}╗", "═".repeat(inner_width)).dark_cyan());
    println!(
        "{}",
        format!("║{}{}{}║", " ".repeat(left_pad), title, " ".repeat(right_pad)).dark_cyan()
    );
    println!("{}", format!("╚{}╝", "═".repeat(inner_width)).dark_cyan());
    println!();
}

pub fn print_section(title: &str) {
    println!();
    println!("  {} {}", "▸".dark_cyan(), title.white().bold());
    println!("  {}", "─".repeat(50).dark_grey());
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

pub fn print_kv(key: &str, value: &str) {
    println!("  {:<14} {}", format!("{}:", key).dark_grey(), value);
}

pub fn print_kv_colored(key: &str, value: &str, color: KvColor) {
    let styled_value = match color {
        KvColor::Green => value.green().to_string(),
        KvColor::Red => value.red().to_string(),
        KvColor::Yellow => value.yellow().to_string(),
        KvColor::Cyan => value.cyan().to_string(),
        KvColor::White => value.white().bold().to_string(),
    };
    println!("  {:<14} {}", format!("{}:", key).dark_grey(), styled_value);
}

#[derive(Clone, Copy)]
pub enum KvColor {
    Green,
    Red,
    Yellow,
    Cyan,
    White,
}

/// Spinner-style progress line; finish with `finish_progress_*`.
pub fn print_progress(msg: &str) {
    use std::io::Write;
    print!("  {} {}...", "⏳".yellow(), msg);
    let _ = std::io::stdout().flush();
}

pub fn finish_progress_success(msg: &str) {
    println!("\r  {} {}                    ", "✓".green(), msg);
}

pub fn finish_progress_error(msg: &str) {
    println!("\r  {} {}                    ", "✗".red(), msg);
}

/// Format uptime from milliseconds to human readable string.
pub fn format_uptime(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h {}m", days, hours % 24, minutes % 60)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

/// Format bytes as GiB/MiB.
pub fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    let mib = bytes as f64 / MIB;
    if mib >= 1024.0 {
        format!("{:.1} GiB", mib / 1024.0)
    } else {
        format!("{:.0} MiB", mib)
    }
}

pub fn format_state(state: ServiceState) -> String {
    match state {
        ServiceState::Running => "● Running".green().to_string(),
        ServiceState::Stopped => "○ Stopped".dark_grey().to_string(),
        ServiceState::Starting => "◐ Starting".yellow().to_string(),
        ServiceState::Stopping => "◑ Stopping".yellow().to_string(),
        ServiceState::Error => "✗ Error".red().to_string(),
    }
}

pub fn print_table_header(columns: &[(&str, usize)]) {
    let header: String = columns
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect::<Vec<_>>()
        .join(" ");
    println!("  {}", header.white().bold());
    let separator: String = columns
        .iter()
        .map(|(_, width)| "─".repeat(*width))
        .collect::<Vec<_>>()
        .join(" ");
    println!("  {}", separator.dark_grey());
}

pub fn print_empty(msg: &str) {
    println!();
    println!("  {}", msg.dark_grey().italic());
    println!();
}

pub fn print_hint(msg: &str) {
    println!("  {} {}", "💡".yellow(), msg.dark_grey());
}

/// `OperationResult` → ✓/✗ line; returns an error for failed results so the exit code is non-zero.
pub fn report_result(result: &OperationResult, action: &str) -> anyhow::Result<()> {
    let message = result.message.as_deref().unwrap_or("");
    if result.success {
        print_success(&format!("{action}: {message}"));
        Ok(())
    } else {
        print_error(&format!("{action} failed: {message}"));
        anyhow::bail!("{action} failed")
    }
}
