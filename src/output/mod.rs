//! Styled terminal output for the SBX CLI
//!
//! Everything user-facing is printed through these helpers (via the `Output`
//! trait) so commands stay testable with `MockOutput`.

use owo_colors::OwoColorize;

/// Print a success message with a green checkmark
pub fn success(message: &str) {
    // Pastel mint green: RGB(152, 225, 152)
    println!(
        "{} {}",
        "✓".truecolor(152, 225, 152).bold(),
        message.bright_white()
    );
}

/// Print an error message with a red X
pub fn error(message: &str) {
    // Pastel coral/salmon: RGB(255, 160, 160)
    eprintln!(
        "{} {}",
        "✗".truecolor(255, 160, 160).bold(),
        message.bright_white()
    );
}

/// Print a warning to stderr so piped stdout stays clean
pub fn warning(message: &str) {
    // Pastel cream/yellow: RGB(255, 230, 160)
    eprintln!(
        "{} {}",
        "⚠".truecolor(255, 230, 160).bold(),
        message.bright_white()
    );
}

/// Print an info message with a blue info symbol
pub fn info(message: &str) {
    // Pastel sky blue: RGB(160, 200, 255)
    println!(
        "{} {}",
        "ℹ".truecolor(160, 200, 255).bold(),
        message.bright_white()
    );
}

/// Print a section header with a separator line
pub fn section(title: &str) {
    // Pastel lavender: RGB(181, 174, 254)
    println!("\n{}", title.truecolor(181, 174, 254).bold());
    println!("{}", "─".repeat(50).truecolor(160, 160, 160));
}

/// Print a small section header without separator
pub fn subsection(title: &str) {
    // Softer pastel teal: RGB(120, 180, 195)
    println!("\n{}", title.truecolor(120, 180, 195));
    println!("{}", "·".repeat(30).truecolor(160, 160, 160));
}

pub fn key_value(key: &str, value: &str) {
    println!(
        "  {} {}",
        format!("{}:", key).truecolor(160, 160, 160),
        value.bright_white()
    );
}

pub fn key_value_highlight(key: &str, value: &str) {
    println!(
        "  {} {}",
        format!("{}:", key).truecolor(160, 160, 160),
        value.truecolor(120, 180, 195).bold()
    );
}

/// Print a dimmed/muted message
pub fn dimmed(message: &str) {
    println!("{}", message.truecolor(160, 160, 160));
}

pub fn blank() {
    println!();
}

/// Print environment badge
pub fn environment_badge(env_name: &str) {
    println!(
        "  {} {}",
        "Environment:".dimmed(),
        env_name.truecolor(152, 225, 152).bold()
    );
}

/// Print the operational state of an environment, colored by how "live" it is
pub fn state_badge(state: &str, live: bool) {
    let styled = if live {
        state.truecolor(152, 225, 152).bold().to_string()
    } else {
        state.truecolor(255, 230, 160).bold().to_string()
    };
    println!("  {} {}", "State:".dimmed(), styled);
}
