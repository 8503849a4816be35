use console::{style, Emoji};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static DATABASE: Emoji<'_, '_> = Emoji("🗄️  ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", DATABASE, style(label).bold().cyan(), msg);
}

pub fn print_schedule(cron: &str, timezone: &str) {
    println!(
        "  {} {}: {} ({})",
        CLOCK,
        style("Schedule").bold(),
        cron,
        timezone
    );
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// Colour a run or database status word the same way everywhere.
pub fn styled_status(status: &str) -> String {
    match status {
        "success" => style(status).green().bold().to_string(),
        "partial" => style(status).yellow().bold().to_string(),
        "failed" => style(status).red().bold().to_string(),
        other => style(other).dim().to_string(),
    }
}
