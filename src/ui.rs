use colored::*;
use terminal_size::{Width, Height, terminal_size};

pub fn print_header(subtitle: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let width = width.0 as usize;

    let line = "─".repeat(width);
    println!("{}", line.black().bold());

    let logo = "🧁";
    let name = "Nerd Muffin".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();

    println!("  {} {} {}", logo, name, version);
    println!("{}", format!("  {}", subtitle).cyan());

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// Render one outbound chat message in the terminal.
pub fn print_bot_message(bot_name: &str, content: &str, reply: bool) {
    let marker = if reply { "↩ " } else { "" };
    println!("\n{}{}: {}", marker.black().bold(), bot_name.green().bold(), content);
}

pub fn print_attachment(path: &str) {
    println!("  {} {}", "📎".cyan(), path.cyan());
}
