use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Resolution of fractional progress on the bar
pub const PROGRESS_STEPS: u64 = 1000;

/// Spinner for waits of unknown length
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Bar driven by a fraction in `0.0..=1.0`; hidden in JSON mode
pub fn create_fraction_bar(message: &str, hidden: bool) -> ProgressBar {
    let pb = if hidden { ProgressBar::hidden() } else { ProgressBar::new(PROGRESS_STEPS) };
    pb.set_length(PROGRESS_STEPS);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg}\n[{bar:40.cyan/blue}] {percent}% ETA: {eta}")
    {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Map a fraction onto the bar; values never move the bar backwards
pub fn set_fraction(pb: &ProgressBar, fraction: f64) {
    let position = (fraction.clamp(0.0, 1.0) * PROGRESS_STEPS as f64).round() as u64;
    if position > pb.position() {
        pb.set_position(position);
    }
}

pub fn finish_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✓ {}", message));
}

pub fn finish_error(pb: &ProgressBar, message: &str) {
    pb.abandon_with_message(format!("✗ {}", message));
}
