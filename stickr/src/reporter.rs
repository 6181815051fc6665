use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use stickr_core::Listener;

const BAR_TEMPLATE: &str =
    "{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";
const PULSE_TEMPLATE: &str = "{prefix:12} [{elapsed_precise}] [{spinner:.blue}] {msg}";

/// Draws install signals on the terminal.
pub struct InstallReporter {
    bar: ProgressBar,
    failure: Mutex<Option<String>>,
}

impl InstallReporter {
    /// The bar stays hidden until [`InstallReporter::start`], so it does not
    /// draw over the interactive prompts.
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        bar.set_prefix("Installing");
        bar.set_style(bar_style());
        Self {
            bar,
            failure: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
    }

    pub fn note(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// The message of the last failure signal, if any.
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("■ ")
}

fn pulse_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(PULSE_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["■    ", " ■   ", "  ■  ", "   ■ ", "    ■", "   ■ ", "  ■  ", " ■   ", "■■■■■"])
}

impl Listener for InstallReporter {
    fn install_progress(&self, complete: u64, remaining: u64, _speed: f64) {
        self.bar.set_length(complete + remaining);
        self.bar.set_position(complete);
    }

    fn install_progress_message(&self, message: &str) {
        self.note(message);
    }

    fn install_progress_pulse_start(&self) {
        self.bar.set_style(pulse_style());
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn install_progress_pulse_stop(&self) {
        self.bar.disable_steady_tick();
        self.bar.set_style(bar_style());
    }

    fn install_retry(&self, message: &str) {
        self.bar
            .println(format!("{} {}", style("RETRY:").yellow().bold(), message));
    }

    fn install_failure(&self, message: Option<&str>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(message.unwrap_or("unknown error").to_string());
        self.bar.abandon_with_message("❌ Install failed.");
    }

    fn install_success(&self) {
        self.bar.finish_with_message("Install complete.");
    }
}
