//! Terminal rendering of pipeline progress.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use aibridge_core::{BatchReport, BatchStart, ProgressReporter, RunState};

/// CLI progress reporter using an indicatif bar over batches.
pub(crate) struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn state_changed(&self, state: &RunState) {
        if state.is_terminal() {
            self.bar.set_message(state.to_string());
        }
    }

    fn checkpoint_loaded(&self, processed: usize, total: usize) {
        self.bar
            .set_message(format!("{processed}/{total} rows done"));
        if processed > 0 {
            let line = format!("  resuming: {processed} of {total} rows already done");
            self.bar.println(line);
        }
    }

    fn batch_started(&self, batch: &BatchStart) {
        self.bar.set_length(batch.total_batches as u64);
        let range = match (batch.ids.first(), batch.ids.last()) {
            (Some(first), Some(last)) => format!("ids {first}..={last}"),
            _ => String::new(),
        };
        self.bar
            .set_message(format!("batch {} {range}", batch.number));
    }

    fn batch_finished(&self, report: &BatchReport) {
        self.bar.set_position(report.number as u64);
        self.bar
            .set_message(format!("{}/{} rows done", report.processed, report.total));
        if let Some(error) = &report.error {
            self.bar
                .println(format!("  batch {} lost: {error}", report.number));
        } else if report.failed > 0 {
            self.bar.println(format!(
                "  batch {}: {} rows came back empty",
                report.number, report.failed
            ));
        }
    }

    fn log(&self, message: &str) {
        self.bar.println(format!("  {message}"));
    }
}
