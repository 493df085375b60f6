// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feedback while a long-running step blocks the main thread.

use crate::prompt::Console;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

const TEMPLATE: &str = "[{spinner}] {msg}";
// The last character is shown once the spinner is finished.
const TICK_CHARS: &str = "/-\\|/";

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(TICK_CHARS)
}

/// Runs work under a label.
///
/// On a terminal the label is shown with a spinner, ticked from indicatif's
/// background thread, until the work finishes; the line is cleared
/// afterwards. Otherwise the label is printed once. Either way the work's
/// result, or its panic, reaches the caller untouched.
pub struct ProgressReporter {
    console: Arc<dyn Console>,
    interval: Duration,
}

/// Clears the spinner when dropped, including while unwinding.
struct Spinner(ProgressBar);

impl Drop for Spinner {
    fn drop(&mut self) {
        self.0.finish_and_clear();
    }
}

impl ProgressReporter {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console, interval: DEFAULT_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn run<T, F>(&self, label: &str, work: F) -> T
    where
        F: FnOnce() -> T,
    {
        if !self.console.is_terminal() {
            self.console.print(label);
            return work();
        }

        let bar = ProgressBar::new_spinner()
            .with_style(spinner_style())
            .with_message(label.to_string());
        bar.set_draw_target(self.console.progress_target());
        bar.tick();
        bar.enable_steady_tick(self.interval);
        let _spinner = Spinner(bar);
        work()
    }
}
