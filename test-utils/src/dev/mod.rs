// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for the test suite.  These should not be used in
//! production code.

pub mod test_cmds;

use anyhow::Context;
use camino::Utf8PathBuf;
use slog::{info, o, Drain, Logger};
use std::fs::File;
use std::sync::atomic::{AtomicU32, Ordering};

static LOG_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A logger for one test, writing to a file of its own.
///
/// Call [`LogContext::cleanup_successful`] at the end of a passing test to
/// remove the file. A failing test leaves it behind for inspection.
pub struct LogContext {
    pub log: Logger,
    log_path: Utf8PathBuf,
}

impl LogContext {
    pub fn new(test_name: &str) -> Result<Self, anyhow::Error> {
        let dir = Utf8PathBuf::try_from(std::env::temp_dir())
            .context("temporary directory is not valid UTF-8")?;
        let log_path = dir.join(format!(
            "{}.{}.{}.log",
            test_name,
            std::process::id(),
            LOG_COUNTER.fetch_add(1, Ordering::SeqCst),
        ));
        let file = File::create(&log_path)
            .with_context(|| format!("failed to create {log_path}"))?;
        let decorator = slog_term::PlainSyncDecorator::new(file);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let log = Logger::root(drain, o!("test_name" => test_name.to_string()));
        info!(log, "test log file"; "path" => %log_path);
        Ok(Self { log, log_path })
    }

    pub fn log_path(&self) -> &camino::Utf8Path {
        &self.log_path
    }

    /// Removes the log file. Intended for the end of a test that passed.
    pub fn cleanup_successful(self) {
        let LogContext { log, log_path } = self;
        drop(log);
        if let Err(err) = std::fs::remove_file(&log_path) {
            eprintln!("failed to remove test log {log_path}: {err}");
        }
    }
}

/// Set up a [`LogContext`] appropriate for a test named `test_name`.
pub fn test_setup_log(test_name: &str) -> LogContext {
    LogContext::new(test_name).expect("failed to set up test log")
}

