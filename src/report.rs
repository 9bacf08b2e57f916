//! Progress and error sinks for per-repository outcome lines

use std::io::{self, Write};
use std::sync::Mutex;

/// Destination for the one-line-per-repository run output
pub trait Reporter: Send + Sync {
    /// A repository finished, successfully or not
    fn progress(&self, line: &str);

    /// A repository failed; `line` carries the cause
    fn failure(&self, line: &str);
}

/// Writes progress to stdout and failures to stderr
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    silent: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress progress lines; failures are still written
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

impl Reporter for ConsoleReporter {
    fn progress(&self, line: &str) {
        if self.silent {
            return;
        }
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", line);
    }

    fn failure(&self, line: &str) {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{}", line);
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    progress: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress_lines(&self) -> Vec<String> {
        self.progress.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn failure_lines(&self) -> Vec<String> {
        self.failures.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Reporter for MemoryReporter {
    fn progress(&self, line: &str) {
        if let Ok(mut lines) = self.progress.lock() {
            lines.push(line.to_string());
        }
    }

    fn failure(&self, line: &str) {
        if let Ok(mut lines) = self.failures.lock() {
            lines.push(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reporter_keeps_sinks_apart() {
        let reporter = MemoryReporter::new();
        reporter.progress("repo-a: cloned");
        reporter.failure("repo-b: update failed: boom");
        reporter.progress("repo-b: update failed");

        assert_eq!(
            reporter.progress_lines(),
            vec!["repo-a: cloned", "repo-b: update failed"]
        );
        assert_eq!(reporter.failure_lines(), vec!["repo-b: update failed: boom"]);
    }
}
