//! Event log. A cloneable handle feeds lines over a channel to a writer
//! thread that appends them, timestamped, to the simulation's log file.
//! Both the blocking interpreter thread and the async agent task log through
//! the same handle.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::thread;

use chrono::Local;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Logger {
    sender: Option<mpsc::UnboundedSender<String>>,
}

impl Logger {
    /// Append to `path`, one timestamped line per event. The writer thread
    /// drains until every handle is dropped.
    pub fn to_file(path: &Path) -> io::Result<Logger> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        thread::spawn(move || {
            while let Some(line) = rx.blocking_recv() {
                let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                if writeln!(file, "{} {}", stamp, line).is_err() {
                    eprintln!("failed to write log line: {}", line);
                }
                let _ = file.flush();
            }
        });

        Ok(Logger { sender: Some(tx) })
    }

    /// A handle that drops everything, for tests.
    pub fn disabled() -> Logger {
        Logger { sender: None }
    }

    pub fn log(&self, line: impl Into<String>) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(line.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_log_lines_carry_timestamp_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.log");

        let logger = Logger::to_file(&path).unwrap();
        logger.log("agent listening on port 1161");
        logger.log("simulation finished");
        drop(logger);

        // The writer thread flushes per line; poll briefly for both lines.
        let mut content = String::new();
        for _ in 0..50 {
            content = std::fs::read_to_string(&path).unwrap_or_default();
            if content.lines().count() >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("agent listening on port 1161"));
        // timestamp prefix: "YYYY-MM-DD HH:MM:SS.mmm "
        let prefix = &lines[0][..24];
        assert_eq!(&prefix[4..5], "-");
        assert_eq!(&prefix[10..11], " ");
        assert_eq!(&prefix[19..20], ".");
    }

    #[test]
    fn test_disabled_logger_is_silent() {
        let logger = Logger::disabled();
        logger.log("goes nowhere");
    }
}
