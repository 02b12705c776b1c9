//! Structured logging module for Braik
//!
//! Writes logs to the directory named by BRAIK_LOG_DIR (default
//! ~/.braik/logs) with categories:
//! - STORE: Local store writes and scope lifecycle
//! - IDENTITY: Registration, login, trial lifecycle
//! - ASSISTANT: Query dispatch and gateway responses
//! - BACKGROUND: Insight extraction and guardian checks
//! - ERROR: Errors and swallowed failures

use chrono::{Local, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use once_cell::sync::Lazy;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy)]
pub enum LogCategory {
    Store,      // Collection reads/writes, scope resolution
    Identity,   // Registration, login, trial checks
    Assistant,  // Query classification and gateway dispatch
    Background, // Fire-and-forget analysis tasks
    Error,      // Errors and swallowed failures
}

impl LogCategory {
    fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Store => "STORE",
            LogCategory::Identity => "IDENTITY",
            LogCategory::Assistant => "ASSISTANT",
            LogCategory::Background => "BACKGROUND",
            LogCategory::Error => "ERROR",
        }
    }
}

/// Global log file handle
static LOG_FILE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Get the log directory path
fn get_log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BRAIK_LOG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".braik/logs")
}

/// Get today's log file path
fn get_log_file_path() -> PathBuf {
    let today = Local::now().format("%Y-%m-%d").to_string();
    get_log_dir().join(format!("braik-{}.log", today))
}

/// Initialize the logging system - creates log directory if needed
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();

    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }

    let log_path = get_log_file_path();
    *LOG_FILE.lock().unwrap() = Some(log_path.clone());

    log(LogCategory::Store, None, "Braik logging initialized");

    Ok(())
}

/// Log a message with category and optional user-scope context
pub fn log(category: LogCategory, scope: Option<&str>, message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let scope_context = scope
        .map(|s| format!("scope={} | ", &s[..12.min(s.len())]))
        .unwrap_or_default();

    let log_line = format!(
        "[{}] [{}] {}{}\n",
        timestamp,
        category.as_str(),
        scope_context,
        message
    );

    // Always print to console (for dev)
    print!("{}", log_line);

    let log_path = get_log_file_path();
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(log_line.as_bytes());
    }
}

/// Log a store event (collection saved, collection wiped)
pub fn log_store(scope: Option<&str>, message: &str) {
    log(LogCategory::Store, scope, message);
}

/// Log an identity event (login, registration, trial state)
pub fn log_identity(scope: Option<&str>, message: &str) {
    log(LogCategory::Identity, scope, message);
}

/// Log an assistant dispatch event
pub fn log_assistant(scope: Option<&str>, message: &str) {
    log(LogCategory::Assistant, scope, message);
}

/// Log a background task event
pub fn log_background(scope: Option<&str>, message: &str) {
    log(LogCategory::Background, scope, message);
}

/// Log an error
pub fn log_error(scope: Option<&str>, message: &str) {
    log(LogCategory::Error, scope, message);
}

/// Clean up old log files (keep last 7 days)
pub fn cleanup_old_logs() -> Result<usize, Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();
    let mut deleted = 0;

    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(7);

    for entry in fs::read_dir(&log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified_time: chrono::DateTime<Utc> = modified.into();
                if modified_time < cutoff {
                    if fs::remove_file(&path).is_ok() {
                        deleted += 1;
                    }
                }
            }
        }
    }

    Ok(deleted)
}
