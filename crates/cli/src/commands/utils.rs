use std::fmt;

use switcher_core::{ConfigError, SwitcherError};

#[derive(Debug)]
pub enum CliError {
    Config(String),
    Request(String),
    Timeout(u64),
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Request(msg) => write!(f, "Request error: {msg}"),
            Self::Timeout(secs) => write!(f, "No instance answered within {secs}s"),
            Self::General(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<SwitcherError> for CliError {
    fn from(error: SwitcherError) -> Self {
        match error {
            SwitcherError::Builder(e) => Self::Config(e.to_string()),
            other => Self::Request(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::General(error.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}
