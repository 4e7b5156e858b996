//! Runtime configuration
//!
//! Read from the environment (after `.env` has been loaded). Command line
//! flags are applied on top by the CLI.

use crate::error::{Error, Result};
use crate::mail::gmail::DEFAULT_API_BASE;
use crate::rules::{CaseSensitivity, RunOptions};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB: &str = "INBOX_RULES_DB";
pub const ENV_RULES: &str = "INBOX_RULES_RULES";
pub const ENV_CASE_INSENSITIVE: &str = "INBOX_RULES_CASE_INSENSITIVE";
pub const ENV_CONCURRENCY: &str = "INBOX_RULES_CONCURRENCY";
pub const ENV_ACCESS_TOKEN: &str = "GMAIL_ACCESS_TOKEN";
pub const ENV_API_BASE: &str = "GMAIL_API_BASE";
pub const ENV_HTTP_TIMEOUT: &str = "INBOX_RULES_HTTP_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub rules_path: PathBuf,
    pub case_sensitivity: CaseSensitivity,
    pub concurrency: usize,
    pub access_token: Option<String>,
    pub api_base: String,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let dirs = ProjectDirs::from("com", "inbox-rules", "inbox-rules");
        let default_in = |dir: Option<PathBuf>, file: &str| match dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        };

        let db_path = match get(ENV_DB) {
            Some(path) => PathBuf::from(path),
            None => default_in(dirs.as_ref().map(|d| d.data_dir().to_path_buf()), "emails.db"),
        };
        let rules_path = match get(ENV_RULES) {
            Some(path) => PathBuf::from(path),
            None => default_in(dirs.as_ref().map(|d| d.config_dir().to_path_buf()), "rules.json"),
        };

        let case_sensitivity = match get(ENV_CASE_INSENSITIVE) {
            Some(v) if parse_flag(&v)? => CaseSensitivity::Insensitive,
            _ => CaseSensitivity::Sensitive,
        };

        let concurrency = match get(ENV_CONCURRENCY) {
            Some(v) => parse_concurrency(&v)?,
            None => 1,
        };

        let http_timeout = match get(ENV_HTTP_TIMEOUT) {
            Some(v) => v
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| Error::Settings(format!("{} must be a positive integer, got {:?}", ENV_HTTP_TIMEOUT, v)))?,
            None => Duration::from_secs(30),
        };

        Ok(Self {
            db_path,
            rules_path,
            case_sensitivity,
            concurrency,
            access_token: get(ENV_ACCESS_TOKEN),
            api_base: get(ENV_API_BASE).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http_timeout,
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            case_sensitivity: self.case_sensitivity,
            concurrency: self.concurrency,
        }
    }

    /// Token for mail service calls; required by every remote command
    pub fn access_token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| Error::Settings(format!("{} is not set", ENV_ACCESS_TOKEN)))
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(Error::Settings(format!(
            "{} must be true or false, got {:?}",
            ENV_CASE_INSENSITIVE, other
        ))),
    }
}

pub fn parse_concurrency(value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(Error::Settings(format!(
            "concurrency must be a positive integer, got {:?}",
            value
        ))),
    }
}
