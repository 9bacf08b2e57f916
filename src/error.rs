//! Error taxonomy for a mirror run
//!
//! Configuration and listing errors are fatal for the whole run and surface
//! before any repository is touched. Sync errors are scoped to a single
//! repository and travel as values inside [`SyncOutcome`](crate::git::SyncOutcome).

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncSummary;

/// Invalid or insufficient run configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one of account or secret must be specified")]
    MissingCredentials,

    #[error("no target directory given (pass DIRECTORY or set base_directory)")]
    MissingDirectory,

    #[error("worker count must be at least 1")]
    InvalidWorkers,

    #[error("target directory {} is not usable", .path.display())]
    BaseDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("repositories {first} and {second} both map to {}; skip one or use the owner layout", .path.display())]
    PathCollision {
        path: PathBuf,
        first: String,
        second: String,
    },
}

/// Failure while discovering the remote repository set
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("authentication rejected{}: {message}", at_page(.page))]
    Unauthorized { page: u32, message: String },

    #[error("access forbidden{}: {message}", at_page(.page))]
    Forbidden { page: u32, message: String },

    #[error("API rate limit exceeded{}{}", at_page(.page), reset_hint(.reset_at))]
    RateLimited { page: u32, reset_at: Option<u64> },

    #[error("not found{}: {message}", at_page(.page))]
    NotFound { page: u32, message: String },

    #[error("request{} failed with HTTP {status}: {message}", for_page(.page))]
    Status {
        page: u32,
        status: u16,
        message: String,
    },

    #[error("network error while fetching {}", fetched(.page))]
    Network {
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response{}", at_page(.page))]
    Malformed {
        page: u32,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not resolve account {account}")]
    AccountLookup {
        account: String,
        #[source]
        source: Box<ListingError>,
    },
}

// Page 0 marks the account lookup that precedes the first page
fn at_page(page: &u32) -> String {
    match page {
        0 => String::new(),
        n => format!(" on page {}", n),
    }
}

fn for_page(page: &u32) -> String {
    match page {
        0 => String::new(),
        n => format!(" for page {}", n),
    }
}

fn fetched(page: &u32) -> String {
    match page {
        0 => "account details".to_string(),
        n => format!("page {}", n),
    }
}

fn reset_hint(reset_at: &Option<u64>) -> String {
    match reset_at {
        Some(epoch) => format!(" (resets at unix time {})", epoch),
        None => String::new(),
    }
}

/// Failure to clone or update one repository
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to run git {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed ({}): {stderr}", exit_label(.status))]
    Git {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{} exists but is not a git repository", .path.display())]
    NotARepository { path: PathBuf },

    #[error("{} tracks {actual}, expected {expected}", .path.display())]
    RemoteMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{} exists but is not a directory", .path.display())]
    UnexpectedPath { path: PathBuf },

    #[error("name {name:?} is not safe to use as a directory name")]
    UnsafeName { name: String },

    #[error("filesystem error at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sync worker stopped before reporting a result")]
    Interrupted,
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit {}", code),
        None => "killed by signal".to_string(),
    }
}

/// Terminal error of [`SyncEngine::run`](crate::sync::SyncEngine::run)
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error(
        "{} of {} repositories failed to sync: {}",
        .summary.failure_count(),
        .summary.attempted(),
        .summary.failed_names().join(", ")
    )]
    Sync { summary: SyncSummary },
}
