//! Harness errors. Every variant is fatal to the suite that raised it.

use crate::process::LifecycleState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{name} exited early with {status}\nstderr:\n{stderr}")]
    EarlyExit {
        name: String,
        status: String,
        stderr: String,
    },
    #[error("timed out after {waited:?} waiting for {what}: {last}")]
    Timeout {
        what: String,
        waited: Duration,
        last: String,
    },
    #[error("cannot {action} while {from:?}")]
    Lifecycle {
        from: LifecycleState,
        action: &'static str,
    },
    #[error("configuration: {0}")]
    Config(String),
    #[error("{method} {path} returned {status}: {body}")]
    UnexpectedStatus {
        method: String,
        path: String,
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Assertion(String),
    #[error("check {check} failed: {source}")]
    Check {
        check: String,
        #[source]
        source: Box<HarnessError>,
    },
}

impl HarnessError {
    pub fn check(check: impl Into<String>, source: HarnessError) -> Self {
        HarnessError::Check {
            check: check.into(),
            source: Box::new(source),
        }
    }
}
