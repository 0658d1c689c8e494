//! Daemon-level error taxonomy.
//!
//! This sits alongside `core::Error` (the arena transport's own error type):
//! `core::Error` describes failures inside the pre-existing pub/sub
//! primitives, while the types here describe failures in the logger built on
//! top of them.

use thiserror::Error;

/// Config/startup errors. Always fatal: the daemon exits non-zero without
/// attempting recovery.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config json: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("missing required key: {0}")]
    MissingKey(&'static str),
    #[error("invalid size string {value:?}: {reason}")]
    InvalidSize { value: String, reason: &'static str },
    #[error("invalid duration string {value:?}: {reason}")]
    InvalidDuration { value: String, reason: &'static str },
    #[error("unknown policy type: {0}")]
    UnknownPolicyType(String),
    #[error("unknown trigger type: {0}")]
    UnknownTriggerType(String),
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("invalid topic glob {glob:?}: {source}")]
    InvalidGlob {
        glob: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("invalid cron pattern {pattern:?}: {source}")]
    InvalidCron {
        pattern: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("trigger rate must be positive, got {0}")]
    NonPositiveRate(f64),
    #[error("policy argument {arg} missing for policy type {policy_type}")]
    MissingPolicyArg {
        policy_type: &'static str,
        arg: &'static str,
    },
}

/// Top-level daemon error. The binary maps this to a non-zero exit code.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("arena error: {0}")]
    Arena(#[from] crate::core::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config channel never produced a document")]
    ConfigChannelEmpty,
}

pub type Result<T> = std::result::Result<T, DaemonError>;
