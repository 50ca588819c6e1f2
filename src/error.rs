//! Error taxonomy for a health listing run.
//!
//! `ConnectFailure` and `SampleFailure` are per-instance and are absorbed by
//! the collector. `ConfigError` and `DiscoveryError` abort the invocation.

use std::path::PathBuf;

use thiserror::Error;

/// Any failure while building the double-hop session to an instance.
#[derive(Debug, Error)]
pub enum ConnectFailure {
    #[error("ssh binary not found on PATH")]
    SshMissing,

    #[error("failed to launch ssh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ssh session to {address} exited before becoming ready: {stderr}")]
    Rejected { address: String, stderr: String },

    #[error("ssh session to {address} not ready after {secs}s")]
    NotReady { address: String, secs: u64 },

    #[error("instance has no private address")]
    NoAddress,
}

/// A remote diagnostic command failed or produced unusable output.
#[derive(Debug, Error)]
pub enum SampleFailure {
    #[error("running `{command}`: {source}")]
    Transport {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("{what}: column {column} missing in {line:?}")]
    MissingColumn {
        what: &'static str,
        column: usize,
        line: String,
    },

    #[error("{what}: column {column} is not numeric: {value:?}")]
    NotNumeric {
        what: &'static str,
        column: usize,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("profile '{0}' not found in configuration file")]
    ProfileNotFound(String),

    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("loading configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serializing configuration: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("aws CLI not found on PATH")]
    AwsCliMissing,

    #[error("invalid tag filter '{0}' (expected key:value)")]
    InvalidTagFilter(String),

    #[error("running aws ec2 describe-instances: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("aws ec2 describe-instances failed ({status}): {stderr}")]
    Command { status: i32, stderr: String },

    #[error("parsing describe-instances response: {0}")]
    Parse(#[from] serde_json::Error),
}
