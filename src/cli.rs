use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use crate::session::EofPolicy;

#[derive(Parser)]
#[command(name = "Sarc")]
#[command(about = "Streaming chunk archive to and from a remote object store (AWS S3)")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an archive from a set of local files
    Create {
        /// Write the archive here instead of standard output
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Files to pack into the archive
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Concurrent file readers, overrides the config file
        #[arg(short, long)]
        workers: Option<usize>,

        /// Payload fragmentation size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Extract an archive into multipart uploads against a bucket
    Extract {
        /// Read the archive from here instead of standard input
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Destination bucket
        #[arg(short, long)]
        bucket: String,

        /// Destination key prefix, defaults to the current working directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// How to resolve each upload session on its end-of-file chunk
        #[arg(long, value_enum, default_value = "complete")]
        on_eof: OnEof,

        /// Skip payload checksum verification before upload
        #[arg(long)]
        no_verify: bool,

        /// Remote store implementation; memory validates an archive
        /// end-to-end without touching a bucket
        #[arg(long, value_enum, default_value = "s3")]
        store: Store,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OnEof {
    Complete,
    Abort,
}

impl From<OnEof> for EofPolicy {
    fn from(on_eof: OnEof) -> EofPolicy {
        match on_eof {
            OnEof::Complete => EofPolicy::Complete,
            OnEof::Abort => EofPolicy::Abort,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Store {
    S3,
    Memory,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// Configuration
// Credentials are not part of this file; aws-config reads them from the
// environment or the shared AWS config files.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Produce-path worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,

    /// Deadline applied to every remote-store call, in seconds
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_path_style")]
    pub force_path_style: bool,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            None => Ok(Config::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Ok(toml::from_str(&raw)?)
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            remote: RemoteConfig::default(),
            workers: default_workers(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> RemoteConfig {
        RemoteConfig {
            endpoint: None,
            region: None,
            timeout_secs: None,
            force_path_style: default_path_style(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_path_style() -> bool {
    true
}
