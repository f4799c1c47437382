use std::env;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

mod cli;
mod create;
mod extract;
mod hash;
mod remote;
mod session;
mod wire;

use crate::cli::{Cli, Commands, Config, Store};
use crate::create::CreateOptions;
use crate::extract::{ExtractOptions, ExtractReport};
use crate::remote::mem::MemoryRemote;
use crate::remote::s3::S3Remote;
use crate::remote::Remote;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Create {
            output,
            inputs,
            workers,
            chunk_size,
        } => {
            let opts = CreateOptions {
                workers: workers.unwrap_or(config.workers),
                chunk_size: chunk_size.unwrap_or(wire::CHUNK_SIZE),
            };
            run_create(output, &inputs, &opts)
        }

        Commands::Extract {
            input,
            bucket,
            output,
            on_eof,
            no_verify,
            store,
        } => {
            let prefix = match output.map(Ok).unwrap_or_else(env::current_dir) {
                Ok(prefix) => prefix,
                Err(err) => {
                    error!("unable to resolve destination prefix: {}", err);
                    return ExitCode::FAILURE;
                }
            };
            let opts = ExtractOptions {
                bucket,
                prefix,
                policy: on_eof.into(),
                verify: !no_verify,
            };

            match store {
                Store::S3 => match S3Remote::connect(&config.remote) {
                    Ok(remote) => run_extract(input, &remote, &opts),
                    Err(err) => {
                        error!("{}", err);
                        ExitCode::FAILURE
                    }
                },
                Store::Memory => match MemoryRemote::new(None) {
                    Ok(remote) => run_extract(input, &remote, &opts),
                    Err(err) => {
                        error!("{}", err);
                        ExitCode::FAILURE
                    }
                },
            }
        }
    }
}

fn run_create(output: Option<PathBuf>, inputs: &[PathBuf], opts: &CreateOptions) -> ExitCode {
    let result = match output {
        Some(ref path) => match File::create(path) {
            Ok(file) => create::create(file, inputs, opts),
            Err(err) => {
                error!("unable to create {}: {}", path.display(), err);
                return ExitCode::FAILURE;
            }
        },
        None => create::create(io::stdout(), inputs, opts),
    };

    match result {
        Err(err) => {
            error!("create failed: {}", err);
            ExitCode::FAILURE
        }
        Ok(report) if !report.failures.is_empty() => {
            for (path, err) in &report.failures {
                error!("{}: {}", path.display(), err);
            }
            error!(
                "archived {} files, {} failed, {} skipped",
                report.written.len(),
                report.failures.len(),
                report.skipped.len()
            );
            ExitCode::FAILURE
        }
        Ok(report) => {
            info!(
                "archived {} files, {} skipped",
                report.written.len(),
                report.skipped.len()
            );
            ExitCode::SUCCESS
        }
    }
}

fn run_extract<S: Remote>(
    input: Option<PathBuf>,
    remote: &S,
    opts: &ExtractOptions,
) -> ExitCode {
    let result = match input {
        Some(ref path) => match File::open(path) {
            Ok(file) => extract::extract(file, remote, opts),
            Err(err) => {
                error!("unable to open {}: {}", path.display(), err);
                return ExitCode::FAILURE;
            }
        },
        None => extract::extract(io::stdin(), remote, opts),
    };

    match result {
        Err(err) => {
            error!("extract failed: {}", err);
            ExitCode::FAILURE
        }
        Ok(report) => report_extract(&report),
    }
}

fn report_extract(report: &ExtractReport) -> ExitCode {
    if report.failures.is_empty() {
        info!("uploaded {} files", report.completed.len());
        return ExitCode::SUCCESS;
    }

    for failure in &report.failures {
        error!("{}: {}", failure.path, failure.error);
    }
    error!(
        "uploaded {} files, {} failed",
        report.completed.len(),
        report.failures.len()
    );
    ExitCode::FAILURE
}
