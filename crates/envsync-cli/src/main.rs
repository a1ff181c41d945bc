// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! envsync - Python Environment Resolution CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use envsync::{Environment, Project, matrix};
use miette::Result;

mod cmd_check;
mod cmd_expand;
mod cmd_lock;
mod cmd_show;

#[cfg(test)]
#[path = "./main_test.rs"]
mod main_test;

use cmd_check::CmdCheck;
use cmd_expand::CmdExpand;
use cmd_lock::CmdLock;
use cmd_show::CmdShow;

#[derive(Parser)]
#[clap(
    name = "envsync",
    about = "Python Environment Resolution",
    version,
    long_about = "Check, expand and lock the environments described by an envsync.yaml file"
)]
struct Opt {
    #[clap(flatten)]
    logging: Logging,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
struct Logging {
    /// Increase verbosity (-v, -vv, -vvv)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[clap(short, long, global = true)]
    quiet: bool,
}

impl Logging {
    /// The level seen by `{verbosity}` context fields.
    fn verbosity(&self) -> i32 {
        if self.quiet { -1 } else { i32::from(self.verbose) }
    }
}

/// Project discovery flags
#[derive(Parser, Clone, Debug)]
pub struct ProjectFlags {
    /// Start discovery from PATH, or use PATH as the project file
    #[clap(short = 'f', long = "file", default_value = ".", env = "ENVSYNC_PROJECT")]
    pub file: PathBuf,
}

impl ProjectFlags {
    pub fn load(&self) -> Result<Project> {
        Ok(Project::discover(&self.file)?)
    }
}

/// Matrix selection flags
#[derive(Parser, Clone, Debug, Default)]
pub struct MatrixFlags {
    /// Only matrix instances with AXIS (and one of the values, if given)
    #[clap(short = 'i', long = "include", value_name = "AXIS[=v1,v2]")]
    pub include: Vec<String>,

    /// Skip matrix instances with AXIS (and one of the values, if given)
    #[clap(short = 'x', long = "exclude", value_name = "AXIS[=v1,v2]")]
    pub exclude: Vec<String>,
}

impl MatrixFlags {
    /// Filter `environments`, keeping all of them when no filter is given.
    pub fn select(&self, environments: Vec<Environment>) -> Result<Vec<Environment>> {
        if self.include.is_empty() && self.exclude.is_empty() {
            return Ok(environments);
        }
        let included = matrix::parse_specs(self.include.as_slice())?;
        let excluded = matrix::parse_specs(self.exclude.as_slice())?;
        let selected = matrix::select(
            environments.iter().map(|env| (env.name(), env.matrix())),
            &included,
            &excluded,
        );
        tracing::debug!(?selected, "selected matrix instances");
        Ok(environments
            .into_iter()
            .filter(|env| selected.iter().any(|name| name == env.name()))
            .collect())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Display the resolved environments
    Show(CmdShow),

    /// Print the commands a script expands to
    Expand(CmdExpand),

    /// Verify installed environments satisfy their dependencies
    Check(CmdCheck),

    /// Generate or verify lockfiles
    Lock(CmdLock),
}

impl Opt {
    async fn run(self) -> Result<i32> {
        // Setup logging
        let log_level = match (self.logging.quiet, self.logging.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::INFO,
            (false, 2) => tracing::Level::DEBUG,
            (false, _) => tracing::Level::TRACE,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .init();

        let verbosity = self.logging.verbosity();

        // Dispatch to command
        match self.cmd {
            Command::Show(mut cmd) => cmd.run().await,
            Command::Expand(mut cmd) => cmd.run(verbosity).await,
            Command::Check(mut cmd) => cmd.run().await,
            Command::Lock(mut cmd) => cmd.run().await,
        }
    }
}

#[tokio::main]
async fn main() {
    let opt = Opt::parse();
    let code = match opt.run().await {
        Ok(code) => code,
        Err(err) => {
            let code = err
                .downcast_ref::<envsync::Error>()
                .map(envsync::Error::exit_code)
                .unwrap_or(1);
            eprintln!("{err:?}");
            code
        }
    };
    std::process::exit(code);
}
