// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Print the fully expanded commands of scripts.

use clap::Args;
use colored::Colorize;
use miette::Result;

use crate::{MatrixFlags, ProjectFlags};

/// Print the commands a script expands to
#[derive(Debug, Args)]
pub struct CmdExpand {
    #[clap(flatten)]
    project: ProjectFlags,

    #[clap(flatten)]
    matrix: MatrixFlags,

    /// The environment whose scripts are used
    #[clap(short = 'e', long = "env", default_value = "default", env = "ENVSYNC_ENV")]
    env: String,

    /// Value of the `{args}` field
    #[clap(long)]
    args: Option<String>,

    /// Script names or commands to expand
    #[clap(required = true)]
    commands: Vec<String>,
}

impl CmdExpand {
    pub async fn run(&mut self, verbosity: i32) -> Result<i32> {
        let project = self.project.load()?;

        // an instance name selects exactly that instance
        let environments = match project.environment(&self.env) {
            Ok(env) => vec![env],
            Err(err) => {
                let instances: Vec<_> = project
                    .environments()
                    .into_iter()
                    .filter(|env| env.base_name() == self.env)
                    .collect();
                if instances.is_empty() {
                    return Err(err.into());
                }
                instances
            }
        };
        let environments = self.matrix.select(environments)?;

        let show_names = environments.len() > 1;
        for env in &environments {
            if show_names {
                println!("{}", format!("# {}", env.name()).dimmed());
            }
            let commands =
                env.resolve_commands(self.commands.as_slice(), self.args.clone(), verbosity)?;
            for command in commands {
                println!("{command}");
            }
        }

        Ok(0)
    }
}
