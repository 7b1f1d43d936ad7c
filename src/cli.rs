// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use corvus_config::OperationMode;

#[derive(Parser, Debug)]
#[command(name = "corvus", version, about = "A terminal AI coding agent runtime")]
pub struct Cli {
    /// Path to an explicit config file, layered on top of the discovered ones.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). Quiet by default.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single prompt through the agent loop to completion and print its reply.
    ///
    /// This is a headless driver: there is no live provider wired in here, so
    /// by default the run is driven by the deterministic mock provider. Host
    /// integrations that carry a real network-backed `ModelProvider` swap it
    /// in at the same construction point this command uses.
    Run {
        /// The task to give the agent. Reads stdin if omitted.
        prompt: Option<String>,

        /// Overrides the configured process-wide safety posture.
        #[arg(long)]
        mode: Option<OperationMode>,

        /// Overrides the configured turn ceiling for this run only.
        #[arg(long)]
        max_turns: Option<u32>,

        /// Overrides the default system prompt.
        #[arg(long)]
        system_prompt: Option<String>,
    },

    /// Print the fully merged configuration (all discovered layers + defaults) and exit.
    ShowConfig,

    /// Print a shell completion script for the given shell and exit.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
