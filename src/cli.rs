//! Argument parsing for the six subcommands. Dispatch lives in
//! `main.rs`; this module only defines the surface.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "acdx", version, about = "Thin multi-agent orchestrator over an external LLM executor")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Delegate to the scaffolder (out of scope for the core).
    Init,

    /// Validate scaffold, produce plan.json via a read-only executor
    /// invocation, render per-task documents, print the plan path.
    Plan {
        goal: String,
        #[arg(short = 'j', long = "agents")]
        agents: Option<usize>,
    },

    /// Full run lifecycle: schedule tasks, then integrate.
    Run {
        goal: String,
        #[arg(short = 'j', long = "agents")]
        agents: Option<usize>,
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        no_merge: bool,
    },

    /// Remove every worktree and branch for the given run.
    Clean { run_id: String },

    /// Print version information.
    Version {
        #[arg(long)]
        check: bool,
    },

    /// Self-update (out of scope for the core).
    Update {
        #[arg(long)]
        check: bool,
    },
}
