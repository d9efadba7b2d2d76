use std::process::ExitCode;

use anstyle::Style;
use clap::Parser;

mod cli;

use auto_codex::config::Config;
use auto_codex::error::{exit_code, AutoCodexError};
use auto_codex::git::Repository;
use auto_codex::orchestrator;
use cli::{Cli, Command};

/// Thread-id-prefixed, dim-by-default log format: `[a] $ git merge …`
/// for traced commands, `[a] message` otherwise. Matches the format the
/// teacher CLI uses for its own `RUST_LOG`-driven trace output.
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("off"))
        .format(|buf, record| {
            use std::io::Write;

            let msg = record.args().to_string();
            let thread_id = format!("{:?}", std::thread::current().id());
            let thread_num = thread_id
                .strip_prefix("ThreadId(")
                .and_then(|s| s.strip_suffix(")"))
                .and_then(|s| s.parse::<usize>().ok())
                .map(|n| {
                    if n <= 26 {
                        char::from(b'a' + (n - 1) as u8)
                    } else if n <= 52 {
                        char::from(b'A' + (n - 27) as u8)
                    } else {
                        '?'
                    }
                })
                .unwrap_or('?');

            let dim = Style::new().dimmed();
            if let Some(rest) = msg.strip_prefix("$ ") {
                let bold = Style::new().bold();
                writeln!(buf, "{dim}[{thread_num}]{dim:#} $ {bold}{rest}{bold:#}")
            } else {
                writeln!(buf, "{dim}[{thread_num}]{dim:#} {msg}")
            }
        })
        .init();
}

fn print_error(err: &AutoCodexError) {
    eprintln!("acdx: {err}");
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            print_error(&e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<i32, AutoCodexError> {
    match cli.command {
        Command::Init => {
            // Scaffolding (templates, skill files, the `init` wizard) is
            // an external collaborator; the core never runs it.
            println!("acdx init: delegated to the scaffolder (not part of the run-lifecycle core)");
            Ok(exit_code::SUCCESS)
        }

        Command::Plan { goal, agents } => {
            let repo = Repository::discover(None)?;
            let config = Config::load(repo.root())?;
            let _ = agents; // plan accepts -j but only run schedules concurrently
            let outcome = orchestrator::generate_plan(&repo, &config, &goal)?;
            println!("{}", outcome.run_paths.plan_json().display());
            if let Some(notes) = &outcome.plan.merge_notes {
                println!("\nmerge notes:\n{notes}");
            }
            Ok(exit_code::SUCCESS)
        }

        Command::Run { goal, agents, base, no_merge } => {
            let repo = Repository::discover(None)?;
            let config = Config::load(repo.root())?;
            let outcome = orchestrator::run_lifecycle(
                &repo,
                &config,
                &goal,
                agents,
                base.as_deref(),
                no_merge,
            )?;
            println!("run {} finished with exit code {}", outcome.run_id, outcome.exit_code);
            if let Some(notes) = &outcome.merge_notes {
                println!("\nmerge notes:\n{notes}");
            }
            Ok(outcome.exit_code)
        }

        Command::Clean { run_id } => {
            let repo = Repository::discover(None)?;
            orchestrator::clean(&repo, &run_id)?;
            println!("cleaned worktrees and branches for run {run_id}");
            Ok(exit_code::SUCCESS)
        }

        Command::Version { check } => {
            println!("acdx {}", env!("CARGO_PKG_VERSION"));
            if check {
                println!("(up to date: self-update is out of scope for the core)");
            }
            Ok(exit_code::SUCCESS)
        }

        Command::Update { check } => {
            // Self-update is an external collaborator.
            if check {
                println!("acdx update --check: delegated (not part of the run-lifecycle core)");
            } else {
                println!("acdx update: delegated (not part of the run-lifecycle core)");
            }
            Ok(exit_code::SUCCESS)
        }
    }
}
