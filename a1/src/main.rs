//! `a1`: run a coding agent autonomously over a project's task list.
//!
//! State lives in `<project>/.a1/`; see `a1 init`.

mod commands;

use std::path::PathBuf;

use a1::exit_codes;
use a1::io::config::Provider;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "a1",
    version,
    about = "Autonomous multi-session coding-agent runner"
)]
struct Cli {
    /// Project directory (contains .a1/).
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.a1/` with default config, an empty task list and a fresh checkpoint.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Manage tasks.
    Task {
        #[command(subcommand)]
        action: TaskCommand,
    },
    /// Print the task summary.
    Tasks,
    /// Record a raw thought to turn into tasks later.
    Think { text: String },
    /// Queue a message for the agent's next session.
    Message { text: String },
    /// Show checkpoint, progress and the last verification.
    Status {
        /// Also run the validator.
        #[arg(long)]
        validate: bool,
    },
    /// Run the validator checks and print their reports.
    Validate,
    /// Print a session's raw worker log (latest by default).
    Log {
        #[arg(long)]
        session: Option<u32>,
    },
    /// Run sessions until the tasks are done and verified.
    Start {
        #[arg(long)]
        max_sessions: Option<u32>,
        /// Tool-use turn budget per session.
        #[arg(long)]
        max_turns: Option<u32>,
        /// claude-cli or claude-api.
        #[arg(long)]
        provider: Option<Provider>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Add a pending task at the lowest priority.
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Success criteria checked after the task is marked done.
        #[arg(long)]
        criteria: Option<String>,
    },
    /// Mark a task done.
    Done { id: String },
    /// Set priorities to the given order.
    Reorder {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn main() {
    a1::logging::init();
    let cli = Cli::parse();
    match commands::dispatch(&cli.project_dir, cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["a1", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_task_add_with_criteria() {
        let cli = Cli::parse_from([
            "a1",
            "task",
            "add",
            "Write parser",
            "-d",
            "handle comments",
            "--criteria",
            "tests pass",
        ]);
        let Command::Task {
            action:
                TaskCommand::Add {
                    title,
                    description,
                    criteria,
                },
        } = cli.command
        else {
            panic!("expected task add");
        };
        assert_eq!(title, "Write parser");
        assert_eq!(description, "handle comments");
        assert_eq!(criteria.as_deref(), Some("tests pass"));
    }

    #[test]
    fn parse_start_provider() {
        let cli = Cli::parse_from(["a1", "start", "--provider", "claude-api", "--max-sessions", "3"]);
        assert!(matches!(
            cli.command,
            Command::Start {
                provider: Some(Provider::ClaudeApi),
                max_sessions: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["a1", "start", "--provider", "ollama"]).is_err());
    }

    #[test]
    fn reorder_requires_ids() {
        assert!(Cli::try_parse_from(["a1", "task", "reorder"]).is_err());
    }
}
