//! Command-line surface.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use relay_core::RelayConfig;
use relay_core::app::CascadePolicy;
use relay_core::config::ConfigError;
use relay_core::domain::{DecisionChoice, DecisionId, DecisionStatus, Priority, TaskId, TaskStatus};

/// Multi-role task orchestration engine
#[derive(Debug, Parser)]
#[command(name = "relay")]
#[command(about = "Route tasks between agent roles, resolve dependencies, escalate decisions")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the task and decision files
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the execution service
    #[arg(long, global = true)]
    pub execution_url: Option<String>,

    /// Dependency cascade policy: direct | through-completed
    #[arg(long, global = true)]
    pub cascade: Option<CascadePolicy>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

impl GlobalArgs {
    /// Config file and environment, then these flags on top.
    pub fn load_config(&self) -> Result<RelayConfig, ConfigError> {
        let mut config = RelayConfig::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }
        if let Some(url) = &self.execution_url {
            config.execution.base_url = Some(url.clone());
        }
        if let Some(cascade) = self.cascade {
            config.resolution.cascade = cascade;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API
    Serve {
        /// Listen address (defaults to the configured one)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Create, inspect and move tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Show a role's queue
    Queue {
        role: String,

        /// Only print the task that should run next
        #[arg(long)]
        next: bool,
    },

    /// Escalated decisions
    #[command(subcommand)]
    Decision(DecisionCommand),

    /// Per-role counts, pending decisions and gateway state
    Status,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    Create {
        #[arg(long)]
        title: String,

        #[arg(long)]
        content: String,

        #[arg(long)]
        role: String,

        /// low | medium | high | critical, or a weight (25/50/75/100)
        #[arg(long, default_value = "medium")]
        priority: Priority,

        /// Tasks that must complete first (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<TaskId>,
    },

    Get {
        id: TaskId,
    },

    /// Tasks assigned to a role, in creation order
    List {
        role: String,

        /// Comma-separated status filter
        #[arg(long, value_delimiter = ',')]
        status: Vec<TaskStatus>,
    },

    /// Set a task's status
    Status {
        id: TaskId,
        status: TaskStatus,
    },

    /// Mark a task completed and release its dependents
    Complete {
        id: TaskId,

        /// Outcome summary recorded on the task
        #[arg(long)]
        summary: Option<String>,
    },

    /// Hand a task to the execution service
    Dispatch {
        id: TaskId,
    },
}

#[derive(Debug, Subcommand)]
pub enum DecisionCommand {
    Open {
        /// Role asking for the decision
        #[arg(long)]
        role: String,

        #[arg(long)]
        summary: String,

        /// Task the decision relates to
        #[arg(long)]
        task: Option<TaskId>,
    },

    /// Decisions with the given status (pending by default)
    List {
        #[arg(long)]
        status: Option<DecisionStatus>,
    },

    Get {
        id: DecisionId,
    },

    Decide {
        id: DecisionId,

        /// approve | reject | modify | escalate
        choice: DecisionChoice,

        #[arg(long)]
        notes: Option<String>,
    },

    Defer {
        id: DecisionId,

        /// RFC 3339 timestamp
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        #[arg(long)]
        reason: Option<String>,
    },

    Delegate {
        id: DecisionId,

        /// Role or person taking over
        to: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn task_create_parses_priority_and_dependencies() {
        let dep_arg = "task-01ARZ3NDEKTSV4RRFFQ69G5FAV";
        let dep: TaskId = dep_arg.parse().unwrap();
        let cli = Cli::try_parse_from([
            "relay",
            "task",
            "create",
            "--title",
            "Build API",
            "--content",
            "endpoints",
            "--role",
            "backend",
            "--priority",
            "high",
            "--depends-on",
            dep_arg,
        ])
        .unwrap();

        let Command::Task(TaskCommand::Create {
            priority, depends_on, ..
        }) = cli.command
        else {
            panic!("expected task create");
        };
        assert_eq!(priority, Priority::High);
        assert_eq!(depends_on, vec![dep]);
    }

    #[test]
    fn status_filter_is_comma_separated() {
        let cli = Cli::try_parse_from(["relay", "task", "list", "qa", "--status", "queued,blocked"])
            .unwrap();
        let Command::Task(TaskCommand::List { status, .. }) = cli.command else {
            panic!("expected task list");
        };
        assert_eq!(status, vec![TaskStatus::Queued, TaskStatus::Blocked]);
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(Cli::try_parse_from(["relay", "task", "get", "not-an-id"]).is_err());
        assert!(Cli::try_parse_from(["relay", "--cascade", "sideways", "status"]).is_err());
        let id = "decision-01ARZ3NDEKTSV4RRFFQ69G5FAV";
        assert!(Cli::try_parse_from(["relay", "decision", "decide", id, "approve"]).is_ok());
        assert!(Cli::try_parse_from(["relay", "decision", "decide", id, "maybe"]).is_err());
    }

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "relay",
            "status",
            "--data-dir",
            "/tmp/relay",
            "--execution-url",
            "http://exec:8080",
            "--cascade",
            "through-completed",
        ])
        .unwrap();

        let mut config = RelayConfig::default();
        cli.global.apply_overrides(&mut config);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/relay"));
        assert_eq!(config.execution.base_url.as_deref(), Some("http://exec:8080"));
        assert_eq!(config.resolution.cascade, CascadePolicy::ThroughCompleted);
    }
}
