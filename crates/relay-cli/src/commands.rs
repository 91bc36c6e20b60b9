//! One-shot subcommands. Each builds an engine over the configured store, runs one
//! operation and prints the result as JSON on stdout.

use std::io::Write;

use anyhow::Context;
use relay_core::domain::{DecisionRequest, StatusUpdate, TaskResult, TaskSpec};
use relay_core::{Orchestrator, OrchestratorBuilder, RelayConfig};
use serde::Serialize;

use crate::cli::{Command, DecisionCommand, TaskCommand};

pub async fn build_engine(config: &RelayConfig) -> anyhow::Result<Orchestrator> {
    let engine = OrchestratorBuilder::from_config(config)
        .await
        .context("failed to open stores")?
        .build()?;
    Ok(engine)
}

pub async fn run(engine: &Orchestrator, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Task(command) => run_task(engine, command).await,
        Command::Queue { role, next } => {
            if next {
                print_json(&engine.next_for(&role).await?)
            } else {
                print_json(&engine.queue_for(&role).await?)
            }
        }
        Command::Decision(command) => run_decision(engine, command).await,
        Command::Status => print_json(&engine.status().await?),
        Command::Serve { .. } => anyhow::bail!("serve is handled by main"),
    }
}

async fn run_task(engine: &Orchestrator, command: TaskCommand) -> anyhow::Result<()> {
    match command {
        TaskCommand::Create {
            title,
            content,
            role,
            priority,
            depends_on,
        } => {
            let spec = TaskSpec {
                dependencies: depends_on,
                ..TaskSpec::new(title, content, role).with_priority(priority)
            };
            print_json(&engine.create_task(spec).await?)
        }
        TaskCommand::Get { id } => print_json(&engine.get_task(id).await?),
        TaskCommand::List { role, status } => {
            print_json(&engine.list_by_role(&role, &status).await?)
        }
        TaskCommand::Status { id, status } => {
            print_json(&engine.update_status(id, StatusUpdate::new(status)).await?)
        }
        TaskCommand::Complete { id, summary } => {
            let result = summary.map(TaskResult::success);
            print_json(&engine.complete(id, result).await?)
        }
        TaskCommand::Dispatch { id } => print_json(&engine.dispatch(id).await?),
    }
}

async fn run_decision(engine: &Orchestrator, command: DecisionCommand) -> anyhow::Result<()> {
    match command {
        DecisionCommand::Open {
            role,
            summary,
            task,
        } => {
            let request = DecisionRequest {
                task_id: task,
                ..DecisionRequest::new(role, summary)
            };
            print_json(&engine.open_decision(request).await?)
        }
        DecisionCommand::List { status } => print_json(&engine.list_decisions(status).await?),
        DecisionCommand::Get { id } => print_json(&engine.get_decision(id).await?),
        DecisionCommand::Decide { id, choice, notes } => {
            print_json(&engine.decide(id, choice, notes).await?)
        }
        DecisionCommand::Defer { id, until, reason } => {
            print_json(&engine.defer(id, until, reason).await?)
        }
        DecisionCommand::Delegate { id, to } => print_json(&engine.delegate(id, &to).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use relay_core::TaskStatus;
    use relay_core::config::StorageBackend;
    use tempfile::TempDir;

    use crate::cli::Cli;

    fn config_for(dir: &TempDir) -> RelayConfig {
        let mut config = RelayConfig::default();
        config.storage.backend = StorageBackend::File;
        config.storage.data_dir = dir.path().to_path_buf();
        config
    }

    async fn run_args(config: &RelayConfig, args: &[&str]) {
        let cli = Cli::try_parse_from(std::iter::once("relay").chain(args.iter().copied())).unwrap();
        let engine = build_engine(config).await.unwrap();
        run(&engine, cli.command).await.unwrap();
    }

    #[tokio::test]
    async fn commands_share_state_through_the_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);

        run_args(
            &config,
            &["task", "create", "--title", "a", "--content", "a", "--role", "backend"],
        )
        .await;

        let engine = build_engine(&config).await.unwrap();
        let tasks = engine.list_by_role("backend", &[]).await.unwrap();
        assert_eq!(tasks.len(), 1);
        let id = tasks[0].id.to_string();
        drop(engine);

        run_args(&config, &["task", "complete", &id, "--summary", "done"]).await;

        let engine = build_engine(&config).await.unwrap();
        let task = engine.get_task(tasks[0].id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.result.is_some());
    }

    #[tokio::test]
    async fn errors_surface_to_the_caller() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let engine = build_engine(&config).await.unwrap();

        let cli = Cli::try_parse_from(["relay", "task", "get", "task-01ARZ3NDEKTSV4RRFFQ69G5FAV"])
            .unwrap();
        let err = run(&engine, cli.command).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
