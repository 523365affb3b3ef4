use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use conductor_rs::adk::agent::ChunkKind;
use conductor_rs::conductor::agent_factory::AgentFactory;
use conductor_rs::conductor::config::ConductorConfig;
use conductor_rs::conductor::orchestrator::{Orchestrator, Stage};
use conductor_rs::conductor::workflow::{
    CheckpointStore, ExecutionProgress, Executor, ProgressStatus, WorkflowLoader,
};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = "conductor.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show which agent a prompt would be routed to
    Route {
        #[arg(short, long)]
        prompt: String,
    },
    /// Send a prompt through the orchestrator and stream the reply
    Run {
        #[arg(short, long)]
        prompt: String,
    },
    /// List workflows in the workflow directory
    List,
    /// Run a workflow, answering questions from stdin
    Workflow {
        /// Workflow file path, or a name in the workflow directory
        #[arg(short, long)]
        file: String,

        /// Variable binding, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Resume from the workflow's checkpoint, skipping completed nodes
        #[arg(long)]
        resume: bool,

        /// Write a checkpoint when the run ends
        #[arg(long)]
        save: bool,
    },
    /// Inspect or delete a workflow's checkpoint
    Checkpoint {
        /// Workflow file path, or a name in the workflow directory
        #[arg(short, long)]
        file: String,

        #[arg(long)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = ConductorConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    match args.command {
        Commands::Route { prompt } => {
            let orchestrator = build_orchestrator(&config).await;
            let category = orchestrator.classify(&prompt);
            println!("category: {}", category);
            println!("agent:    {}", orchestrator.route(category));
        }
        Commands::Run { prompt } => {
            let orchestrator = Arc::new(build_orchestrator(&config).await);
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let (mut rx, handle) = orchestrator.spawn_stream(prompt, cancel);
            let mut stdout = tokio::io::stdout();
            while let Some(update) = rx.recv().await {
                match (update.stage, update.kind) {
                    (Stage::Streaming, ChunkKind::Output) => {
                        stdout.write_all(update.message.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    (Stage::Error, _) => eprintln!("\nerror: {}", update.message),
                    (_, kind) => log::info!("[{}] {}", kind.as_str(), update.message),
                }
            }
            println!();

            let task = handle.await?;
            if task.is_error() {
                bail!("task {} failed: {}", task.id, task.result);
            }
        }
        Commands::List => {
            let loader = WorkflowLoader::new(&config.workflow_dir);
            for name in loader.list()? {
                println!("{}", name);
            }
        }
        Commands::Workflow {
            file,
            vars,
            resume,
            save,
        } => {
            let path = resolve_workflow(&config, &file)?;
            let workflow = WorkflowLoader::load_file(&path)?;
            let store = checkpoint_store(&config, &path);
            let orchestrator = Arc::new(build_orchestrator(&config).await);

            let executor = Executor::new(workflow, Some(orchestrator))
                .with_workflow_path(&path)
                .with_buffer(config.stream_buffer);
            for binding in &vars {
                let (key, value) = binding
                    .split_once('=')
                    .with_context(|| format!("expected KEY=VALUE, got '{}'", binding))?;
                executor.set_variable(key, value);
            }
            let executor = Arc::new(executor);

            let key = stem(&path);
            let rx = if resume && store.exists(&key) {
                let checkpoint = store.load(&key)?;
                executor.restore_from_checkpoint(&checkpoint)?;
                print!("{}", executor.output());
                executor.resume_async()?
            } else {
                executor.execute_async()?
            };
            // Each run has its own signal, available once the run has begun
            cancel_on_ctrl_c(executor.cancellation_token());

            let autosave = (config.autosave_secs > 0).then(|| {
                executor.autosave(store.clone(), Duration::from_secs(config.autosave_secs))
            });

            let outcome = drive_workflow(&executor, rx).await;
            if let Some(handle) = autosave {
                handle.abort();
            }
            if save {
                let saved = executor.save_checkpoint(&store)?;
                println!("[Checkpoint saved to {}]", saved.display());
            }
            outcome?;
        }
        Commands::Checkpoint { file, delete } => {
            let path = resolve_workflow(&config, &file)?;
            let store = checkpoint_store(&config, &path);
            let key = stem(&path);

            if delete {
                if store.delete(&key)? {
                    println!("Deleted checkpoint for {}", key);
                } else {
                    println!("No checkpoint for {}", key);
                }
                return Ok(());
            }
            if !store.exists(&key) {
                println!("No checkpoint for {}", key);
                return Ok(());
            }

            let checkpoint = store.load(&key)?;
            println!("workflow: {} ({})", checkpoint.workflow_name, checkpoint.workflow_id);
            println!("saved:    {}", checkpoint.saved_at);
            println!("elapsed:  {:?}", checkpoint.elapsed_before);
            println!(
                "progress: {}/{} nodes completed",
                checkpoint.completed_nodes(),
                checkpoint.node_states.len()
            );
            for node in &checkpoint.node_states {
                println!("  {:<24} {:?}", node.name, node.status);
            }
        }
    }

    Ok(())
}

async fn build_orchestrator(config: &ConductorConfig) -> Orchestrator {
    let factory = AgentFactory::new();
    Orchestrator::from_config(config, &factory).await
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

/// Accept either a path to a workflow file or a name in the workflow dir
fn resolve_workflow(config: &ConductorConfig, file: &str) -> anyhow::Result<PathBuf> {
    let direct = PathBuf::from(file);
    if direct.is_file() {
        return Ok(direct);
    }
    WorkflowLoader::new(&config.workflow_dir)
        .resolve(file)
        .with_context(|| format!("workflow '{}' not found", file))
}

/// Workflows from the configured directory checkpoint into the configured
/// checkpoint directory; any other file gets a `.checkpoints` sibling.
fn checkpoint_store(config: &ConductorConfig, workflow_path: &Path) -> CheckpointStore {
    match workflow_path.parent() {
        Some(parent) if parent == config.workflow_dir => CheckpointStore::new(&config.checkpoint_dir),
        _ => CheckpointStore::for_workflow_file(workflow_path),
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Print progress until the stream closes, prompting on stdin for answers
async fn drive_workflow(
    executor: &Executor,
    mut rx: tokio::sync::mpsc::Receiver<ExecutionProgress>,
) -> anyhow::Result<()> {
    let cancel = executor.cancellation_token();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(event) = rx.recv().await {
        match event.status {
            ProgressStatus::Started => println!("\n▶ {}", event.node_name),
            ProgressStatus::Output => {
                stdout.write_all(event.output.as_bytes()).await?;
                stdout.flush().await?;
            }
            ProgressStatus::Completed if event.done => println!("\n{}", event.output),
            ProgressStatus::Completed => log::debug!("Node {} completed", event.node_id),
            ProgressStatus::Error if event.done => bail!("{}", event.output),
            ProgressStatus::Error => eprintln!("\n✗ {}: {}", event.node_name, event.output),
            ProgressStatus::WaitingInput => {
                println!("\n? {}", event.question.unwrap_or_default());
                for (i, option) in event.options.iter().enumerate() {
                    println!("  {}. {}", i + 1, option);
                }
                print!("> ");
                std::io::Write::flush(&mut std::io::stdout())?;

                let line = tokio::select! {
                    line = stdin.next_line() => line?,
                    _ = cancel.cancelled() => continue,
                };
                let Some(line) = line else {
                    executor.cancel();
                    continue;
                };
                executor.provide_answer(pick_option(line.trim(), &event.options));
            }
        }
    }
    Ok(())
}

/// A number selects that option; anything else is the answer itself
fn pick_option(input: &str, options: &[String]) -> String {
    input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| options.get(i))
        .cloned()
        .unwrap_or_else(|| input.to_string())
}
