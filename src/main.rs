//! `dagflowctl`: a thin demonstration CLI over the `dagflow` engine, useful
//! as a smoke test for the public API and for checking a policy file
//! without wiring up a full workflow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dagflow::{DagExecutor, ExecutorConfig, Node, WorkflowGraph};
use dagflow::context::ExecutionStatus;
use dagflow::events::CollectingHandler;
use dagflow::executor::test_support::ConstExecutor;
use dagflow::policy::config::PolicyConfig;
use dagflow::store::memory::InMemoryContextStore;

#[derive(Parser)]
#[command(name = "dagflowctl", about = "Run and inspect dagflow workflows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a trivial three-node linear demo workflow and print the result.
    Demo {
        /// Path to a policy configuration YAML file, if any.
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Parse a policy configuration file and report whether every gate
    /// expression is valid.
    CheckPolicy {
        /// Path to the policy configuration YAML file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dagflow::logging::init(&dagflow::logging::LogConfig::default()).ok();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo { policy } => run_demo(policy).await,
        Command::CheckPolicy { path } => check_policy(&path),
    }
}

async fn run_demo(policy_path: Option<PathBuf>) -> Result<()> {
    let mut graph = WorkflowGraph::new();
    let exec = || -> Arc<dyn dagflow::NodeExecutor> { Arc::new(ConstExecutor::default()) };
    graph.add_node(Node::custom("fetch", exec())).context("adding fetch node")?;
    graph.add_node(Node::custom("build", exec()).depends_on("fetch")).context("adding build node")?;
    graph.add_node(Node::custom("verify", exec()).depends_on("build")).context("adding verify node")?;

    let store = Arc::new(InMemoryContextStore::new());
    let mut executor = DagExecutor::new(store, ExecutorConfig::default());

    if let Some(path) = policy_path {
        let engine = PolicyConfig::load(&path)
            .context("loading policy config")?
            .into_engine()
            .context("parsing policy gate expressions")?;
        executor = executor.with_policy_engine(Arc::new(engine));
    }

    let handler = Arc::new(CollectingHandler::new());
    executor = executor.on_event(handler.clone());

    let ctx = executor.execute(&graph, serde_json::Value::Null, None).await.context("executing demo workflow")?;

    println!("execution {} finished with status {:?}", ctx.execution_id, ctx.status);
    for event in handler.events() {
        println!("  {:?}", event.kind);
    }

    if ctx.status != ExecutionStatus::Completed {
        anyhow::bail!("demo workflow did not complete successfully");
    }
    Ok(())
}

fn check_policy(path: &PathBuf) -> Result<()> {
    let config = PolicyConfig::load(path).context("loading policy config")?;
    config.into_engine().context("parsing policy gate expressions")?;
    println!("policy config at {} is valid", path.display());
    Ok(())
}
