//! Conclave - supervisor orchestration CLI
//!
//! The `conclave` command drives a team of specialist agents through the
//! supervisor graph using a deterministic local worker, with every step
//! checkpointed to a directory on disk.
//!
//! ## Commands
//!
//! - `run`: Plan and execute an objective
//! - `resume`: Continue a stored session
//! - `status`: Show task status of a stored session
//! - `graph`: Print the supervisor graph
//! - `feasibility`: Check whether the catalog covers an objective
//! - `agents`: List the agent catalog
//! - `clear`: Delete the checkpoints of a session

mod local_worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use conclave_core::{
    Agent, AgentCatalog, ExecutionOutcome, OrchestrationConfig, Orchestrator, ResumeOverrides,
};
use conclave_state::FsCheckpointStore;
use serde::Serialize;
use tracing::{info, Level};
use uuid::Uuid;

use local_worker::LocalWorker;

#[derive(Parser)]
#[command(name = "conclave")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Supervisor orchestration for teams of specialist agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding session checkpoints
    #[arg(long, global = true, env = "CONCLAVE_STATE_DIR", default_value = ".conclave")]
    state_dir: PathBuf,

    /// JSON file with the agent catalog (default: built-in specialists)
    #[arg(long, global = true, env = "CONCLAVE_AGENTS")]
    agents: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute an objective
    Run {
        /// What the team should accomplish
        objective: String,

        /// Session id (default: a fresh one)
        #[arg(long, env = "CONCLAVE_SESSION_ID")]
        session: Option<String>,

        /// TOML file with orchestration settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Require consensus before approval
        #[arg(long)]
        consensus: bool,

        /// Maximum agents running at once
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Step budget for this run
        #[arg(long)]
        max_recursion: Option<usize>,

        /// Simulated worker latency in milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,

        /// Agents whose first attempt fails with a recoverable error
        #[arg(long, value_delimiter = ',')]
        flaky: Vec<String>,

        /// Print the full outcome as JSON
        #[arg(long)]
        output_json: bool,
    },

    /// Continue a stored session from its latest checkpoint
    Resume {
        session: String,

        /// Step budget for this run
        #[arg(long)]
        max_recursion: Option<usize>,

        /// Maximum agents running at once
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Print the full outcome as JSON
        #[arg(long)]
        output_json: bool,
    },

    /// Show task status of a stored session
    Status {
        session: String,

        /// Print as JSON
        #[arg(long)]
        output_json: bool,
    },

    /// Print the supervisor graph
    Graph {
        /// Print as JSON
        #[arg(long)]
        output_json: bool,
    },

    /// Check whether the agent catalog covers an objective
    Feasibility { objective: String },

    /// List the agent catalog
    Agents,

    /// Delete the checkpoints of a session
    Clear { session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    conclave_core::telemetry::init_tracing(cli.json, level);

    let catalog = load_catalog(cli.agents.as_deref())?;
    let state_dir = cli.state_dir;

    match cli.command {
        Commands::Run {
            objective,
            session,
            config,
            consensus,
            max_parallel,
            max_recursion,
            latency_ms,
            flaky,
            output_json,
        } => {
            let mut config = load_config(config.as_deref(), session)?;
            config.consensus_required |= consensus;
            if let Some(n) = max_parallel {
                config.max_parallel_agents = n;
            }
            if let Some(n) = max_recursion {
                config.max_recursion = n;
            }
            let worker = LocalWorker::new(Duration::from_millis(latency_ms)).with_flaky(flaky);
            let orch = orchestrator(&state_dir, catalog, worker)?;
            cmd_run(&orch, &objective, config, output_json).await
        }
        Commands::Resume {
            session,
            max_recursion,
            max_parallel,
            output_json,
        } => {
            let orch = orchestrator(&state_dir, catalog, LocalWorker::new(Duration::ZERO))?;
            let overrides = ResumeOverrides {
                max_recursion,
                max_parallel_agents: max_parallel,
                ..Default::default()
            };
            cmd_resume(&orch, &session, overrides, output_json).await
        }
        Commands::Status {
            session,
            output_json,
        } => {
            let orch = orchestrator(&state_dir, catalog, LocalWorker::new(Duration::ZERO))?;
            cmd_status(&orch, &session, output_json).await
        }
        Commands::Graph { output_json } => {
            let orch = orchestrator(&state_dir, catalog, LocalWorker::new(Duration::ZERO))?;
            cmd_graph(&orch, output_json)
        }
        Commands::Feasibility { objective } => {
            let orch = orchestrator(&state_dir, catalog, LocalWorker::new(Duration::ZERO))?;
            cmd_feasibility(&orch, &objective).await
        }
        Commands::Agents => {
            let orch = orchestrator(&state_dir, catalog, LocalWorker::new(Duration::ZERO))?;
            cmd_agents(&orch).await
        }
        Commands::Clear { session } => {
            let orch = orchestrator(&state_dir, catalog, LocalWorker::new(Duration::ZERO))?;
            cmd_clear(&orch, &session).await
        }
    }
}

fn orchestrator(state_dir: &Path, catalog: AgentCatalog, worker: LocalWorker) -> Result<Orchestrator> {
    let store = FsCheckpointStore::new(state_dir)
        .with_context(|| format!("Failed to open state directory {}", state_dir.display()))?;
    Ok(Orchestrator::new(Arc::new(worker), Arc::new(store)).with_catalog(catalog))
}

fn load_catalog(path: Option<&Path>) -> Result<AgentCatalog> {
    let Some(path) = path else {
        return Ok(AgentCatalog::default_specialists());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read agent catalog {}", path.display()))?;
    let agents: Vec<Agent> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid agent catalog {}", path.display()))?;
    AgentCatalog::from_agents(agents).context("Invalid agent catalog")
}

/// Settings from an optional TOML file. An explicit session id wins over the
/// file's; a fresh one is generated when neither is given.
fn load_config(path: Option<&Path>, session: Option<String>) -> Result<OrchestrationConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<OrchestrationConfig>(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => OrchestrationConfig::default(),
    };

    if let Some(id) = session {
        config.session_id = id;
    } else if config.session_id.trim().is_empty() {
        config.session_id = format!("session-{}", Uuid::new_v4());
    }
    config.validate().context("Invalid orchestration settings")?;
    Ok(config)
}

async fn cmd_run(
    orch: &Orchestrator,
    objective: &str,
    config: OrchestrationConfig,
    output_json: bool,
) -> Result<()> {
    if objective.trim().is_empty() {
        bail!("Objective must not be empty");
    }
    let session_id = config.session_id.clone();
    info!(session_id = %session_id, "running objective");

    let outcome = orch.execute(objective, config, None).await;
    print_outcome(&session_id, &outcome, output_json)
}

async fn cmd_resume(
    orch: &Orchestrator,
    session_id: &str,
    overrides: ResumeOverrides,
    output_json: bool,
) -> Result<()> {
    let outcome = orch
        .resume(session_id, overrides)
        .await
        .with_context(|| format!("Failed to resume session '{}'", session_id))?;
    print_outcome(session_id, &outcome, output_json)
}

async fn cmd_status(orch: &Orchestrator, session_id: &str, output_json: bool) -> Result<()> {
    let status = orch
        .get_task_status(session_id)
        .await
        .with_context(|| format!("No stored state for session '{}'", session_id))?;

    if output_json {
        return print_json(&status);
    }

    println!("Session:     {}", status.session_id);
    println!("Phase:       {}", status.phase);
    println!("Checkpoints: {}", status.checkpoint_count);
    println!("Retries:     {}", status.retry_count);
    println!(
        "Tasks:       {} pending, {} in progress, {} completed, {} failed",
        status.pending, status.in_progress, status.completed, status.failed
    );
    println!();
    for task in &status.tasks {
        println!(
            "  {:<28} {:<12} {:<8} {}",
            task.task_id,
            task.agent_id,
            task.priority.to_string(),
            task.status
        );
    }
    Ok(())
}

fn cmd_graph(orch: &Orchestrator, output_json: bool) -> Result<()> {
    let structure = orch
        .get_graph_structure()
        .context("Failed to build supervisor graph")?;

    if output_json {
        return print_json(&structure);
    }

    println!("entry: {}", structure.entry_point);
    for edge in &structure.edges {
        let arrow = if edge.conditional { "-?->" } else { "--->" };
        println!("  {} {} {}", edge.from, arrow, edge.to.join(" | "));
    }
    Ok(())
}

async fn cmd_feasibility(orch: &Orchestrator, objective: &str) -> Result<()> {
    let report = orch.can_handle_objective(objective).await;
    print_json(&report)
}

async fn cmd_agents(orch: &Orchestrator) -> Result<()> {
    let agents = orch.list_agents().await;
    if agents.is_empty() {
        println!("No agents configured.");
        return Ok(());
    }
    for agent in agents {
        println!(
            "{:<12} {:<12} priority {:<2} {}",
            agent.id,
            agent.role.to_string(),
            agent.priority,
            agent.name
        );
    }
    Ok(())
}

async fn cmd_clear(orch: &Orchestrator, session_id: &str) -> Result<()> {
    orch.clear_session(session_id)
        .await
        .with_context(|| format!("Failed to clear session '{}'", session_id))?;
    println!("Cleared session '{}'", session_id);
    Ok(())
}

fn print_outcome(session_id: &str, outcome: &ExecutionOutcome, output_json: bool) -> Result<()> {
    if output_json {
        return print_json(outcome);
    }

    let verdict = if outcome.success { "succeeded" } else { "failed" };
    println!("Session '{}' {}", session_id, verdict);
    println!("Phase:   {}", outcome.state.current_phase);
    println!("Steps:   {}", outcome.steps);
    println!("Elapsed: {}ms", outcome.execution_time_ms);
    if let Some(reason) = &outcome.stop_reason {
        println!("Stopped: {:?}", reason);
    }
    println!();
    for result in &outcome.results {
        match &result.error {
            Some(err) => println!("  {:<28} error: {}", result.task_id, err),
            None => println!("  {:<28} ok", result.task_id),
        }
    }
    for err in &outcome.errors {
        println!("error: {}", err);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{AgentRole, Phase};

    fn local_orchestrator(dir: &Path) -> Orchestrator {
        orchestrator(dir, AgentCatalog::default_specialists(), LocalWorker::new(Duration::ZERO))
            .unwrap()
    }

    #[tokio::test]
    async fn run_then_status_reads_checkpoints_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let orch = local_orchestrator(dir.path());

        cmd_run(
            &orch,
            "Research and analyze market trends",
            OrchestrationConfig::new("cli-run"),
            false,
        )
        .await
        .unwrap();

        let status = orch.get_task_status("cli-run").await.unwrap();
        assert_eq!(status.phase, Phase::Complete);
        assert_eq!(status.failed, 0);
        assert!(dir.path().join("sessions").join("cli-run").is_dir());

        cmd_status(&orch, "cli-run", true).await.unwrap();
    }

    #[tokio::test]
    async fn consensus_run_agrees_with_local_worker() {
        let dir = tempfile::tempdir().unwrap();
        let orch = local_orchestrator(dir.path());
        let mut config = OrchestrationConfig::new("cli-consensus");
        config.consensus_required = true;

        let outcome = orch
            .execute("Research and analyze market trends", config, None)
            .await;
        assert!(outcome.success, "errors: {:?}", outcome.errors);
        assert_eq!(outcome.state.agreement_score(), Some(100.0));
    }

    #[tokio::test]
    async fn resume_unknown_session_fails_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let orch = local_orchestrator(dir.path());

        let err = cmd_resume(&orch, "missing", ResumeOverrides::default(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn clear_removes_session() {
        let dir = tempfile::tempdir().unwrap();
        let orch = local_orchestrator(dir.path());
        orch.execute("Write a summary", OrchestrationConfig::new("cli-clear"), None)
            .await;

        cmd_clear(&orch, "cli-clear").await.unwrap();
        assert!(cmd_status(&orch, "cli-clear", false).await.is_err());
    }

    #[test]
    fn config_file_and_flags_combine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conclave.toml");
        std::fs::write(&path, "consensus_required = true\nmax_parallel_agents = 2\n").unwrap();

        let config = load_config(Some(&path), Some("from-flag".into())).unwrap();
        assert_eq!(config.session_id, "from-flag");
        assert!(config.consensus_required);
        assert_eq!(config.max_parallel_agents, 2);

        let generated = load_config(None, None).unwrap();
        assert!(generated.session_id.starts_with("session-"));
    }

    #[test]
    fn config_file_session_id_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conclave.toml");
        std::fs::write(&path, "session_id = \"nightly\"\n").unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.session_id, "nightly");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conclave.toml");
        std::fs::write(&path, "consensus_threshold = 4.0\n").unwrap();
        assert!(load_config(Some(&path), None).is_err());
    }

    #[test]
    fn agent_catalog_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let agents = vec![
            Agent::new("r1", "Scout", AgentRole::Researcher).with_priority(9),
            Agent::new("w1", "Scribe", AgentRole::Writer),
        ];
        std::fs::write(&path, serde_json::to_string(&agents).unwrap()).unwrap();

        let catalog = load_catalog(Some(&path)).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("r1").unwrap().priority, 9);

        assert_eq!(load_catalog(None).unwrap().len(), 4);
    }
}
