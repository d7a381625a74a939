mod stack;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use converge_core::cloud::Cloud;
use converge_core::cloud::simulated::SimulatedProvider;
use converge_core::{
    CreateOutcome, DeleteOutcome, DependencyPlanner, DestroyMode, Engine, EngineConfig,
    ResourceId, ResourceStore, ResourceStorer, StateBackend,
};
use converge_state::{BackendConfig, LocalBackend, create_backend};

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "A minimal infrastructure provisioning engine", long_about = None)]
struct Cli {
    /// Path to the state file
    #[arg(long, global = true, default_value = LocalBackend::DEFAULT_STATE_FILE)]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the creation order of the demo stack
    Plan,
    /// Create or update every resource of the demo stack
    Apply {
        /// Destroy what this run created if a later step fails
        #[arg(long)]
        rollback: bool,

        /// Do not call update when the recorded input is unchanged
        #[arg(long)]
        skip_unchanged: bool,

        /// Make creation of this resource fail (simulated provider only)
        #[arg(long, value_name = "ID")]
        fail_on: Option<String>,
    },
    /// Destroy every resource of the demo stack
    Destroy {
        /// Attempt every deletion even after a failure
        #[arg(long)]
        keep_going: bool,
    },
    /// Inspect or edit the state file
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List recorded resources
    List,
    /// Print the record of one resource
    Show { id: String },
    /// Forget a resource without touching the provider
    Rm { id: String },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan => run_plan(&cli.state).await,
        Commands::Apply {
            rollback,
            skip_unchanged,
            fail_on,
        } => {
            let config = EngineConfig {
                rollback,
                skip_unchanged,
                ..EngineConfig::default()
            };
            run_apply(&cli.state, config, fail_on.as_deref()).await
        }
        Commands::Destroy { keep_going } => {
            let config = EngineConfig {
                destroy_mode: if keep_going {
                    DestroyMode::Continue
                } else {
                    DestroyMode::Halt
                },
                ..EngineConfig::default()
            };
            run_destroy(&cli.state, config).await
        }
        Commands::State { command } => run_state_command(&cli.state, command).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn state_store(state: &Path) -> Result<ResourceStore<Box<dyn StateBackend>>, String> {
    log::debug!("Using state file {}", state.display());
    let config = BackendConfig::local(state.to_string_lossy());
    let backend = create_backend(&config).map_err(|e| e.to_string())?;
    Ok(ResourceStore::new(backend))
}

/// Load state and declare the demo stack against the simulated provider
async fn open_stack(
    state: &Path,
    config: EngineConfig,
    provider: &SimulatedProvider,
) -> Result<Cloud<SimulatedProvider>, String> {
    let builder = Engine::builder()
        .planner(DependencyPlanner::new())
        .store(state_store(state)?)
        .config(config);
    let mut cloud = Cloud::new(provider, builder)
        .await
        .map_err(|e| e.to_string())?;
    stack::declare(&mut cloud).map_err(|e| format!("Invalid stack: {}", e))?;
    Ok(cloud)
}

fn describe(cloud: &Cloud<SimulatedProvider>, id: &ResourceId) -> String {
    match cloud.engine().kind(id) {
        Some(kind) => format!("{} ({})", id, kind),
        None => id.to_string(),
    }
}

async fn run_plan(state: &Path) -> Result<(), String> {
    let provider = SimulatedProvider::new();
    let cloud = open_stack(state, EngineConfig::default(), &provider).await?;
    let order = cloud.plan().map_err(|e| e.to_string())?;

    let recorded = cloud.engine().store();
    println!("{}", "Execution Plan:".cyan().bold());
    println!();
    for id in &order {
        let exists = recorded.exists(id).map_err(|e| e.to_string())?;
        if exists {
            println!("  {} {}", "~".yellow(), describe(&cloud, id));
        } else {
            println!("  {} {}", "+".green(), describe(&cloud, id));
        }
    }
    println!();
    println!("Plan: {} resource(s) in creation order", order.len());
    Ok(())
}

async fn run_apply(state: &Path, config: EngineConfig, fail_on: Option<&str>) -> Result<(), String> {
    let provider = SimulatedProvider::new();
    let rollback = config.rollback;
    let mut cloud = open_stack(state, config, &provider).await?;

    if let Some(id) = fail_on {
        fail_resource(&cloud, &provider, &ResourceId::new(id))?;
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();

    match cloud.apply().await {
        Ok(report) => {
            for (id, outcome) in &report.outcomes {
                let marker = match outcome {
                    CreateOutcome::Created => "+".green(),
                    CreateOutcome::Updated => "~".yellow(),
                    CreateOutcome::Unchanged => "=".dimmed(),
                };
                println!("  {} {} {}", "✓".green(), marker, describe(&cloud, id));
            }
            println!();
            println!("{}", report.to_string().green().bold());
            Ok(())
        }
        Err(e) => {
            if let Some(id) = e.resource_id() {
                println!("  {} {}", "✗".red(), describe(&cloud, id));
            }
            println!();
            if rollback {
                println!("{}", "Changes from this run were rolled back.".yellow());
            } else {
                println!(
                    "{}",
                    "Resources created before the failure were kept; run apply again to resume."
                        .yellow()
                );
            }
            Err(format!("Apply failed: {}", e))
        }
    }
}

/// Make the simulated creation of exactly one declared resource fail
fn fail_resource(
    cloud: &Cloud<SimulatedProvider>,
    provider: &SimulatedProvider,
    id: &ResourceId,
) -> Result<(), String> {
    let engine = cloud.engine();
    let kind = engine
        .kind(id)
        .ok_or_else(|| format!("Unknown resource: {}", id))?;
    let declared = engine.declared_input(id).map_err(|e| e.to_string())?;
    if !provider
        .fail_create_matching(kind, declared)
        .map_err(|e| e.to_string())?
    {
        return Err(format!("Cannot inject failures for kind {}", kind));
    }
    log::debug!("Creation of {} ({}) will fail", id, kind);
    Ok(())
}

async fn run_destroy(state: &Path, config: EngineConfig) -> Result<(), String> {
    let provider = SimulatedProvider::new();
    let mut cloud = open_stack(state, config, &provider).await?;

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let report = cloud
        .destroy()
        .await
        .map_err(|e| format!("Destroy failed: {}", e))?;
    for (id, outcome) in &report.outcomes {
        match outcome {
            DeleteOutcome::Deleted => {
                println!("  {} {} {}", "✓".green(), "-".red(), describe(&cloud, id))
            }
            DeleteOutcome::AlreadyAbsent => println!(
                "  {} {} {}",
                "✓".green(),
                "-".red(),
                format!("{} (already gone)", describe(&cloud, id)).dimmed()
            ),
            DeleteOutcome::NotRecorded => println!(
                "  {} {}",
                "·".dimmed(),
                format!("{} (not recorded)", describe(&cloud, id)).dimmed()
            ),
        }
    }
    println!();
    println!("{}", report.to_string().green().bold());
    Ok(())
}

async fn run_state_command(state: &Path, command: StateCommands) -> Result<(), String> {
    let store = state_store(state)?;
    store
        .load()
        .await
        .map_err(|e| format!("Failed to load state: {}", e))?;

    match command {
        StateCommands::List => {
            let ids = store.ids().map_err(|e| e.to_string())?;
            if ids.is_empty() {
                println!("{}", "No resources recorded.".yellow());
            }
            for id in ids {
                let record = read_record(&store, &id)?;
                println!("{}  {}", id.to_string().bold(), record["providerId"]);
            }
            Ok(())
        }
        StateCommands::Show { id } => {
            let record = read_record(&store, &ResourceId::new(id))?;
            let pretty = serde_json::to_string_pretty(&record).map_err(|e| e.to_string())?;
            println!("{}", pretty);
            Ok(())
        }
        StateCommands::Rm { id } => {
            let id = ResourceId::new(id);
            if !store.exists(&id).map_err(|e| e.to_string())? {
                return Err(format!("No record for resource: {}", id));
            }
            store.delete(&id).map_err(|e| e.to_string())?;
            store
                .save()
                .await
                .map_err(|e| format!("Failed to save state: {}", e))?;
            println!("Removed {} from state", id.to_string().bold());
            Ok(())
        }
    }
}

fn read_record(store: &dyn ResourceStorer, id: &ResourceId) -> Result<serde_json::Value, String> {
    let bytes = store.get(id).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| format!("Corrupted record {}: {}", id, e))
}
