use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use std::path::PathBuf;
use taskflow_core::{TaskRecord, TaskStatus};
use taskflow_persistence::DurableStore;
use taskflow_worker::TaskFlowConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "tf-admin")]
#[command(about = "TaskFlow store admin CLI", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Data directory (overrides the configuration file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List stored tasks
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Limit number of results
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Show one task
    Show {
        /// Task ID
        task_id: Uuid,
    },

    /// Count stored tasks by status
    Stats,

    /// Snapshot the store into a backup archive
    Backup,

    /// List backup archives
    Backups,

    /// Replay a backup archive into the store
    Restore {
        /// Backup file
        file: PathBuf,
    },
}

#[derive(Debug, Default, Serialize)]
struct StoreStats {
    pending: usize,
    processing: usize,
    completed: usize,
    failed: usize,
    total: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = if let Some(config_path) = &args.config {
        TaskFlowConfig::from_file(config_path)?
    } else {
        TaskFlowConfig::default()
    };
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    let store = DurableStore::open(config.to_store_config())?;

    match args.command {
        Commands::List { status, limit } => {
            let tasks: Vec<TaskRecord> = store
                .list_all()?
                .into_iter()
                .filter(|task| status.map_or(true, |s| task.status == s))
                .take(limit)
                .collect();

            match args.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&tasks)?),
                "yaml" => println!("{}", serde_yaml::to_string(&tasks)?),
                _ => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["ID", "Name", "Status", "Priority", "Retries", "Updated"]);
                    for task in &tasks {
                        table.add_row(vec![
                            task.id.to_string(),
                            task.name.clone(),
                            task.status.to_string(),
                            task.priority.to_string(),
                            format!("{}/{}", task.retry_count, task.max_retries),
                            task.updated_at.to_rfc3339(),
                        ]);
                    }
                    println!("{table}");
                }
            }
        }

        Commands::Show { task_id } => {
            let task = store.load(&task_id)?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&task)?),
                "yaml" => println!("{}", serde_yaml::to_string(&task)?),
                _ => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Field", "Value"]);
                    table.add_row(vec!["ID", &task.id.to_string()]);
                    table.add_row(vec!["Name", &task.name]);
                    table.add_row(vec!["Status", task.status.as_str()]);
                    table.add_row(vec!["Priority", &task.priority.to_string()]);
                    table.add_row(vec!["Created", &task.created_at.to_rfc3339()]);
                    table.add_row(vec!["Updated", &task.updated_at.to_rfc3339()]);
                    table.add_row(vec![
                        "Retries",
                        &format!("{}/{}", task.retry_count, task.max_retries),
                    ]);
                    table.add_row(vec!["Payload", &task.payload.to_string()]);
                    if let Some(result) = &task.result {
                        table.add_row(vec!["Result", &result.to_string()]);
                    }
                    if let Some(error) = &task.error_message {
                        table.add_row(vec!["Error", error]);
                    }
                    println!("{table}");
                }
            }
        }

        Commands::Stats => {
            let mut stats = StoreStats::default();
            for task in store.list_all()? {
                match task.status {
                    TaskStatus::Pending => stats.pending += 1,
                    TaskStatus::Processing => stats.processing += 1,
                    TaskStatus::Completed => stats.completed += 1,
                    TaskStatus::Failed => stats.failed += 1,
                }
                stats.total += 1;
            }

            match args.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
                "yaml" => println!("{}", serde_yaml::to_string(&stats)?),
                _ => {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Status", "Count"]);
                    table.add_row(vec!["pending".to_string(), stats.pending.to_string()]);
                    table.add_row(vec!["processing".to_string(), stats.processing.to_string()]);
                    table.add_row(vec!["completed".to_string(), stats.completed.to_string()]);
                    table.add_row(vec!["failed".to_string(), stats.failed.to_string()]);
                    table.add_row(vec!["total".to_string(), stats.total.to_string()]);
                    println!("{table}");
                }
            }
        }

        Commands::Backup => {
            let path = store.backup(Utc::now())?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::json!({ "backup": path })),
                "yaml" => println!("backup: {}", path.display()),
                _ => println!("Backup created: {}", path.display()),
            }
        }

        Commands::Backups => {
            let backups = store.list_backups()?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&backups)?),
                "yaml" => println!("{}", serde_yaml::to_string(&backups)?),
                _ => {
                    for backup in &backups {
                        println!("{}", backup.display());
                    }
                }
            }
        }

        Commands::Restore { file } => {
            let restored = store.restore(&file)?;

            match args.format.as_str() {
                "json" => println!("{}", serde_json::json!({ "restored": restored })),
                "yaml" => println!("restored: {}", restored),
                _ => println!("Tasks restored from backup: {}", restored),
            }
        }
    }

    Ok(())
}
