use clap::Parser;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use taskflow_worker::{LogFormat, SimulatedProcessor, TaskFlow, TaskFlowConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SAMPLE_TASK_NAMES: &[&str] = &[
    "Process user registration",
    "Send welcome email",
    "Generate report",
    "Backup database",
    "Update user profile",
    "Send notification",
    "Process payment",
    "Generate invoice",
    "Update inventory",
    "Send marketing email",
];

#[derive(Parser, Debug)]
#[command(name = "tf-worker")]
#[command(about = "Priority task dispatch demo worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Data directory (overrides the configuration file)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Number of worker threads
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Number of sample tasks to enqueue before starting
    #[arg(short, long, default_value = "20")]
    tasks: usize,

    /// Fraction of tasks the simulated processor fails
    #[arg(long, default_value = "0.1")]
    failure_rate: f64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        TaskFlowConfig::from_file(config_path)?
    } else {
        TaskFlowConfig::default()
    };

    // Override with CLI args
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.into();
    }
    if let Some(concurrency) = args.concurrency {
        config.worker.concurrency = concurrency;
    }
    if args.json_logs {
        config.monitoring.log_format = LogFormat::Json;
    }

    init_tracing(&config);

    let processor = Arc::new(SimulatedProcessor::new(100, 500, args.failure_rate));
    let flow = Arc::new(TaskFlow::open(config, processor)?);

    let recovery = flow.recovery();
    if recovery.restored > 0 {
        println!(
            "Recovered {} pending task(s) ({} interrupted)",
            recovery.restored, recovery.released
        );
    }

    println!("1. Generating sample tasks...");
    seed_sample_tasks(&flow, args.tasks)?;
    println!("Queue size: {}\n", flow.stats().queue_size);

    println!("2. Starting task worker...");
    flow.start()?;

    println!("3. Processing tasks...\n");
    let mut progress = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
            _ = progress.tick() => {
                let stats = flow.stats();
                println!(
                    "Status - Pending: {}, Processing: {}, Completed: {}, Failed: {}",
                    stats.pending_count,
                    stats.processing_count,
                    stats.completed_count,
                    stats.failed_count
                );
                if stats.queue_size == 0 && stats.processing_count == 0 {
                    break;
                }
            }
        }
    }

    println!("\n4. Stopping worker...");
    let stopping = flow.clone();
    tokio::task::spawn_blocking(move || stopping.shutdown(true)).await??;

    let stats = flow.stats();
    println!("\n5. Final Results:");
    println!("Tasks in store: {}", flow.store().list_all()?.len());
    println!("Successful: {}", stats.completed_count);
    println!("Failed: {}", stats.failed_count);

    let backup = flow.backup()?;
    println!("Backup created: {}", backup.display());

    println!("\n{}", flow.metrics().render());
    Ok(())
}

fn init_tracing(config: &TaskFlowConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.monitoring.log_level.clone().into());

    match config.monitoring.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}

fn seed_sample_tasks(flow: &TaskFlow, count: usize) -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    for i in 0..count {
        let name = SAMPLE_TASK_NAMES
            .choose(&mut rng)
            .copied()
            .unwrap_or("Sample task");
        let priority = rng.gen_range(1..=5);
        let payload = json!({
            "user_id": format!("user_{}", i),
            "data": format!("sample_data_{}", i),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        flow.submit(name, priority, payload, 0)?;
    }
    Ok(())
}
