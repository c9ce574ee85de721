use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use r_maestro::config::{ManagerConfig, WorkerConfig};
use r_maestro::manager::manager as manager_loops;
use r_maestro::manager::{HttpWorkerClient, Manager, ManagerServer};
use r_maestro::scheduler::SchedulerKind;
use r_maestro::server::install_shutdown_handler;
use r_maestro::tasks::docker::DockerClient;
use r_maestro::worker::worker as worker_loops;
use r_maestro::worker::{TaskServer, Worker};

#[derive(Parser, Debug)]
#[command(name = "r_maestro")]
#[command(version)]
#[command(about = "A small container orchestrator: one manager, many workers")]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a worker that executes tasks in Docker
    Worker(WorkerArgs),

    /// Run the manager against a set of workers
    Manager(ManagerArgs),

    /// Run a manager and a single local worker in one process
    Standalone {
        #[command(flatten)]
        worker: WorkerArgs,

        /// Address for the manager API
        #[arg(long, default_value = "127.0.0.1:8081")]
        manager_addr: SocketAddr,

        #[arg(long, value_enum, default_value_t = SchedulerKind::RoundRobin)]
        scheduler: SchedulerKind,
    },
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Worker name, used in logs
    #[arg(long, default_value = "worker-1")]
    name: String,

    /// Address for the worker API
    #[arg(long, env = "MAESTRO_WORKER_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Seconds between queue drains
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    run_interval: u64,

    /// Seconds between container inspections
    #[arg(long, default_value = "15", value_parser = clap::value_parser!(u64).range(1..))]
    reconcile_interval: u64,
}

#[derive(Parser, Debug)]
struct ManagerArgs {
    /// Address for the manager API
    #[arg(long, env = "MAESTRO_MANAGER_ADDR", default_value = "127.0.0.1:8081")]
    addr: SocketAddr,

    /// Worker addresses (comma-separated, format: "host:port")
    #[arg(long, value_delimiter = ',', required = true)]
    workers: Vec<String>,

    #[arg(long, value_enum, default_value_t = SchedulerKind::RoundRobin)]
    scheduler: SchedulerKind,

    /// Transport failures tolerated per event before it is dead-lettered
    #[arg(long, default_value = "5")]
    max_dispatch_attempts: u32,
}

impl WorkerArgs {
    fn config(&self) -> WorkerConfig {
        WorkerConfig {
            run_interval: Duration::from_secs(self.run_interval),
            reconcile_interval: Duration::from_secs(self.reconcile_interval),
            ..WorkerConfig::new(&self.name, self.addr)
        }
    }
}

impl ManagerArgs {
    fn config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.addr).with_scheduler(self.scheduler);
        config.workers = self.workers.clone();
        config.max_dispatch_attempts = self.max_dispatch_attempts;
        config
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn spawn_worker(
    tasks: &mut JoinSet<()>,
    config: WorkerConfig,
    shutdown: &CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let executor = Arc::new(DockerClient::connect()?);
    let worker = Arc::new(Worker::new(&config.name, executor));

    tasks.spawn(worker_loops::run_tasks(
        worker.clone(),
        config.run_interval,
        shutdown.clone(),
    ));
    tasks.spawn(worker_loops::update_tasks(
        worker.clone(),
        config.reconcile_interval,
        shutdown.clone(),
    ));

    let server = TaskServer::new(worker, config.listen_addr);
    let shutdown = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = server.start_server(shutdown.clone()).await {
            error!(error = %e, "Worker API failed");
            shutdown.cancel();
        }
    });
    Ok(())
}

fn spawn_manager(
    tasks: &mut JoinSet<()>,
    config: ManagerConfig,
    shutdown: &CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let client = Arc::new(HttpWorkerClient::new(config.request_timeout)?);
    let manager = Arc::new(Manager::from_config(&config, client));
    info!(workers = ?manager.workers(), scheduler = %config.scheduler, "Manager configured");

    {
        let manager = manager.clone();
        let shutdown = shutdown.clone();
        let interval = config.node_refresh_interval;
        tasks.spawn(async move {
            manager.update_nodes().await;
            manager_loops::update_nodes(manager, interval, shutdown).await;
        });
    }
    tasks.spawn(manager_loops::process_tasks(
        manager.clone(),
        config.dispatch_interval,
        shutdown.clone(),
    ));
    tasks.spawn(manager_loops::update_tasks(
        manager.clone(),
        config.update_interval,
        shutdown.clone(),
    ));

    let server = ManagerServer::new(manager, config.listen_addr);
    let shutdown = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = server.start_server(shutdown.clone()).await {
            error!(error = %e, "Manager API failed");
            shutdown.cancel();
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let shutdown = install_shutdown_handler();
    let mut tasks = JoinSet::new();

    match args.command {
        Commands::Worker(worker_args) => {
            spawn_worker(&mut tasks, worker_args.config(), &shutdown)?;
        }
        Commands::Manager(manager_args) => {
            spawn_manager(&mut tasks, manager_args.config(), &shutdown)?;
        }
        Commands::Standalone {
            worker: worker_args,
            manager_addr,
            scheduler,
        } => {
            let worker_config = worker_args.config();
            let manager_config = ManagerConfig::new(manager_addr)
                .with_worker(&worker_config.listen_addr.to_string())
                .with_scheduler(scheduler);
            spawn_worker(&mut tasks, worker_config, &shutdown)?;
            spawn_manager(&mut tasks, manager_config, &shutdown)?;
        }
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Background task panicked");
            shutdown.cancel();
        }
    }

    info!("Shutdown complete");
    Ok(())
}
