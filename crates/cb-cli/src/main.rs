use anyhow::{bail, Context, Result};
use cb_core::{Dispatcher, SessionBroker};
use cb_local_db::{
    Database, JobId, JobStore, ProjectId, ProjectStatus, ProjectStore, ProjectUpdate,
};
use cb_peer::PeerSession;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Command Bridge: queue commands for the peer process", long_about = None)]
struct Args {
    /// Path to the ledger database
    #[arg(long, env = "CB_DB_PATH", default_value = "bridge.db")]
    db_path: PathBuf,

    /// Peer host
    #[arg(long, env = "CB_PEER_HOST", default_value = "localhost")]
    peer_host: String,

    /// Peer port
    #[arg(long, env = "CB_PEER_PORT", default_value_t = 9876)]
    peer_port: u16,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Queue a command job, optionally dispatching and waiting for it
    Submit {
        /// Command type understood by the peer (e.g. get_scene_info)
        command_type: String,

        /// Command parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Project to attach the job to
        #[arg(long)]
        project: Option<String>,

        /// Dispatch now and block until the job reaches a terminal state
        #[arg(long)]
        wait: bool,
    },

    /// Show one job's full record
    Status {
        job_id: String,
    },

    /// List jobs waiting in the queue
    Jobs,

    /// Manage projects
    Projects {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Probe the peer connection
    Ping,

    /// Delete completed and failed jobs older than the given age
    Clean {
        #[arg(long, default_value_t = 24)]
        max_age_hours: i64,
    },

    /// Run the queue worker: drain pending jobs and clean up periodically
    Run {
        /// Idle sleep between queue polls, in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_interval_ms: u64,

        /// Seconds between cleanup passes
        #[arg(long, default_value_t = 3600)]
        cleanup_interval_secs: u64,

        /// Age after which terminal jobs are cleaned up, in hours
        #[arg(long, default_value_t = 24)]
        max_age_hours: i64,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// List projects, most recently updated first
    List {
        /// Filter by status (active, archived)
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Create a project
    Create {
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        file_path: String,
    },

    /// Archive a project
    Archive {
        project_id: String,
    },

    /// Delete a project and all of its jobs
    Delete {
        project_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let db = Database::open(&args.db_path)
        .with_context(|| format!("opening ledger at {}", args.db_path.display()))?;
    let jobs = JobStore::new(db.clone());
    let projects = ProjectStore::new(db);

    let session = PeerSession::new(args.peer_host.clone(), args.peer_port);
    let broker = Arc::new(SessionBroker::new(session));
    let dispatcher = Dispatcher::new(jobs.clone(), broker.clone());

    match args.command {
        CliCommand::Submit {
            command_type,
            params,
            project,
            wait,
        } => {
            let params = parse_params(&params)?;
            let project_id = project.map(ProjectId::from);
            let job_id = jobs
                .add_job(&command_type, params, project_id.as_ref())
                .context("queueing job")?;
            println!("{}", job_id);

            if wait {
                let handle = dispatcher.spawn(job_id.clone());
                handle.join().await;
                print_job(&jobs, &job_id)?;
            }
        }

        CliCommand::Status { job_id } => {
            print_job(&jobs, &JobId::from(job_id))?;
        }

        CliCommand::Jobs => {
            for job in jobs.list_pending_jobs().context("listing pending jobs")? {
                println!(
                    "{}  {}  {}  {}",
                    job.id,
                    job.status,
                    job.created_at.to_rfc3339(),
                    job.command_type
                );
            }
        }

        CliCommand::Projects { action } => run_project_action(&projects, action)?,

        CliCommand::Ping => {
            if broker.is_alive().await {
                println!("peer is alive");
            } else {
                bail!(
                    "peer at {}:{} did not answer the liveness probe",
                    args.peer_host,
                    args.peer_port
                );
            }
        }

        CliCommand::Clean { max_age_hours } => {
            let deleted = jobs
                .clean_old_jobs(chrono::Duration::hours(max_age_hours))
                .context("cleaning old jobs")?;
            println!("deleted {} old job(s)", deleted);
        }

        CliCommand::Run {
            poll_interval_ms,
            cleanup_interval_secs,
            max_age_hours,
        } => {
            run_worker(
                &jobs,
                &dispatcher,
                Duration::from_millis(poll_interval_ms),
                Duration::from_secs(cleanup_interval_secs),
                max_age_hours,
            )
            .await;
        }
    }

    Ok(())
}

fn parse_params(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context("parsing --params")?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("--params must be a JSON object, got {}", other),
    }
}

fn print_job(jobs: &JobStore, job_id: &JobId) -> Result<()> {
    match jobs.get_job(job_id).context("reading job")? {
        Some(job) => {
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        None => bail!("job {} not found", job_id),
    }
}

fn run_project_action(projects: &ProjectStore, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::List { status, limit } => {
            let status = status
                .as_deref()
                .map(ProjectStatus::parse)
                .transpose()
                .context("parsing --status")?;
            for project in projects.list_projects(status, limit).context("listing projects")? {
                println!(
                    "{}  {}  {}  {}",
                    project.id,
                    project.status,
                    project.updated_at.to_rfc3339(),
                    project.name
                );
            }
        }

        ProjectAction::Create {
            name,
            description,
            file_path,
        } => {
            let id = projects
                .create_project(&name, &description, &file_path, Map::new())
                .context("creating project")?;
            println!("{}", id);
        }

        ProjectAction::Archive { project_id } => {
            let updated = projects.update_project(
                &ProjectId::from(project_id.as_str()),
                ProjectUpdate {
                    status: Some(ProjectStatus::Archived),
                    ..Default::default()
                },
            )?;
            if !updated {
                bail!("project {} not found", project_id);
            }
        }

        ProjectAction::Delete { project_id } => {
            let deleted = projects.delete_project(&ProjectId::from(project_id.as_str()))?;
            if !deleted {
                bail!("project {} not found", project_id);
            }
        }
    }
    Ok(())
}

/// Drain the queue until interrupted. A dispatch in flight when the signal
/// arrives finishes writing its terminal state before the loop exits; jobs
/// still pending stay queued for the next worker.
async fn run_worker(
    jobs: &JobStore,
    dispatcher: &Dispatcher,
    poll_interval: Duration,
    cleanup_interval: Duration,
    max_age_hours: i64,
) {
    info!("Worker started; press Ctrl+C to stop");

    let mut cleanup = tokio::time::interval(cleanup_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested; stopping worker");
                return;
            }
            _ = cleanup.tick() => {
                match jobs.clean_old_jobs(chrono::Duration::hours(max_age_hours)) {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, "Cleaned up old jobs"),
                    Err(e) => warn!(error = %e, "Cleanup pass failed"),
                }
            }
            // Always-ready arm: the dispatch runs in the branch body, after
            // the race is decided, so a shutdown cannot cancel it mid-job.
            _ = std::future::ready(()) => {
                match dispatcher.dispatch_next().await {
                    Ok(Some(job_id)) => info!(job_id = %job_id, "Dispatched job"),
                    Ok(None) => tokio::time::sleep(poll_interval).await,
                    Err(e) => {
                        warn!(error = %e, "Queue poll failed");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }
    }
}
