//! `timekeep` command-line client.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use timekeep_client::{
    AppState, ClientConfig, DrainReport, EntityCache, LocalStore, SyncError, TimeEntryFilter,
    TimerStop,
};
use timekeep_core::{
    EntityId, NewTimeEntry, Project, StartTimerRequest, Task, TimeEntry, TimeEntryChanges,
    format_elapsed,
};

#[derive(Parser)]
#[command(name = "timekeep")]
#[command(version)]
#[command(about = "Offline-capable time tracking client", long_about = None)]
struct Cli {
    /// Never contact the server; queue every change
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start, stop or inspect the running timer
    #[command(subcommand)]
    Timer(TimerCommand),

    /// Manage time entries
    #[command(subcommand)]
    Entry(EntryCommand),

    /// Replay queued changes and refresh the local cache
    Sync,

    /// List changes waiting to be synced
    Queue,

    /// List cached projects
    Projects,

    /// List cached tasks
    Tasks {
        #[arg(long)]
        project: Option<EntityId>,
    },

    /// Keep syncing in the background and show the running timer until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
enum TimerCommand {
    Start {
        #[arg(long)]
        project: EntityId,
        #[arg(long)]
        task: Option<EntityId>,
        #[arg(long)]
        notes: Option<String>,
    },
    Stop,
    Status,
}

#[derive(Subcommand)]
enum EntryCommand {
    /// Record a block of time
    Add {
        #[arg(long)]
        project: EntityId,
        #[arg(long)]
        task: Option<EntityId>,
        /// RFC 3339 start time
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        billable: bool,
    },
    /// Change fields of an entry
    Edit {
        id: EntityId,
        #[command(flatten)]
        changes: EntryChanges,
    },
    /// Delete an entry
    Rm { id: EntityId },
    /// List cached entries
    List,
}

#[derive(Args)]
struct EntryChanges {
    #[arg(long)]
    project: Option<EntityId>,
    #[arg(long)]
    task: Option<EntityId>,
    #[arg(long)]
    start: Option<DateTime<Utc>>,
    #[arg(long)]
    end: Option<DateTime<Utc>>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    billable: Option<bool>,
}

impl From<EntryChanges> for TimeEntryChanges {
    fn from(args: EntryChanges) -> Self {
        TimeEntryChanges {
            project_id: args.project,
            task_id: args.task,
            start_time: args.start,
            end_time: args.end,
            notes: args.notes,
            billable: args.billable,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::from_env()?;

    let default_filter = if matches!(cli.command, Commands::Watch) { "info" } else { "warn" };
    timekeep_observability::init_with_filter(config.log_format, default_filter);

    let app = AppState::open(config, cli.offline).await?;
    let result = execute(&app, cli.command).await;
    app.close().await;
    result
}

async fn execute(app: &AppState, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Timer(cmd) => timer(app, cmd).await,
        Commands::Entry(cmd) => entry(app, cmd).await,
        Commands::Sync => {
            let report = drain(app).await?;
            if app.sync_manager.refresh_all().await? {
                println!("Cache refreshed.");
            }
            if !report.ran() {
                println!("Offline: {} changes stay queued.", app.store.list_queue().await?.len());
            }
            Ok(())
        }
        Commands::Queue => {
            let queue = app.store.list_queue().await?;
            if queue.is_empty() {
                println!("Nothing queued.");
            }
            for op in queue {
                println!(
                    "{}  {:<18} {}  retries={}  {}",
                    op.created_at.format("%Y-%m-%d %H:%M:%S"),
                    op.kind(),
                    op.id,
                    op.retry_count,
                    op.operation.payload()
                );
            }
            Ok(())
        }
        Commands::Projects => {
            refresh_quietly(app.sync_manager.refresh_projects().await);
            let projects: Vec<Project> = app.store.all_entities().await?;
            for p in projects {
                println!("{:>6}  {}  [{}]", p.id, p.name, p.status);
            }
            Ok(())
        }
        Commands::Tasks { project } => {
            refresh_quietly(app.sync_manager.refresh_tasks(project).await);
            let tasks: Vec<Task> = app.store.all_entities().await?;
            for t in tasks.iter().filter(|t| project.is_none_or(|p| t.project_id == p)) {
                println!("{:>6}  {}  (project {})  [{}]", t.id, t.name, t.project_id, t.status);
            }
            Ok(())
        }
        Commands::Watch => watch(app).await,
    }
}

async fn timer(app: &AppState, cmd: TimerCommand) -> anyhow::Result<()> {
    restore_timer(app).await;
    match cmd {
        TimerCommand::Start {
            project,
            task,
            notes,
        } => {
            let timer = app
                .timer
                .start(StartTimerRequest {
                    project_id: project,
                    task_id: task,
                    notes,
                })
                .await?;
            if timer.confirmed {
                println!("Timer started for project {}.", timer.project_id);
            } else {
                println!("Timer started for project {} (offline, will sync).", timer.project_id);
            }
        }
        TimerCommand::Stop => match app.timer.stop().await? {
            TimerStop::Stopped(Some(entry)) => {
                let seconds = entry.duration_seconds.unwrap_or_default();
                println!(
                    "Timer stopped: {} recorded as entry {}.",
                    format_elapsed(chrono::Duration::seconds(seconds)),
                    entry.id
                );
            }
            TimerStop::Stopped(None) => println!("Timer stopped."),
            TimerStop::AlreadyStopped => println!("No timer is running."),
            TimerStop::Queued => println!("Timer stopped (offline, will sync)."),
        },
        TimerCommand::Status => match app.timer.active().await {
            Some(timer) => println!(
                "Running for project {}: {}{}",
                timer.project_id,
                format_elapsed(timer.elapsed(Utc::now())),
                if timer.confirmed { "" } else { " (not yet synced)" }
            ),
            None => println!("No timer is running."),
        },
    }
    Ok(())
}

async fn entry(app: &AppState, cmd: EntryCommand) -> anyhow::Result<()> {
    match cmd {
        EntryCommand::Add {
            project,
            task,
            start,
            end,
            notes,
            billable,
        } => {
            let local_id = app
                .sync_manager
                .queue_create_time_entry(NewTimeEntry {
                    project_id: project,
                    task_id: task,
                    start_time: start,
                    end_time: end,
                    notes,
                    billable,
                })
                .await?;
            drain(app).await?;
            match app.store.resolve_alias(local_id).await? {
                Some(id) => println!("Created entry {id}."),
                None => println!("Entry queued as {local_id}; it will sync when the server is reachable."),
            }
        }
        EntryCommand::Edit { id, changes } => {
            app.sync_manager
                .queue_update_time_entry(id, changes.into())
                .await?;
            report_write(drain(app).await?);
        }
        EntryCommand::Rm { id } => {
            app.sync_manager.queue_delete_time_entry(id).await?;
            report_write(drain(app).await?);
        }
        EntryCommand::List => {
            refresh_quietly(
                app.sync_manager
                    .refresh_time_entries(&TimeEntryFilter::default())
                    .await,
            );
            let entries: Vec<TimeEntry> = app.store.all_entities().await?;
            for e in entries {
                let duration = match e.duration_seconds {
                    Some(secs) => format_elapsed(chrono::Duration::seconds(secs)),
                    None if e.is_running() => "running".to_string(),
                    None => "-".to_string(),
                };
                println!(
                    "{:>6}  {}  project {}  {:>10}  {}",
                    e.id,
                    e.start_time.format("%Y-%m-%d %H:%M"),
                    e.project_id,
                    duration,
                    e.notes.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

/// Drain once and surface what the user must act on.
async fn drain(app: &AppState) -> anyhow::Result<DrainReport> {
    let report = match app.sync_manager.drain().await {
        Ok(report) => report,
        Err(SyncError::Unauthorized) => {
            anyhow::bail!("the server rejected your credential; set TIMEKEEP_TOKEN and run `timekeep sync`")
        }
        Err(err) => return Err(err.into()),
    };
    app.timer.reconcile(&report).await;

    for rejection in &report.rejected {
        eprintln!("Rejected {}: {}", rejection.operation.kind(), rejection.reason);
    }
    for dropped in &report.dropped {
        eprintln!(
            "Gave up on {} queued at {} after repeated failures.",
            dropped.kind(),
            dropped.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if report.ran() && !report.synced.is_empty() {
        println!("Synced {} queued changes.", report.synced.len());
    }
    Ok(report)
}

fn report_write(report: DrainReport) {
    if !report.ran() || !report.deferred.is_empty() {
        println!("Change queued; it will sync when the server is reachable.");
    }
}

async fn restore_timer(app: &AppState) {
    if let Err(err) = app.timer.restore().await {
        tracing::warn!("could not determine the running timer: {}", err);
    }
}

/// Cached data is still shown when a refresh is impossible.
fn refresh_quietly<T>(result: Result<T, SyncError>) {
    match result {
        Ok(_) | Err(SyncError::Offline) => {}
        Err(err) => tracing::warn!("refresh failed, showing cached data: {}", err),
    }
}

async fn watch(app: &AppState) -> anyhow::Result<()> {
    restore_timer(app).await;
    let (workers, mut elapsed) = app.start_workers();
    tracing::info!("watching; press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = elapsed.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = (*elapsed.borrow_and_update()).clone();
                match current {
                    Some(display) => println!("timer: {display}"),
                    None => println!("timer: idle"),
                }
            }
        }
    }

    for worker in workers {
        worker.shutdown().await;
    }
    Ok(())
}
