mod cleanup_cmd;
mod config;
mod log_cmd;
mod report_cmd;
mod serve_cmd;
mod status_cmd;
mod worker_cmd;

#[cfg(test)]
mod test_util;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use config::TaskforgeConfig;
use taskforge_db::pool;

#[derive(Parser)]
#[command(name = "taskforge", about = "Orchestrates AI coding agents from task to merged pull request")]
struct Cli {
    /// Database URL (overrides TASKFORGE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a taskforge config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/taskforge")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the taskforge database (requires config file or env vars)
    DbInit,
    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Plan review
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Show project progress and per-task status (omit project_id to list all projects)
    Status {
        /// Project ID to show status for (omit to list all projects)
        project_id: Option<String>,
    },
    /// Show execution log lines for a task
    Log {
        /// Task ID to show logs for
        task_id: String,
        /// Show a specific execution (omit for the most recent)
        #[arg(long)]
        execution_id: Option<String>,
    },
    /// Show execution duration and outcome report for a project
    Report {
        /// Project ID to report on
        project_id: String,
    },
    /// Remove worktrees for finished tasks in a project
    Cleanup {
        /// Project ID to clean up
        project_id: String,
        /// Remove worktrees for every task, not just finished ones
        #[arg(long)]
        all: bool,
    },
    /// Serve the read-only reporting API and the realtime WebSocket hub
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run the job queue consumer: drives tasks through planning and implementation
    Worker,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Register a new project
    Create {
        /// Project name
        name: String,
        /// Main branch to base worktrees on
        #[arg(long, default_value = "main")]
        main_branch: String,
        /// Directory worktrees are created under
        #[arg(long)]
        worktree_base_path: String,
        /// Shell command run once a worktree is created
        #[arg(long)]
        init_script: Option<String>,
        /// Executor adapter to use (e.g. claude-code)
        #[arg(long, default_value = "claude-code")]
        executor_type: String,
        /// Remote repository URL (owner/repo host), needed to open pull requests
        #[arg(long)]
        remote_repository_url: Option<String>,
    },
    /// List all projects
    List,
    /// Show a single project
    Show {
        /// Project ID
        project_id: String,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task and enqueue it for planning
    Create {
        /// Project ID the task belongs to
        project_id: String,
        /// Short task title
        title: String,
        /// Task description, used to prompt the planning agent
        description: String,
    },
    /// List tasks for a project
    List {
        /// Project ID
        project_id: String,
    },
    /// Show a single task
    Show {
        /// Task ID
        task_id: String,
    },
    /// Cancel a task
    Cancel {
        /// Task ID
        task_id: String,
        /// Reason for cancellation
        #[arg(long, default_value = "cancelled by operator")]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Approve a task's plan, enqueueing implementation
    Approve {
        /// Task ID
        task_id: String,
    },
    /// Reject a task's plan, sending it back to planning
    Reject {
        /// Task ID
        task_id: String,
        /// Reason for rejection
        #[arg(long, default_value = "changes requested")]
        reason: String,
    },
}

/// Execute the `taskforge init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection { url: db_url.to_string() },
        code_host: config::CodeHostSection { token: None },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `taskforge db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `taskforge db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = TaskforgeConfig::resolve(cli_db_url);

    println!("Initializing taskforge database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("taskforge db-init complete.");
    Ok(())
}

async fn cmd_project(command: ProjectCommands, pool: &sqlx::PgPool) -> anyhow::Result<()> {
    use taskforge_db::queries::projects;

    match command {
        ProjectCommands::Create { name, main_branch, worktree_base_path, init_script, executor_type, remote_repository_url } => {
            let project = projects::insert_project(
                pool,
                &name,
                &main_branch,
                &worktree_base_path,
                init_script.as_deref(),
                &executor_type,
                remote_repository_url.as_deref(),
            )
            .await?;
            println!("Created project {} ({})", project.name, project.id);
        }
        ProjectCommands::List => {
            let project_list = projects::list_projects(pool).await?;
            if project_list.is_empty() {
                println!("No projects found.");
            }
            for project in &project_list {
                println!("{}  {}  ({})", project.id, project.name, project.main_branch);
            }
        }
        ProjectCommands::Show { project_id } => {
            let id = uuid::Uuid::parse_str(&project_id).with_context(|| format!("invalid project ID: {project_id}"))?;
            let project = projects::get_project(pool, id).await?.with_context(|| format!("project {id} not found"))?;
            println!("{project:#?}");
        }
    }

    Ok(())
}

async fn cmd_task(command: TaskCommands, pool: &sqlx::PgPool) -> anyhow::Result<()> {
    use taskforge_core::queue::{JobQueue, KIND_TASK_PLANNING};
    use taskforge_db::queries::tasks;

    match command {
        TaskCommands::Create { project_id, title, description } => {
            let pid = uuid::Uuid::parse_str(&project_id).with_context(|| format!("invalid project ID: {project_id}"))?;
            let task = tasks::insert_task(pool, pid, &title, &description).await?;

            let queue = JobQueue::new(pool.clone(), "taskforge");
            queue.enqueue(KIND_TASK_PLANNING, &serde_json::json!({ "task_id": task.id })).await?;

            println!("Created task {} ({}), queued for planning", task.title, task.id);
        }
        TaskCommands::List { project_id } => {
            let pid = uuid::Uuid::parse_str(&project_id).with_context(|| format!("invalid project ID: {project_id}"))?;
            let task_list = tasks::list_tasks_for_project(pool, pid).await?;
            if task_list.is_empty() {
                println!("No tasks found.");
            }
            for task in &task_list {
                println!("{}  [{}]  {}", task.id, task.status, task.title);
            }
        }
        TaskCommands::Show { task_id } => {
            let id = uuid::Uuid::parse_str(&task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
            let task = tasks::get_task(pool, id).await?.with_context(|| format!("task {id} not found"))?;
            println!("{task:#?}");
        }
        TaskCommands::Cancel { task_id, reason } => {
            let id = uuid::Uuid::parse_str(&task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
            let task = tasks::get_task(pool, id).await?.with_context(|| format!("task {id} not found"))?;
            taskforge_core::state::dispatch::cancel_task(pool, id, task.status, &reason).await?;
            println!("Task {task_id} cancelled.");
        }
    }

    Ok(())
}

async fn cmd_plan(command: PlanCommands, pool: &sqlx::PgPool) -> anyhow::Result<()> {
    use taskforge_core::queue::{JobQueue, KIND_TASK_IMPLEMENTATION};
    use taskforge_core::state::dispatch;

    match command {
        PlanCommands::Approve { task_id } => {
            let id = uuid::Uuid::parse_str(&task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
            dispatch::approve_plan(pool, id).await?;

            let queue = JobQueue::new(pool.clone(), "taskforge");
            queue.enqueue(KIND_TASK_IMPLEMENTATION, &serde_json::json!({ "task_id": id })).await?;

            println!("Plan for task {task_id} approved, queued for implementation.");
        }
        PlanCommands::Reject { task_id, reason } => {
            let id = uuid::Uuid::parse_str(&task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
            dispatch::reject_plan(pool, id, &reason).await?;

            let queue = JobQueue::new(pool.clone(), "taskforge");
            queue.enqueue(taskforge_core::queue::KIND_TASK_PLANNING, &serde_json::json!({ "task_id": id })).await?;

            println!("Plan for task {task_id} rejected, sent back to planning.");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        }
        Commands::Project { command } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cmd_project(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Task { command } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cmd_task(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plan { command } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cmd_plan(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { project_id } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, project_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Log { task_id, execution_id } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = log_cmd::run_log(&db_pool, &task_id, execution_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Report { project_id } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = report_cmd::run_report(&db_pool, &project_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cleanup { project_id, all } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cleanup_cmd::run_cleanup(&db_pool, &resolved.core, &project_id, all).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let bus = taskforge_core::events::EventBus::new(db_pool.clone());
            serve_cmd::run_serve(db_pool, bus, &bind, port).await?;
        }
        Commands::Worker => {
            let resolved = TaskforgeConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            worker_cmd::run_worker(db_pool, resolved.core).await?;
        }
    }

    Ok(())
}
