//! PM Console - Main Entry Point
//!
//! Command-line front end for the project management backend. Restores the
//! stored session, then runs one screen-level command.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use pm_console_lib::{
    auth::SessionPhase,
    commands::{self, SessionResponse, TaskForm},
    config::AppConfig,
    guard::{self, GuardDecision, Route},
    logging,
    resources::{RecordId, TaskStatus},
    AppState,
};

#[derive(Debug, Parser)]
#[command(name = "pm-console", version, about = "Project management console client")]
struct Cli {
    /// API base URL
    #[arg(long, env = "PM_API_BASE_URL", global = true)]
    api_url: Option<String>,

    /// Directory for the stored session and logs
    #[arg(long, env = "PM_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Keep the session in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the current session
    Status,
    /// Log in and store the session token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account (does not log in)
    Register {
        /// Defaults to the OS user's full name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: String,
        #[arg(long, env = "PM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Resolve an application path and show what it would render
    Open { path: String },
    /// Organizations
    #[command(subcommand)]
    Orgs(OrgCommand),
    /// Projects within an organization
    #[command(subcommand)]
    Projects(ProjectCommand),
    /// Tasks within a project
    #[command(subcommand)]
    Tasks(TaskCommand),
    /// Recent activity
    Activity,
}

#[derive(Debug, Subcommand)]
enum OrgCommand {
    List,
    Create {
        #[arg(long)]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    List {
        #[arg(long)]
        org: String,
    },
    Create {
        #[arg(long)]
        org: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum TaskCommand {
    List {
        #[arg(long)]
        project: String,
    },
    Create(CreateTaskArgs),
}

#[derive(Debug, Args)]
struct CreateTaskArgs {
    #[arg(long)]
    project: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value_t = TaskStatus::Todo)]
    status: TaskStatus,
    #[arg(long)]
    assignee: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log_dir(), cli.verbose);
    info!("PM Console starting against {}", config.api_base_url);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = &cli.api_url {
        config = config.with_api_base_url(url);
    }
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir.clone());
    }
    Ok(config)
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let state = if cli.ephemeral {
        AppState::ephemeral(&config)
    } else {
        AppState::from_config(&config)
    }
    .context("Failed to initialize API client")?;

    // Logout must work even when the backend is unreachable
    if !matches!(cli.command, Command::Logout) {
        let session = state.session.bootstrap().await;
        if session.phase() == SessionPhase::AnonymousWithError {
            let reason = session.last_error.unwrap_or_default();
            warn!("Stored session discarded: {}", reason);
            eprintln!("Stored session discarded: {reason}");
        }
    }

    let json = cli.json;
    match cli.command {
        Command::Status => print_session(&commands::get_session_status(&state), json),
        Command::Login { email, password } => {
            let status = commands::login(&state, &email, &password).await?;
            print_session(&status, json)
        }
        Command::Register {
            name,
            email,
            password,
        } => {
            let name = name.unwrap_or_else(whoami::realname);
            let created = commands::register(&state, &name, &email, &password).await?;
            if json {
                print_json(&created)
            } else {
                println!("Registered {email}. Log in to continue.");
                Ok(())
            }
        }
        Command::Logout => print_session(&commands::logout(&state), json),
        Command::Open { path } => open(&state, &path, json).await,
        Command::Orgs(OrgCommand::List) => {
            let orgs = commands::list_organizations(&state).await?;
            if json {
                return print_json(&orgs);
            }
            if orgs.is_empty() {
                println!("No organizations yet.");
            }
            for org in orgs {
                println!("{}\t{}", show_id(&org.id), org.name);
            }
            Ok(())
        }
        Command::Orgs(OrgCommand::Create { name }) => {
            let created = commands::create_organization(&state, &name).await?;
            print_created("Organization", &created, json)
        }
        Command::Projects(ProjectCommand::List { org }) => {
            list_projects(&state, &parse_id(&org), json).await
        }
        Command::Projects(ProjectCommand::Create {
            org,
            name,
            description,
        }) => {
            let created =
                commands::create_project(&state, &parse_id(&org), &name, description.as_deref())
                    .await?;
            print_created("Project", &created, json)
        }
        Command::Tasks(TaskCommand::List { project }) => {
            list_tasks(&state, &parse_id(&project), json).await
        }
        Command::Tasks(TaskCommand::Create(args)) => {
            let form = TaskForm {
                title: args.title,
                description: args.description,
                status: args.status,
                assignee_id: args.assignee.as_deref().map(parse_id),
            };
            let created = commands::create_task(&state, &parse_id(&args.project), form).await?;
            print_created("Task", &created, json)
        }
        Command::Activity => list_activity(&state, json).await,
    }
}

/// Navigate to an application path the way the browser router would
async fn open(state: &AppState, path: &str, json: bool) -> Result<()> {
    let (route, decision) = guard::navigate(&state.session.session(), path);
    match decision {
        GuardDecision::Loading => {
            println!("Loading session...");
            Ok(())
        }
        GuardDecision::RedirectToLogin { from } => {
            println!("Redirect to {} (from {})", Route::Auth, from);
            Ok(())
        }
        GuardDecision::Render => match route {
            Route::Landing | Route::Auth => {
                print_session(&commands::get_session_status(state), json)
            }
            Route::Organizations => {
                let orgs = commands::list_organizations(state).await?;
                if json {
                    return print_json(&orgs);
                }
                for org in orgs {
                    println!("{}\t{}", show_id(&org.id), org.name);
                }
                Ok(())
            }
            Route::Projects { org_id } => list_projects(state, &org_id, json).await,
            Route::Tasks { project_id } => list_tasks(state, &project_id, json).await,
            Route::Activity => list_activity(state, json).await,
        },
    }
}

async fn list_projects(state: &AppState, org_id: &RecordId, json: bool) -> Result<()> {
    let projects = commands::list_projects(state, org_id).await?;
    if json {
        return print_json(&projects);
    }
    if projects.is_empty() {
        println!("No projects yet.");
    }
    for project in projects {
        let id = show_id(&project.id);
        match project.description.as_deref().filter(|d| !d.is_empty()) {
            Some(description) => println!("{id}\t{}\t{description}", project.name),
            None => println!("{id}\t{}", project.name),
        }
    }
    Ok(())
}

async fn list_tasks(state: &AppState, project_id: &RecordId, json: bool) -> Result<()> {
    let tasks = commands::list_tasks(state, project_id).await?;
    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No tasks yet.");
    }
    for task in tasks {
        let status = task.status.as_deref().unwrap_or("todo");
        println!("{}\t[{}]\t{}", show_id(&task.id), status, task.title);
    }
    Ok(())
}

async fn list_activity(state: &AppState, json: bool) -> Result<()> {
    let logs = commands::list_activity(state).await?;
    if json {
        return print_json(&logs);
    }
    if logs.is_empty() {
        println!("No activity yet.");
    }
    for log in logs {
        let when = log.created_at_local().unwrap_or_default();
        match log.message.as_deref() {
            Some(message) => println!("{when}\t{}\t{message}", log.action_label()),
            None => println!("{when}\t{}", log.action_label()),
        }
    }
    Ok(())
}

fn print_session(status: &SessionResponse, json: bool) -> Result<()> {
    if json {
        return print_json(status);
    }
    println!("Session:  {}", status.phase);
    if let Some(name) = &status.display_name {
        println!("User:     {name}");
    }
    println!("API:      {}", status.api_base_url);
    if let Some(saved_at) = status.token_saved_at {
        println!("Since:    {}", saved_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
    }
    if let Some(error) = &status.error {
        println!("Error:    {error}");
    }
    Ok(())
}

fn print_created(kind: &str, created: &serde_json::Value, json: bool) -> Result<()> {
    if json {
        return print_json(created);
    }
    match created.get("id") {
        Some(id) => println!("{kind} created ({id})."),
        None => println!("{kind} created."),
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{out}");
    Ok(())
}

fn show_id(id: &Option<RecordId>) -> String {
    id.as_ref().map_or_else(|| "-".to_string(), RecordId::to_string)
}

fn parse_id(raw: &str) -> RecordId {
    RecordId::parse(raw)
}
