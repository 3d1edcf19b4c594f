use crate::application::commands::{
    complete_task_impl, create_task_impl, delete_task_impl, forgot_password_impl, format_due_date,
    list_tasks_impl, login_impl, logout_impl, register_impl, reset_password_impl, update_task_impl,
    whoami_impl, AppState,
};
use crate::domain::forms::TaskForm;
use crate::domain::models::{Task, TaskQuery};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "taskdesk", version, about = "Task manager client for the taskdesk REST API")]
pub struct CliArgs {
    /// Workspace holding `config/app.json` and the stored session.
    #[arg(long, env = "TASKDESK_HOME", global = true)]
    pub workspace: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn", env = "TASKDESK_LOG", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and remember the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TASKDESK_PASSWORD", hide_env_values = true)]
        password: String,
        /// Page to land on afterwards.
        #[arg(long)]
        next: Option<String>,
    },
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TASKDESK_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    /// Ask the server to mail a password-reset link.
    ForgotPassword {
        #[arg(long)]
        email: String,
    },
    ResetPassword {
        #[arg(long)]
        token: String,
        #[arg(long)]
        new_password: String,
        #[arg(long)]
        confirm_password: String,
    },
    Logout,
    /// Resume the stored session and show who is logged in.
    Whoami,
    #[command(subcommand)]
    Tasks(TasksCommand),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Register { .. } => "register",
            Self::ForgotPassword { .. } => "forgot-password",
            Self::ResetPassword { .. } => "reset-password",
            Self::Logout => "logout",
            Self::Whoami => "whoami",
            Self::Tasks(TasksCommand::List { .. }) => "tasks list",
            Self::Tasks(TasksCommand::Add(_)) => "tasks add",
            Self::Tasks(TasksCommand::Complete { .. }) => "tasks complete",
            Self::Tasks(TasksCommand::Edit { .. }) => "tasks edit",
            Self::Tasks(TasksCommand::Delete { .. }) => "tasks delete",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    List {
        /// Only completed tasks.
        #[arg(long, conflicts_with = "pending")]
        done: bool,
        /// Only open tasks.
        #[arg(long)]
        pending: bool,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    Add(TaskFields),
    Complete {
        id: String,
    },
    Edit {
        id: String,
        #[command(flatten)]
        fields: TaskFields,
    },
    Delete {
        id: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct TaskFields {
    #[arg(long, default_value = "")]
    pub title: String,
    #[arg(long, default_value = "")]
    pub description: String,
    /// RFC 3339 timestamp, `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD`.
    #[arg(long, default_value = "")]
    pub due: String,
    /// LOW, MEDIUM or HIGH.
    #[arg(long, default_value = "")]
    pub priority: String,
}

impl From<TaskFields> for TaskForm {
    fn from(fields: TaskFields) -> Self {
        TaskForm {
            title: fields.title,
            description: fields.description,
            due_date: fields.due,
            priority: fields.priority,
        }
    }
}

pub fn init_logging(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn workspace_root(args: &CliArgs) -> Result<PathBuf, InfraError> {
    match &args.workspace {
        Some(path) => Ok(path.clone()),
        None => Ok(std::env::current_dir()?.join(".taskdesk")),
    }
}

/// Runs one command and returns the lines to print.
pub async fn execute(state: &AppState, command: Command) -> Result<Vec<String>, InfraError> {
    let lines = match command {
        Command::Login { email, password, next } => {
            let result = login_impl(state, email, password, next).await?;
            vec![format!("Logged in as {}. Continue at {}", result.email, result.destination)]
        }
        Command::Register {
            email,
            password,
            confirm_password,
        } => {
            let user = register_impl(state, email, password, confirm_password).await?;
            vec![format!("Registered {} (id {}). You can log in now.", user.email, user.id)]
        }
        Command::ForgotPassword { email } => {
            forgot_password_impl(state, email).await?;
            vec!["If the address is registered, a reset link is on its way.".to_string()]
        }
        Command::ResetPassword {
            token,
            new_password,
            confirm_password,
        } => {
            reset_password_impl(state, token, new_password, confirm_password).await?;
            vec!["Password updated. Log in with the new password.".to_string()]
        }
        Command::Logout => {
            let destination = logout_impl(state).await;
            vec![format!("Logged out. Continue at {destination}")]
        }
        Command::Whoami => {
            let whoami = whoami_impl(state).await;
            match whoami.email {
                Some(email) if whoami.authenticated => vec![format!("Logged in as {email}")],
                _ if whoami.authenticated => vec!["Logged in".to_string()],
                _ => vec!["Not logged in".to_string()],
            }
        }
        Command::Tasks(command) => execute_tasks(state, command).await?,
    };
    Ok(lines)
}

async fn execute_tasks(state: &AppState, command: TasksCommand) -> Result<Vec<String>, InfraError> {
    let config = state.config();
    let lines = match command {
        TasksCommand::List {
            done,
            pending,
            limit,
            offset,
        } => {
            let is_completed = match (done, pending) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let page = list_tasks_impl(
                state,
                TaskQuery {
                    limit,
                    offset,
                    is_completed,
                },
            )
            .await?;
            let mut lines = page
                .items
                .iter()
                .map(|task| render_task(config, task))
                .collect::<Vec<_>>();
            if lines.is_empty() {
                lines.push("No tasks.".to_string());
            }
            if page.has_next {
                lines.push(format!(
                    "Showing {} of {}. Use --offset {} for more.",
                    page.items.len(),
                    page.total,
                    u64::from(page.offset) + page.items.len() as u64
                ));
            }
            lines
        }
        TasksCommand::Add(fields) => {
            let task = create_task_impl(state, fields.into()).await?;
            vec![format!("Created {}", render_task(config, &task))]
        }
        TasksCommand::Complete { id } => {
            let task = complete_task_impl(state, id).await?;
            vec![format!("Completed {}", render_task(config, &task))]
        }
        TasksCommand::Edit { id, fields } => {
            let task = update_task_impl(state, id, fields.into()).await?;
            vec![format!("Updated {}", render_task(config, &task))]
        }
        TasksCommand::Delete { id } => {
            delete_task_impl(state, id.clone()).await?;
            vec![format!("Deleted task {id}")]
        }
    };
    Ok(lines)
}

fn render_task(config: &AppConfig, task: &Task) -> String {
    let mark = if task.is_completed { "x" } else { " " };
    let mut line = format!("[{mark}] {:>6}  {:<6} {}", task.id.to_string(), task.priority.as_str(), task.title);
    if let Some(due_date) = task.due_date.as_deref() {
        line.push_str(&format!("  (due {})", format_due_date(config, due_date)));
    }
    if let Some(description) = task.description.as_deref().filter(|text| !text.is_empty()) {
        line.push_str(&format!("\n           {description}"));
    }
    line
}
