//! CLI subcommand declarations and dispatch.

pub mod list;
pub mod logs;
pub mod restart;
pub mod run;
pub mod schedule;
pub mod start;
pub mod status;
pub mod stop;
pub mod supervise;

use clap::Subcommand;

/// Top-level CLI subcommands supported by `svctl`.
#[derive(Subcommand)]
pub enum Commands {
    /// Start (and register) a managed process
    Start {
        /// Process name
        name: String,

        /// Command to run (required the first time a name is registered)
        #[arg(long)]
        command: Option<String>,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// Restart policy name (standard/aggressive/conservative/none)
        #[arg(long)]
        policy: Option<String>,

        /// Group tag for bulk operations
        #[arg(long)]
        group: Option<String>,

        /// Environment variable in KEY=VALUE form (repeatable)
        #[arg(long = "env")]
        env: Vec<String>,
    },

    /// Stop a managed process
    Stop {
        /// Process name
        name: String,

        /// Skip the graceful grace period and force-kill the process group
        #[arg(long)]
        force: bool,
    },

    /// Restart a managed process
    Restart {
        /// Process name
        name: String,
    },

    /// List every registered process
    List,

    /// Show live status of every registered process
    Status,

    /// Show the tail of a process's captured output
    Logs {
        /// Process name
        name: String,

        /// Number of lines to show
        #[arg(long, default_value = "50")]
        tail: u32,
    },

    /// Manage cron/interval/once schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Run the supervisor daemon in the foreground
    Run,

    /// Internal single-process supervisor loop (hidden).
    #[command(hide = true, name = "__supervise")]
    Supervise {
        /// Process name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum ScheduleAction {
    /// Register a new schedule
    Add {
        /// Schedule name
        name: String,

        /// Trigger dialect: cron, interval, or once
        #[arg(long)]
        kind: String,

        /// Trigger expression (dialect-dependent)
        #[arg(long)]
        expression: String,

        /// Command the schedule launches
        #[arg(long)]
        command: String,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// List registered schedules
    List,

    /// Remove a schedule
    Remove {
        /// Schedule name
        name: String,
    },
}

/// Dispatches a parsed CLI command to its command module.
pub async fn execute(command: Commands) {
    match command {
        Commands::Start {
            name,
            command,
            args,
            policy,
            group,
            env,
        } => start::execute(&name, command.as_deref(), &args, policy.as_deref(), group.as_deref(), &env).await,
        Commands::Stop { name, force } => stop::execute(&name, force).await,
        Commands::Restart { name } => restart::execute(&name).await,
        Commands::List => list::execute().await,
        Commands::Status => status::execute().await,
        Commands::Logs { name, tail } => logs::execute(&name, tail).await,
        Commands::Schedule { action } => match action {
            ScheduleAction::Add {
                name,
                kind,
                expression,
                command,
                args,
            } => schedule::add(&name, &kind, &expression, &command, &args).await,
            ScheduleAction::List => schedule::list().await,
            ScheduleAction::Remove { name } => schedule::remove(&name).await,
        },
        Commands::Run => run::execute().await,
        Commands::Supervise { name } => supervise::execute(&name),
    }
}
