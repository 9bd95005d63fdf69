pub mod daemon_path;
pub mod output;
pub mod process;

use std::{env, path::PathBuf};

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use daemon_path::to_daemon_path;
use process::{kill_daemons, restart_daemon};
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

use crate::{
    daemon::{
        start_daemon,
        storage::{
            entities::{TaskEntity, TimerState},
            task_storage::{TaskSet, TaskStorage, TaskStorageImpl},
        },
    },
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
        time::format_hms,
    },
};

#[derive(Parser, Debug)]
#[command(name = "Stint", version, long_about = None)]
#[command(about = "Track how much time you sink into your targets", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application")]
    Init {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(about = "Create a new target")]
    Add {
        #[arg(help = "Display name of the target, for example 'reading'")]
        name: String,
    },
    #[command(about = "List all targets with their accumulated time")]
    List {},
    #[command(about = "Start the timer of a target, or stop it when it's already running")]
    Toggle {
        #[arg(help = "Display name of the target")]
        name: String,
    },
    #[command(about = "Show the targets whose timers are running right now")]
    Status {},
    #[command(about = "Delete a target together with its accumulated time")]
    Remove {
        #[arg(help = "Display name of the target")]
        name: String,
    },
    #[command(
        about = "Run a daemon directly in current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(about = "Stop currently running daemon.")]
    Stop {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, None, logging_level, args.log)?;

    match args.commands {
        Commands::Init { .. } => {
            restart_daemon()?;
            Ok(())
        }
        Commands::Stop {} => {
            let process_name = env::current_exe().expect("Can't operate without an executable");
            kill_daemons(&to_daemon_path(process_name.clone()));
            kill_daemons(&process_name);
            Ok(())
        }
        Commands::Serve { dir } => {
            let dir = dir.map_or_else(create_application_default_path, Ok)?;
            start_daemon(dir).await?;
            Ok(())
        }
        Commands::Add { name } => add_target(name).await,
        Commands::List {} => list_targets().await,
        Commands::Toggle { name } => toggle_target(name).await,
        Commands::Status {} => show_status().await,
        Commands::Remove { name } => remove_target(name).await,
    }
}

fn default_storage() -> Result<TaskStorageImpl> {
    Ok(TaskStorageImpl::new(create_application_default_path()?)?)
}

/// Resolves a display name to exactly one target. Creation refuses duplicate names, but the
/// journal itself doesn't, so ambiguity is still answered with an error instead of a guess.
fn single_by_name(set: &TaskSet, name: &str) -> Result<Uuid> {
    let ids = set
        .iter()
        .filter(|v| &*v.name == name)
        .map(|v| v.id)
        .collect::<Vec<_>>();
    match ids.as_slice() {
        [] => bail!("No target named '{name}'"),
        [id] => Ok(*id),
        _ => bail!("Several targets share the name '{name}', remove one of them first"),
    }
}

async fn add_target(name: String) -> Result<()> {
    let name = name.trim().to_owned();
    if name.is_empty() {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                "Target name can't be empty",
            )
            .into());
    }

    let storage = default_storage()?;
    let created = storage
        .transact(move |set| {
            if set.iter().any(|v| &*v.name == name.as_str()) {
                bail!("Target '{name}' already exists");
            }
            let task = TaskEntity::new(name.into(), Utc::now());
            let snapshot = task.clone();
            set.insert(task);
            Ok(snapshot)
        })
        .await?;

    println!("Created target '{}'", created.name);
    Ok(())
}

async fn list_targets() -> Result<()> {
    let storage = default_storage()?;
    let tasks = storage.load_all().await?;
    if tasks.is_empty() {
        println!("No targets yet. Create one with 'stint add <name>'");
        return Ok(());
    }
    print!("{}", output::render_targets(&tasks, Utc::now()));
    Ok(())
}

async fn toggle_target(name: String) -> Result<()> {
    let storage = default_storage()?;
    let now = Utc::now();
    let toggled = storage
        .transact(move |set| {
            let id = single_by_name(set, &name)?;
            let Some(task) = set.get_mut(id) else {
                bail!("No target named '{name}'");
            };
            task.toggle(now);
            Ok(task.clone())
        })
        .await?;

    match toggled.timer {
        TimerState::Running => println!("Started timer for '{}'", toggled.name),
        TimerState::Stopped => println!(
            "Stopped timer for '{}' at {} total",
            toggled.name,
            format_hms(toggled.accumulated)
        ),
    }
    Ok(())
}

async fn show_status() -> Result<()> {
    let storage = default_storage()?;
    let running = storage
        .load_all()
        .await?
        .into_iter()
        .filter(|v| v.is_running())
        .collect::<Vec<_>>();
    if running.is_empty() {
        println!("No timers running.");
        return Ok(());
    }
    print!("{}", output::render_status(&running, Utc::now()));
    Ok(())
}

async fn remove_target(name: String) -> Result<()> {
    let storage = default_storage()?;
    let removed = storage
        .transact(move |set| {
            let id = single_by_name(set, &name)?;
            set.remove(id)
                .ok_or_else(|| anyhow::anyhow!("No target named '{name}'"))
        })
        .await?;

    println!(
        "Removed target '{}' with {} accumulated",
        removed.name,
        format_hms(removed.accumulated)
    );
    Ok(())
}
