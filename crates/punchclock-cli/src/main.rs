use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use punchclock_core::extractor::JsonEmbeddingExtractor;
use punchclock_core::{Embedding, Period, PunchType, Role, UserId};
use punchclock_engine::{spawn_engine, Config, EngineHandle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "punchclock", about = "Face-authenticated attendance tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
    /// Store a user's face embedding (JSON float array file)
    Enroll { user: UserId, embedding: PathBuf },
    /// Record a punch for the face in the given capture
    Punch {
        /// entry, lunch or exit
        punch: PunchType,
        image: PathBuf,
    },
    /// Per-day report and statistics for a user
    Report {
        user: UserId,
        /// today, week, month, year or all
        #[arg(short, long, default_value_t = Period::Month)]
        period: Period,
    },
    /// List punches visible to a user
    Attendance {
        #[arg(long = "as")]
        actor: UserId,
    },
    /// Manage justifications
    #[command(subcommand)]
    Justification(JustificationCommand),
    /// Hand punches over to an external system
    #[command(subcommand)]
    Sync(SyncCommand),
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create a user
    Add {
        username: String,
        #[arg(long)]
        admin: bool,
    },
    /// List users
    List {
        /// Only users with at least one punch
        #[arg(long)]
        with_attendance: bool,
    },
    /// Delete a user and everything they own
    Remove {
        id: UserId,
        #[arg(long = "as")]
        actor: UserId,
    },
}

#[derive(Subcommand)]
enum JustificationCommand {
    /// File a justification
    Add {
        reason: String,
        /// Day being justified (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long = "as")]
        actor: UserId,
    },
    /// List justifications with their review status
    List {
        #[arg(long = "as")]
        actor: UserId,
    },
    /// Delete a justification
    Remove {
        id: i64,
        #[arg(long = "as")]
        actor: UserId,
    },
    /// Approve or reject a justification
    Review {
        id: i64,
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        approve: bool,
        #[arg(long)]
        reject: bool,
        #[arg(long = "as")]
        actor: UserId,
    },
}

#[derive(Subcommand)]
enum SyncCommand {
    /// Punches not yet synced, oldest first
    Pending,
    /// Mark punches as synced
    Mark { ids: Vec<i64> },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

async fn run(engine: &EngineHandle, command: Commands) -> Result<()> {
    match command {
        Commands::User(UserCommand::Add { username, admin }) => {
            let role = if admin { Role::Admin } else { Role::Employee };
            print_json(&engine.create_user(&username, role).await?)
        }
        Commands::User(UserCommand::List { with_attendance }) => {
            print_json(&engine.users(with_attendance).await?)
        }
        Commands::User(UserCommand::Remove { id, actor }) => {
            engine.delete_user(actor, id).await?;
            println!("user {id} removed");
            Ok(())
        }
        Commands::Enroll { user, embedding } => {
            let raw = read_file(&embedding)?;
            let values: Vec<f32> = serde_json::from_slice(&raw)
                .with_context(|| format!("{} is not a JSON float array", embedding.display()))?;
            print_json(&engine.enroll(user, Embedding::new(values)).await?)
        }
        Commands::Punch { punch, image } => {
            let image = read_file(&image)?;
            print_json(&engine.punch(punch, image).await?)
        }
        Commands::Report { user, period } => print_json(&engine.report(user, period).await?),
        Commands::Attendance { actor } => print_json(&engine.list_attendance(actor).await?),
        Commands::Justification(JustificationCommand::Add {
            reason,
            date,
            actor,
        }) => print_json(&engine.justify(actor, &reason, date).await?),
        Commands::Justification(JustificationCommand::List { actor }) => {
            print_json(&engine.list_justifications(actor).await?)
        }
        Commands::Justification(JustificationCommand::Remove { id, actor }) => {
            engine.delete_justification(actor, id).await?;
            println!("justification {id} removed");
            Ok(())
        }
        Commands::Justification(JustificationCommand::Review {
            id,
            approve,
            reject: _,
            actor,
        }) => print_json(&engine.review(id, approve, actor).await?),
        Commands::Sync(SyncCommand::Pending) => print_json(&engine.unsynced().await?),
        Commands::Sync(SyncCommand::Mark { ids }) => {
            let changed = engine.mark_synced(ids).await?;
            println!("{changed} punches marked as synced");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(db = %config.db_path.display(), "configuration loaded");

    let engine = spawn_engine(&config, Box::new(JsonEmbeddingExtractor))
        .context("failed to start attendance engine")?;
    run(&engine, cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punch_args() {
        let cli = Cli::try_parse_from(["punchclock", "punch", "lunch", "capture.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Punch {
                punch: PunchType::Lunch,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["punchclock", "punch", "break", "x"]).is_err());
    }

    #[test]
    fn test_report_defaults_to_month() {
        let cli = Cli::try_parse_from(["punchclock", "report", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Report {
                user: 7,
                period: Period::Month
            }
        ));
        let cli = Cli::try_parse_from(["punchclock", "report", "7", "--period", "week"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Report {
                period: Period::Week,
                ..
            }
        ));
    }

    #[test]
    fn test_review_needs_a_decision() {
        assert!(Cli::try_parse_from(["punchclock", "justification", "review", "3", "--as", "1"])
            .is_err());
        assert!(Cli::try_parse_from([
            "punchclock",
            "justification",
            "review",
            "3",
            "--approve",
            "--reject",
            "--as",
            "1"
        ])
        .is_err());
        let cli = Cli::try_parse_from([
            "punchclock",
            "justification",
            "review",
            "3",
            "--reject",
            "--as",
            "1",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Justification(JustificationCommand::Review {
                approve: false,
                reject: true,
                ..
            })
        ));
    }

    #[test]
    fn test_justification_date() {
        let cli = Cli::try_parse_from([
            "punchclock",
            "justification",
            "add",
            "dentist appointment",
            "--date",
            "2025-07-08",
            "--as",
            "2",
        ])
        .unwrap();
        let Commands::Justification(JustificationCommand::Add { date, actor, .. }) = cli.command
        else {
            panic!("expected justification add");
        };
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 7, 8));
        assert_eq!(actor, 2);
    }
}
