use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use tutor_reviews::config::Config;
use tutor_reviews::db::{self, PgTeacherStore};
use tutor_reviews::models::{NewReview, ReviewPatch, TeacherPatch, TeacherProfile};
use tutor_reviews::{report, RatingLedger, ReviewError, TeacherDirectory};

#[derive(Parser)]
#[command(name = "tutor-reviews")]
#[command(about = "Teacher reviews and rating statistics for the tutor directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed teachers and reviews
    Seed,
    /// Register a teacher from a JSON profile
    RegisterTeacher {
        #[arg(long)]
        file: PathBuf,
    },
    /// List all teachers
    Teachers,
    /// Show one teacher
    Teacher { teacher_id: Uuid },
    /// Apply a JSON patch to a teacher profile
    UpdateTeacher {
        teacher_id: Uuid,
        #[arg(long)]
        file: PathBuf,
    },
    /// Remove a teacher and their reviews
    DeleteTeacher { teacher_id: Uuid },
    /// Add a review for a teacher
    AddReview {
        teacher_id: Uuid,
        #[arg(long)]
        student: String,
        #[arg(long, allow_negative_numbers = true)]
        rating: i64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// List a teacher's reviews with rating statistics
    Reviews { teacher_id: Uuid },
    /// Change a review's rating and/or comment (an empty comment clears it)
    EditReview {
        teacher_id: Uuid,
        review_id: String,
        #[arg(long, allow_negative_numbers = true)]
        rating: Option<i64>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Delete a review
    DeleteReview { teacher_id: Uuid, review_id: String },
    /// Import reviews from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Check cached rating statistics against the stored reviews
    Verify {
        #[arg(long)]
        repair: bool,
    },
    /// Generate a markdown ratings report
    Report {
        #[arg(long)]
        locality: Option<String>,
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn emit<T: Serialize>(result: Result<T, ReviewError>) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            let status = err.status_code();
            Err(err).with_context(|| format!("request failed with status {status}"))
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("malformed JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Arc::new(PgTeacherStore::new(pool.clone()));
    let ledger = RatingLedger::new(store).with_retry(config.retry_policy());
    let directory = TeacherDirectory::new(ledger.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let registered = db::seed(&directory, &ledger).await?;
            println!("Seeded {registered} teachers.");
        }
        Commands::RegisterTeacher { file } => {
            let profile: TeacherProfile = read_json(&file)?;
            emit(directory.register(profile).await)?;
        }
        Commands::Teachers => emit(directory.list().await)?,
        Commands::Teacher { teacher_id } => emit(directory.get(teacher_id).await)?,
        Commands::UpdateTeacher { teacher_id, file } => {
            let patch: TeacherPatch = read_json(&file)?;
            emit(directory.update(teacher_id, patch).await)?;
        }
        Commands::DeleteTeacher { teacher_id } => {
            directory
                .delete(teacher_id)
                .await
                .with_context(|| format!("failed to delete teacher {teacher_id}"))?;
            println!("Teacher removed.");
        }
        Commands::AddReview {
            teacher_id,
            student,
            rating,
            comment,
        } => {
            let review = NewReview {
                student_id: student,
                comment,
                rating,
            };
            emit(ledger.add_review(teacher_id, review).await)?;
        }
        Commands::Reviews { teacher_id } => emit(ledger.get_teacher_reviews(teacher_id).await)?,
        Commands::EditReview {
            teacher_id,
            review_id,
            rating,
            comment,
        } => {
            let patch = ReviewPatch { comment, rating };
            emit(ledger.edit_review(teacher_id, &review_id, patch).await)?;
        }
        Commands::DeleteReview {
            teacher_id,
            review_id,
        } => emit(ledger.delete_review(teacher_id, &review_id).await)?,
        Commands::Import { csv } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = db::import_csv(&directory, &ledger, file).await?;
            println!(
                "Imported {} reviews from {} ({} rows skipped).",
                summary.inserted,
                csv.display(),
                summary.skipped
            );
        }
        Commands::Verify { repair } => {
            let mut drifted = 0usize;
            for teacher in directory.list().await? {
                let Err(problems) = teacher.rating.verify(&teacher.reviews) else {
                    continue;
                };
                drifted += 1;
                println!("{} ({}):", teacher.profile.name, teacher.id);
                for problem in &problems {
                    println!("  - {problem}");
                }
                if repair {
                    ledger.rebuild_stats(teacher.id).await?;
                    println!("  repaired");
                }
            }

            if drifted == 0 {
                println!("All rating statistics are consistent.");
            } else if !repair {
                anyhow::bail!("{drifted} teachers have drifted rating statistics; rerun with --repair");
            }
        }
        Commands::Report {
            locality,
            since_days,
            limit,
            out,
        } => {
            let since = since_days
                .map(|days| {
                    report::since_cutoff(Utc::now(), days)
                        .with_context(|| format!("--since-days {days} is out of range"))
                })
                .transpose()?;
            let teachers = directory.list().await?;
            let report = report::build_report(locality.as_deref(), since, &teachers, limit);
            std::fs::write(&out, report)?;
            info!(path = %out.display(), "report written");
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
