use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

mod aggregate;
mod config;
mod db;
mod error;
mod grading;
mod logging;
mod models;
mod rank;
mod report;
mod repository;
#[cfg(test)]
mod testing;

use crate::config::Settings;
use crate::db::PgGradeRepository;
use crate::grading::{run_with_deadline, GradeService};
use crate::models::{RunSummary, MAX_GRADE, MIN_GRADE};

#[derive(Parser)]
#[command(name = "seminar-grading")]
#[command(about = "Peer and instructor grade ranking for course seminars", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo class with one graded seminar
    Seed,
    /// Import peer scores from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a student's score for a group's topic presentation
    SubmitScore {
        #[arg(long)]
        topic: Uuid,
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        student: Uuid,
        #[arg(long, value_parser = grade_parser())]
        grade: i32,
    },
    /// Set the instructor's report grade for a seminar group
    SetReportGrade {
        #[arg(long)]
        group: Uuid,
        #[arg(long, value_parser = grade_parser())]
        grade: i32,
    },
    /// Delete every peer score given on a topic
    ClearTopicScores {
        #[arg(long)]
        topic: Uuid,
    },
    /// Rank groups per topic and store their presentation tiers
    ComputePresentation {
        #[arg(long)]
        seminar: Uuid,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Blend presentation and report grades and store final group tiers
    ComputeGroup {
        #[arg(long)]
        seminar: Uuid,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the stored grades of a seminar's groups
    Grades {
        #[arg(long)]
        seminar: Uuid,
    },
    /// Generate a markdown grade report
    Report {
        #[arg(long)]
        seminar: Uuid,
        /// Run both grade computations before writing the report
        #[arg(long)]
        compute: bool,
        #[arg(long, default_value = "grades.md")]
        out: PathBuf,
    },
}

fn grade_parser() -> clap::builder::RangedI64ValueParser<i32> {
    clap::value_parser!(i32).range(i64::from(MIN_GRADE)..=i64::from(MAX_GRADE))
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if summary.assignments.is_empty() && summary.failures.is_empty() {
        println!("Nothing to grade for seminar {}.", summary.seminar_id);
        return Ok(());
    }

    for assignment in summary.assignments.iter() {
        println!(
            "- {}: score {:.2}, tier {}",
            assignment.entity, assignment.score, assignment.tier
        );
    }

    for entity in summary.excluded.iter() {
        println!("- {entity}: not ranked, missing scores");
    }

    if summary.is_partial() {
        println!("Run finished with {} unsaved grades:", summary.failures.len());

        for failure in summary.failures.iter() {
            println!("- {}: not saved ({})", failure.entity, failure.reason);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings;

    logging::init_tracing(
        settings.verbose,
        settings.log_level.as_deref(),
        settings.log_json,
    )?;

    let pool = settings.connect().await?;
    let timeout = settings.run_timeout();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let seminar_id = db::seed(&pool).await?;
            println!("Seed data inserted for seminar {seminar_id}.");
        }
        Commands::Import { csv } => {
            let written = db::import_scores(&pool, &csv).await?;
            println!("Imported {written} peer scores from {}.", csv.display());
        }
        Commands::SubmitScore {
            topic,
            group,
            student,
            grade,
        } => {
            db::submit_peer_score(&pool, topic, group, student, grade).await?;
            println!("Score recorded.");
        }
        Commands::SetReportGrade { group, grade } => {
            db::set_report_grade(&pool, group, grade).await?;
            println!("Report grade set.");
        }
        Commands::ClearTopicScores { topic } => {
            let removed = db::clear_topic_scores(&pool, topic).await?;
            println!("Removed {removed} peer scores.");
        }
        Commands::ComputePresentation { seminar, json } => {
            let service = GradeService::new(PgGradeRepository::new(pool.clone()));
            let run = service.compute_presentation_grades(seminar);
            let summary = run_with_deadline(timeout, run).await?;
            print_summary(&summary, json)?;
        }
        Commands::ComputeGroup { seminar, json } => {
            let service = GradeService::new(PgGradeRepository::new(pool.clone()));
            let run = service.compute_group_grades(seminar);
            let summary = run_with_deadline(timeout, run).await?;
            print_summary(&summary, json)?;
        }
        Commands::Grades { seminar } => {
            let title = db::fetch_seminar_title(&pool, seminar).await?;
            let rows = db::fetch_seminar_grades(&pool, seminar).await?;

            if rows.is_empty() {
                println!("No groups registered for {title}.");
                return Ok(());
            }

            println!("Grades for {title}:");
            for row in rows.iter() {
                println!(
                    "- {} ({}) presentation {}, report {}, final {}",
                    row.group_name,
                    row.group_id,
                    row.presentation_grade
                        .map_or_else(|| "-".to_string(), |grade| format!("{grade:.2}")),
                    row.report_grade
                        .map_or_else(|| "-".to_string(), |grade| grade.to_string()),
                    row.final_grade
                        .map_or_else(|| "-".to_string(), |grade| grade.to_string()),
                );
            }
        }
        Commands::Report {
            seminar,
            compute,
            out,
        } => {
            let title = db::fetch_seminar_title(&pool, seminar).await?;
            let mut runs = Vec::new();

            if compute {
                let service = GradeService::new(PgGradeRepository::new(pool.clone()));
                let presentation = service.compute_presentation_grades(seminar);
                runs.push(run_with_deadline(timeout, presentation).await?);

                let group = service.compute_group_grades(seminar);
                runs.push(run_with_deadline(timeout, group).await?);
            }

            let rows = db::fetch_seminar_grades(&pool, seminar).await?;
            let report = report::build_report(&title, Utc::now().date_naive(), &rows, &runs);
            std::fs::write(&out, report)?;
            info!(%seminar, out = %out.display(), "report written");
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
