//! Load data script for the jobs CRM
//!
//! Seeds an admin account, the "Sales" pipeline, a handful of customers and
//! jobs spread over the last months so the dashboard has something to show.
//! Run: cargo run --bin load_data
//! Skips seeding when pipelines already exist.

use std::path::PathBuf;

use chrono::{Datelike, Duration, Months, TimeZone, Utc};
use clap::Parser;

use jobs_crm::config::LogFormat;
use jobs_crm::controller;
use jobs_crm::logging;
use jobs_crm::models::{JobStatus, NewCustomer, NewJob, NewPipeline, Pipeline};
use jobs_crm::query::QueryEngine;
use jobs_crm::storage::Storage;

#[derive(Parser)]
#[command(name = "load_data", about = "Seed the jobs CRM database with sample data")]
struct Args {
    #[arg(long, env = "DATABASE_PATH", default_value = "jobs_data")]
    database_path: PathBuf,

    #[arg(long, env = "ADMIN_EMAIL", default_value = "admin@example.com")]
    admin_email: String,

    #[arg(long, env = "ADMIN_PASSWORD", default_value = "admin123", hide_env_values = true)]
    admin_password: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let _guard = logging::init(LogFormat::Pretty, None);

    let storage = Storage::open(&args.database_path)?;

    if controller::bootstrap_admin(&storage, &args.admin_email, &args.admin_password)?.is_some() {
        println!("✅ Admin account {} created", args.admin_email);
    }

    if storage.count::<Pipeline>()? > 0 {
        println!("Pipelines already present, skipping sample data");
        storage.close()?;
        return Ok(());
    }

    let sales = controller::create_pipeline(
        &storage,
        NewPipeline {
            name: "Sales".to_string(),
            steps: ["Lead", "Qualified", "Proposal", "Negotiation", "Won"]
                .map(String::from)
                .to_vec(),
        },
    )?;
    let install = controller::create_pipeline(
        &storage,
        NewPipeline {
            name: "Installation".to_string(),
            steps: ["Survey", "Scheduled", "In Progress", "Inspection"]
                .map(String::from)
                .to_vec(),
        },
    )?;

    let people = [
        ("Ada", "Lovelace", "ada@example.com", "referral"),
        ("Grace", "Hopper", "grace@example.com", "website"),
        ("Alan", "Turing", "alan@example.com", "trade show"),
        ("Katherine", "Johnson", "katherine@example.com", "website"),
        ("Edsger", "Dijkstra", "edsger@example.com", "cold call"),
    ];
    let mut customers = Vec::new();
    for (first, last, email, source) in people {
        customers.push(controller::create_customer(
            &storage,
            NewCustomer {
                first_name: first.to_string(),
                last_name: last.to_string(),
                email: email.to_string(),
                lead_source: Some(source.to_string()),
                ..Default::default()
            },
        )?);
    }
    println!("✅ {} customers, 2 pipelines", customers.len());

    let now = Utc::now();
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 12, 0, 0)
        .single()
        .unwrap_or(now);

    // One completed job per month over the last six months
    for back in 0..6u32 {
        let completed_at = month_start
            .checked_sub_months(Months::new(back))
            .unwrap_or(month_start)
            + Duration::days(i64::from(back) + 2);
        let completed_at = completed_at.min(now);
        let customer = &customers[back as usize % customers.len()];
        controller::create_job(
            &storage,
            NewJob {
                title: format!("Completed project #{}", back + 1),
                customer: Some(customer.id),
                pipeline: Some(sales.id),
                current_step: Some("Won".to_string()),
                status: Some(JobStatus::Completed),
                value: Some(1500.0 + 250.0 * f64::from(back)),
                completed_at: Some(completed_at),
                progress: Some(100),
                ..Default::default()
            },
        )?;
    }

    let open_jobs = [
        ("Kitchen remodel", "Lead", JobStatus::Planning, 8200.0, 3),
        ("Office rewiring", "Proposal", JobStatus::InProgress, 4300.0, 9),
        ("Roof inspection", "Qualified", JobStatus::Planning, 600.0, 20),
        ("Garden landscaping", "Negotiation", JobStatus::OnHold, 2750.0, 40),
    ];
    for (i, (title, step, status, value, due_in)) in open_jobs.into_iter().enumerate() {
        controller::create_job(
            &storage,
            NewJob {
                title: title.to_string(),
                customer: Some(customers[i % customers.len()].id),
                pipeline: Some(sales.id),
                current_step: Some(step.to_string()),
                status: Some(status),
                value: Some(value),
                due_date: Some(now + Duration::days(due_in)),
                ..Default::default()
            },
        )?;
    }
    controller::create_job(
        &storage,
        NewJob {
            title: "Solar panel install".to_string(),
            customer: Some(customers[0].id),
            pipeline: Some(install.id),
            status: Some(JobStatus::InProgress),
            value: Some(12500.0),
            progress: Some(35),
            due_date: Some(now + Duration::days(6)),
            ..Default::default()
        },
    )?;
    println!("✅ 11 jobs across 2 pipelines");

    // Same aggregation the dashboard endpoint runs
    let engine = QueryEngine::new(&storage).await?;
    let metrics = engine.dashboard_metrics(Default::default(), now).await?;
    println!(
        "✅ Dashboard: {} jobs, {} active, revenue {:.2}, pipeline value {:.2}",
        metrics.total_jobs, metrics.active_jobs, metrics.total_revenue, metrics.pipeline_value
    );

    storage.close()?;
    Ok(())
}
