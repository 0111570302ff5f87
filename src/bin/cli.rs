use std::fs;

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use jobs_crm::board::{move_on_board, MoveOutcome, PipelineBoard};
use jobs_crm::client::ApiClient;
use jobs_crm::models::Job;
use jobs_crm::query::MetricsWindow;
use jobs_crm::storage::ListQuery;

const TOKEN_FILE: &str = ".jobs_token";

#[derive(Parser)]
#[command(name = "jobs-cli")]
#[command(about = "CLI for the jobs CRM: collections, dashboard and pipeline board", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "JOBS_API_URL", default_value = "http://localhost:5500")]
    url: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Collection {
    Customers,
    Jobs,
    Pipelines,
    Users,
}

impl Collection {
    fn path(self) -> &'static str {
        match self {
            Collection::Customers => "customers",
            Collection::Jobs => "jobs",
            Collection::Pipelines => "pipelines",
            Collection::Users => "users",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    List {
        collection: Collection,
        #[arg(short, long)]
        sort: Option<String>,
        /// 0 for everything
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        skip: Option<usize>,
        /// Text search
        #[arg(short, long)]
        query: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        pipeline: Option<Uuid>,
        #[arg(long)]
        step: Option<String>,
    },
    Get {
        collection: Collection,
        id: String,
    },
    /// Create a record from a JSON document
    Create {
        collection: Collection,
        #[arg(short, long)]
        data: String,
    },
    /// Apply a partial JSON update
    Update {
        collection: Collection,
        id: String,
        #[arg(short, long)]
        data: String,
    },
    Delete {
        collection: Collection,
        id: String,
    },
    CountCustomers,
    Metrics {
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    Revenue,
    /// Show a pipeline board (the first pipeline by default)
    Board {
        #[arg(short, long)]
        pipeline: Option<Uuid>,
    },
    /// Move a job to another step of its pipeline
    Move {
        job: Uuid,
        to_step: String,
        /// Board to use for a job that has no pipeline yet
        #[arg(short, long)]
        pipeline: Option<Uuid>,
    },
    /// Metrics, status distribution and upcoming deadlines
    Dashboard {
        /// Deadline horizon in days
        #[arg(long, default_value_t = 14)]
        days: i64,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

fn client(url: &str) -> ApiClient {
    let client = ApiClient::new(url);
    match fs::read_to_string(TOKEN_FILE) {
        Ok(token) if !token.trim().is_empty() => client.with_token(token.trim()),
        _ => client,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_board(board: &PipelineBoard) {
    println!("Pipeline: {} ({})", board.pipeline.name, board.pipeline.id);
    for column in &board.columns {
        println!("  [{}] {} job(s)", column.step, column.jobs.len());
        for job in &column.jobs {
            println!("    - {} {} ({})", job.id, job.title, job.status);
        }
    }
    if !board.unplaced.is_empty() {
        println!("  [unplaced] {} job(s)", board.unplaced.len());
        for job in &board.unplaced {
            println!(
                "    - {} {} (step {:?})",
                job.id, job.title, job.current_step
            );
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut api = client(&cli.url);

    match cli.command {
        Commands::Login { email, password } => {
            let session = api.login(&email, &password).await?;
            fs::write(TOKEN_FILE, &session.token)?;
            println!(
                "Logged in as {} ({:?}). Token saved to {}",
                session.user.email, session.user.role, TOKEN_FILE
            );
        }
        Commands::Logout => {
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
        Commands::List {
            collection,
            sort,
            limit,
            skip,
            query,
            status,
            pipeline,
            step,
        } => {
            let query = ListQuery {
                sort,
                limit,
                skip,
                q: query,
                status,
                pipeline,
                customer: None,
                step,
            };
            let records: Vec<Value> = api.list(collection.path(), &query).await?;
            print_json(&records)?;
        }
        Commands::Get { collection, id } => {
            let record: Value = api.get(collection.path(), &id).await?;
            print_json(&record)?;
        }
        Commands::Create { collection, data } => {
            let body: Value = serde_json::from_str(&data)?;
            let record: Value = api.create(collection.path(), &body).await?;
            print_json(&record)?;
        }
        Commands::Update {
            collection,
            id,
            data,
        } => {
            let body: Value = serde_json::from_str(&data)?;
            let record: Value = api.update(collection.path(), &id, &body).await?;
            print_json(&record)?;
        }
        Commands::Delete { collection, id } => {
            let response = api.delete(collection.path(), &id).await?;
            println!("{}", response.message);
        }
        Commands::CountCustomers => {
            println!("{}", api.customer_count().await?);
        }
        Commands::Metrics { from, to } => {
            print_json(&api.metrics(&MetricsWindow { from, to }).await?)?;
        }
        Commands::Revenue => {
            for month in api.revenue().await?.monthly_data {
                println!("{} {}: {:.2}", month.month, month.year, month.revenue);
            }
        }
        Commands::Board { pipeline } => match api.active_board(pipeline).await? {
            Some(board) => print_board(&board),
            None => println!("No pipelines yet."),
        },
        Commands::Move {
            job,
            to_step,
            pipeline,
        } => {
            let current: Job = api.get("jobs", &job.to_string()).await?;
            let Some(pipeline) = current.pipeline.or(pipeline) else {
                return Err(format!("job {} is not on a pipeline, pass --pipeline", job).into());
            };
            let mut board = api.board(pipeline).await?;
            match move_on_board(&mut board, &api, job, &to_step).await? {
                MoveOutcome::Moved(moved) => println!(
                    "Moved '{}' to {}",
                    moved.title,
                    moved.current_step.as_deref().unwrap_or("-")
                ),
                MoveOutcome::Unchanged => println!("Job already on {}", to_step),
            }
            print_board(&board);
        }
        Commands::Dashboard { days, limit } => {
            let snapshot = api
                .dashboard(Utc::now(), Duration::days(days), limit)
                .await?;
            let metrics = &snapshot.metrics;
            println!(
                "Jobs: {} total, {} active, {} completed",
                metrics.total_jobs, metrics.active_jobs, metrics.completed_jobs
            );
            println!(
                "Revenue: {:.2} | Pipeline value: {:.2}",
                metrics.total_revenue, metrics.pipeline_value
            );
            println!("Status distribution:");
            for share in &snapshot.distribution {
                println!("  {:<12} {:>4} ({:.1}%)", share.status, share.count, share.share);
            }
            println!("Due in the next {} days:", days);
            for job in &snapshot.upcoming {
                let due = job
                    .due_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                println!("  {} {} ({})", due, job.title, job.status);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
