use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use outlet_weather_ingest::config::{Config, DateRange};
use outlet_weather_ingest::db::DbPool;
use outlet_weather_ingest::fetcher::WeatherFetcher;
use outlet_weather_ingest::services::{FetchedBatch, IngestionService, ValidationReport};

#[derive(Parser)]
#[command(name = "outlet-weather-ingest")]
#[command(about = "Load hourly weather for outlet locations into the warehouse and validate it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the outlet table has outlets with usable coordinates
    ValidateOutlets,
    /// Fetch weather for every valid outlet and write the batch to a file
    Fetch {
        /// Where to write the fetched batch (JSON)
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        range: RangeArgs,
    },
    /// Replace the weather table with a previously fetched batch
    Store {
        /// Batch file written by the fetch stage
        #[arg(long)]
        input: PathBuf,
    },
    /// Run the data quality checks against the stored weather table
    Validate {
        /// Number of records handed to the store stage
        #[arg(long)]
        expected: u64,
    },
    /// Run all four stages in order
    Run {
        #[command(flatten)]
        range: RangeArgs,
    },
}

#[derive(Args)]
struct RangeArgs {
    /// First day to fetch (YYYY-MM-DD), overrides WEATHER_START_DATE
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day to fetch (YYYY-MM-DD), overrides WEATHER_END_DATE
    #[arg(long)]
    end_date: Option<NaiveDate>,
}

impl RangeArgs {
    fn apply(&self, configured: DateRange) -> Result<DateRange, Box<dyn std::error::Error>> {
        let start = self.start_date.unwrap_or(configured.start);
        let end = self.end_date.unwrap_or(configured.end);
        Ok(DateRange::new(start, end)?)
    }
}

fn spinner(message: String) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    Ok(pb)
}

fn print_report(report: &ValidationReport) {
    println!("\n{}", "=".repeat(60));
    println!("Validation Summary");
    println!("{}", "=".repeat(60));
    println!("Expected records:   {}", report.expected_rows);
    println!("Stored records:     {}", report.stored_rows);
    println!("Unique outlets:     {}", report.coverage.unique_outlets);
    if let (Some(min), Some(max)) = (report.coverage.min_datetime, report.coverage.max_datetime) {
        println!("Date range:         {min} to {max}");
    }
    println!("{}", "-".repeat(60));
    for check in &report.checks {
        let mark = if check.passed() { "✓" } else { "✗" };
        println!("{mark} {check}");
    }
    println!("{}", "=".repeat(60));
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,outlet_weather_ingest=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    // Command-line dates win over WEATHER_START_DATE / WEATHER_END_DATE
    if let Command::Fetch { range, .. } | Command::Run { range } = &cli.command {
        config.date_range = range.apply(config.date_range)?;
    }
    info!("Loaded configuration: {:?}", config.weather_api);

    // Create database connection pool
    info!("Connecting to database...");
    let db = DbPool::connect(&config.database).await?;
    db.ping().await?;

    // Run migrations
    db.run_migrations().await?;
    db.verify_tables().await?;

    // Create services
    let fetcher = WeatherFetcher::new(&config.weather_api)?;
    let service = IngestionService::new(
        db,
        fetcher,
        config.date_range,
        config.weather_api.inter_request_delay,
    );

    match cli.command {
        Command::ValidateOutlets => {
            let outlets = service.validate_outlets().await?;
            println!("{}", outlets.valid_count());
        }
        Command::Fetch { output, .. } => {
            let outlets = service.validate_outlets().await?;
            let pb = spinner(format!(
                "Fetching weather for {} outlets...",
                outlets.valid_count()
            ))?;
            let batch = service.fetch_weather(&outlets.locations).await;
            pb.finish_and_clear();

            let batch = batch?;
            batch.write_to(&output)?;
            info!("Wrote {} records to {}", batch.fetched_count(), output.display());
            println!("{}", batch.fetched_count());
        }
        Command::Store { input } => {
            let batch = FetchedBatch::read_from(&input)?;
            let pb = spinner(format!("Storing {} records...", batch.fetched_count()))?;
            let stored = service.store_weather(&batch).await;
            pb.finish_and_clear();

            // The batch size, not the insert count, is what `validate --expected` takes
            info!("Inserted {} rows", stored?);
            println!("{}", batch.fetched_count());
        }
        Command::Validate { expected } => {
            let report = service.validate_weather(expected).await?;
            print_report(&report);
        }
        Command::Run { .. } => {
            let result = service.run().await?;
            print_report(&result.report);
            println!("Valid outlets:      {}", result.valid_outlets);
            println!("Records fetched:    {}", result.records_fetched);
            println!("Records stored:     {}", result.records_stored);
            println!("Total time:         {:.2}s", result.duration_secs);
        }
    }

    Ok(())
}
