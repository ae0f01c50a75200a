use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tracing_subscriber::EnvFilter;

use recur::config::{
    config_dir, load_clients, load_config, load_definitions, CLIENTS_TEMPLATE, CONFIG_TEMPLATE,
    DEFINITIONS_TEMPLATE,
};
use recur::engine::schedule::Occurrence;
use recur::error::{RecurError, Result};
use recur::store::FileStore;
use recur::{Scheduler, SchedulerConfig, ShutdownHandle, TickReport};

#[derive(Parser)]
#[command(name = "recur")]
#[command(version, about = "Recurring invoice scheduling engine", long_about = None)]
struct Cli {
    /// Path to config directory (default: ~/.recur or XDG config)
    #[arg(short = 'C', long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory with template files
    Init,

    /// List configured clients
    Clients,

    /// List recurring invoice definitions
    Definitions,

    /// Preview the next occurrence dates of a definition
    Schedule {
        /// Definition identifier from definitions.toml
        definition: String,

        /// Number of upcoming occurrences to show
        #[arg(short = 'n', long, default_value_t = 6)]
        count: u32,
    },

    /// Run a single scheduling tick and print the report
    Tick {
        /// Fixed as-of instant (YYYY-MM-DD or RFC 3339; default: now)
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Run the scheduler loop on a fixed period
    Run {
        /// Tick period in seconds (default: from config.toml)
        #[arg(long)]
        period: Option<u64>,

        /// Stop after this many ticks (default: run until killed)
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Show the generation log
    Log {
        /// Limit to one definition
        definition: Option<String>,
    },

    /// List generated invoices
    Invoices {
        /// Number of invoices to show (default: all)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show engine status and next invoice number
    Status,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let cfg_dir = match cli.config_dir {
        Some(p) => p,
        None => config_dir()?,
    };

    match cli.command {
        Commands::Init => cmd_init(&cfg_dir),
        Commands::Clients => cmd_clients(&cfg_dir),
        Commands::Definitions => cmd_definitions(&cfg_dir),
        Commands::Schedule { definition, count } => cmd_schedule(&cfg_dir, &definition, count),
        Commands::Tick { as_of } => cmd_tick(&cfg_dir, as_of),
        Commands::Run { period, ticks } => cmd_run(&cfg_dir, period, ticks),
        Commands::Log { definition } => cmd_log(&cfg_dir, definition.as_deref()),
        Commands::Invoices { limit } => cmd_invoices(&cfg_dir, limit),
        Commands::Status => cmd_status(&cfg_dir),
    }
}

/// Initialize config directory with template files
fn cmd_init(cfg_dir: &PathBuf) -> Result<()> {
    use std::fs;

    if cfg_dir.exists() {
        return Err(RecurError::AlreadyInitialized(cfg_dir.clone()));
    }

    fs::create_dir_all(cfg_dir)?;
    fs::write(cfg_dir.join("config.toml"), CONFIG_TEMPLATE)?;
    fs::write(cfg_dir.join("clients.toml"), CLIENTS_TEMPLATE)?;
    fs::write(cfg_dir.join("definitions.toml"), DEFINITIONS_TEMPLATE)?;

    println!("Initialized recur config at: {}", cfg_dir.display());
    println!();
    println!("Next steps:");
    println!(
        "  1. Add your clients:               $EDITOR {}/clients.toml",
        cfg_dir.display()
    );
    println!(
        "  2. Define recurring invoices:      $EDITOR {}/definitions.toml",
        cfg_dir.display()
    );
    println!();
    println!("Then preview a schedule and start the loop:");
    println!("  recur schedule <definition-id>");
    println!("  recur run");

    Ok(())
}

// Table row structs for tabled
#[derive(Tabled)]
struct ClientRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CURRENCY")]
    currency: String,
    #[tabled(rename = "TERMS")]
    terms: String,
}

#[derive(Tabled)]
struct DefinitionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "CLIENT")]
    client: String,
    #[tabled(rename = "CADENCE")]
    cadence: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "GENERATED")]
    generated: u32,
    #[tabled(rename = "NEXT DUE")]
    next_due: String,
}

#[derive(Tabled)]
struct ScheduleRow {
    #[tabled(rename = "#")]
    index: u32,
    #[tabled(rename = "DATE")]
    date: String,
}

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "DEFINITION")]
    definition: String,
    #[tabled(rename = "#")]
    index: u32,
    #[tabled(rename = "GENERATED AT")]
    generated_at: String,
    #[tabled(rename = "INVOICE")]
    invoice: String,
}

#[derive(Tabled)]
struct InvoiceRow {
    #[tabled(rename = "NUMBER")]
    number: String,
    #[tabled(rename = "DATE")]
    date: String,
    #[tabled(rename = "DUE")]
    due: String,
    #[tabled(rename = "TOTAL")]
    total: String,
    #[tabled(rename = "CLIENT")]
    client: String,
}

fn require_config(cfg_dir: &PathBuf) -> Result<()> {
    if !cfg_dir.exists() {
        return Err(RecurError::ConfigNotFound(cfg_dir.clone()));
    }
    Ok(())
}

/// List configured clients
fn cmd_clients(cfg_dir: &PathBuf) -> Result<()> {
    require_config(cfg_dir)?;
    let config = load_config(cfg_dir)?;
    let clients = load_clients(cfg_dir)?;

    if clients.is_empty() {
        println!("No clients configured.");
        println!("Add clients to: {}/clients.toml", cfg_dir.display());
        return Ok(());
    }

    let rows: Vec<ClientRow> = clients
        .iter()
        .map(|(id, client)| ClientRow {
            id: id.clone(),
            name: client.name.clone(),
            currency: client.terms(&config.invoice.currency).currency,
            terms: format!("net {} days", client.payment_terms_days),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    Ok(())
}

/// List recurring definitions with their runtime state
fn cmd_definitions(cfg_dir: &PathBuf) -> Result<()> {
    require_config(cfg_dir)?;
    load_definitions(cfg_dir)?; // surface validation errors with file context

    let store = FileStore::new(cfg_dir);
    let mut definitions = store.load_all_definitions()?;
    definitions.sort_by(|a, b| a.id.cmp(&b.id));

    if definitions.is_empty() {
        println!("No definitions configured.");
        println!("Add definitions to: {}/definitions.toml", cfg_dir.display());
        return Ok(());
    }

    let rows: Vec<DefinitionRow> = definitions
        .iter()
        .map(|def| DefinitionRow {
            id: def.id.clone(),
            client: def.client_id.clone(),
            cadence: def.cadence.to_string(),
            status: def.status.to_string(),
            generated: def.occurrences_generated,
            next_due: def
                .next_due_at
                .map(|due| due.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    Ok(())
}

/// Preview upcoming occurrence dates for one definition
fn cmd_schedule(cfg_dir: &PathBuf, definition_id: &str, count: u32) -> Result<()> {
    require_config(cfg_dir)?;

    let store = FileStore::new(cfg_dir);
    let definition = store
        .load_definition(definition_id)?
        .ok_or_else(|| RecurError::DefinitionNotFound(definition_id.to_string()))?;

    let start = definition.occurrences_generated;
    let mut rows = Vec::new();
    for index in start..start.saturating_add(count) {
        match definition.occurrence(index) {
            Occurrence::Scheduled(date) => rows.push(ScheduleRow {
                index,
                date: date.to_string(),
            }),
            Occurrence::EndOfSeries => break,
        }
    }

    if rows.is_empty() {
        println!("{definition_id}: no occurrences remain (series ended).");
        return Ok(());
    }

    println!("{definition_id} ({}):", definition.cadence);
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    Ok(())
}

fn parse_as_of(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(date) = input.parse::<NaiveDate>() {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(RecurError::InvalidInstant(input.to_string()))
}

fn scheduler_for(
    cfg_dir: &PathBuf,
    period: Option<u64>,
) -> Result<(Scheduler<FileStore>, ShutdownHandle, SchedulerConfig)> {
    let settings = load_config(cfg_dir)?.scheduler;
    let config = SchedulerConfig {
        tick_period: Duration::from_secs(period.unwrap_or(settings.tick_period_secs)),
        workers: settings.workers.max(1),
    };
    let store = Arc::new(FileStore::new(cfg_dir));
    let (scheduler, handle) = Scheduler::new(store, config.clone());
    Ok((scheduler, handle, config))
}

fn print_report(report: &TickReport) {
    println!("Tick report (as of {})", report.as_of.to_rfc3339());
    println!("  Generated:            {}", report.generated);
    println!("  Already generated:    {}", report.already_generated);
    println!("  Ended:                {}", report.ended);
    println!("  Transient errors:     {}", report.transient_errors);
    println!("  Permanent errors:     {}", report.permanent_errors);
    println!("  Invariant violations: {}", report.invariant_violations);
    if !report.newly_failing.is_empty() {
        println!("  Newly failing:        {}", report.newly_failing.join(", "));
    }
}

/// Run one tick and print its report
fn cmd_tick(cfg_dir: &PathBuf, as_of: Option<String>) -> Result<()> {
    require_config(cfg_dir)?;

    let as_of = match as_of {
        Some(input) => parse_as_of(&input)?,
        None => Utc::now(),
    };

    let (scheduler, _handle, _) = scheduler_for(cfg_dir, None)?;
    let report = scheduler.tick(as_of).map_err(RecurError::Store)?;
    print_report(&report);

    Ok(())
}

/// Run the scheduler loop
fn cmd_run(cfg_dir: &PathBuf, period: Option<u64>, ticks: Option<u64>) -> Result<()> {
    require_config(cfg_dir)?;

    // The handle must outlive the loop: dropping it counts as shutdown.
    let (scheduler, _handle, config) = scheduler_for(cfg_dir, period)?;
    println!(
        "Scheduler running (period {}s, {} workers). Stop with Ctrl-C.",
        config.tick_period.as_secs(),
        config.workers
    );
    let completed = scheduler.run(ticks);
    println!("Scheduler stopped after {completed} tick(s).");

    Ok(())
}

/// Show the generation log
fn cmd_log(cfg_dir: &PathBuf, definition_id: Option<&str>) -> Result<()> {
    require_config(cfg_dir)?;

    let store = FileStore::new(cfg_dir);
    let entries = match definition_id {
        Some(id) => {
            use recur::store::RecurrenceStore;
            store.generation_log(id)?
        }
        None => store.full_log()?,
    };

    if entries.is_empty() {
        println!("No occurrences generated yet.");
        return Ok(());
    }

    let rows: Vec<LogRow> = entries
        .iter()
        .map(|entry| LogRow {
            definition: entry.definition_id.clone(),
            index: entry.occurrence_index,
            generated_at: entry.generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            invoice: entry.invoice_id.clone(),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    Ok(())
}

/// List generated invoices
fn cmd_invoices(cfg_dir: &PathBuf, limit: Option<usize>) -> Result<()> {
    require_config(cfg_dir)?;

    let store = FileStore::new(cfg_dir);
    let invoices = store.invoices()?;

    if invoices.is_empty() {
        println!("No invoices generated yet.");
        return Ok(());
    }

    let shown = match limit {
        Some(n) => &invoices[invoices.len().saturating_sub(n)..],
        None => &invoices[..],
    };

    let rows: Vec<InvoiceRow> = shown
        .iter()
        .rev()
        .map(|invoice| InvoiceRow {
            number: invoice.id.clone(),
            date: invoice.issue_date.to_string(),
            due: invoice.due_date.to_string(),
            total: format!("{} {:.2}", invoice.currency, invoice.total),
            client: invoice.client.clone(),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    Ok(())
}

/// Show engine status
fn cmd_status(cfg_dir: &PathBuf) -> Result<()> {
    require_config(cfg_dir)?;

    let config = load_config(cfg_dir)?;
    let clients = load_clients(cfg_dir)?;
    let definitions = load_definitions(cfg_dir)?;
    let store = FileStore::new(cfg_dir);

    let now = Utc::now();
    let next_number = store.next_invoice_number(now.year() as u32)?;
    let due_now = recur::select_due(&store, now)?.len();

    println!("Recur Status");
    println!("{}", "-".repeat(50));
    println!("Config directory: {}", cfg_dir.display());
    println!("Clients:          {}", clients.len());
    println!("Definitions:      {}", definitions.len());
    println!("Due right now:    {due_now}");
    println!("Next invoice:     {next_number}");
    println!(
        "Tick period:      {}s ({} workers)",
        config.scheduler.tick_period_secs, config.scheduler.workers
    );

    let log = store.full_log()?;
    if !log.is_empty() {
        println!();
        println!("Recent generations:");
        for entry in log.iter().rev().take(5) {
            println!(
                "  {} #{} -> {} at {}",
                entry.definition_id,
                entry.occurrence_index,
                entry.invoice_id,
                entry.generated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}
