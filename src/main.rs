mod automation;
mod chromedriver_manager;
mod config;
mod csv_loader;
mod error;
mod models;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use automation::browser::BrowserDriver;
use automation::{AutomationEngine, RunProfile};
use chromedriver_manager::ChromeDriverManager;
use config::AppConfig;
use csv_loader::TaskColumns;
use error::AutomationError;
use models::{ClassificationPlan, FormTask, ReassignTargets, RunSummary};

const CLASSIFICATION_CHOICES: [&str; 5] = [
    "Corretiva Planejada",
    "Corretiva",
    "Melhoria",
    "Acompanhamento",
    "Atendimento",
];

/// Automates the pending-O.S. screen: accepting, classifying and
/// reassigning work orders, and editing form fields from a spreadsheet.
#[derive(Parser)]
#[command(name = "os-automator", version, about)]
struct Cli {
    /// Path to the configuration file (defaults to the per-user location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run Chrome without a visible window.
    #[arg(long, global = true)]
    headless: bool,

    /// URL of the O.S. management screen, overriding the configuration.
    #[arg(long, global = true)]
    page_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept and classify every unclassified O.S. with one classification.
    Classify {
        /// Classification to apply; prompted interactively when omitted.
        #[arg(long)]
        classification: Option<String>,
    },
    /// Classify O.S. according to a published CSV spreadsheet.
    Plan {
        /// Published-CSV URL of the spreadsheet; prompted when omitted.
        #[arg(long)]
        sheet_url: Option<String>,
    },
    /// Accept every pending O.S. and reassign group, activity and object.
    Reassign {
        #[arg(long)]
        group: String,
        #[arg(long)]
        activity: String,
        #[arg(long)]
        object: String,
    },
    /// Edit form-field descriptions and validations from a spreadsheet.
    Form {
        /// Published-CSV URL of the spreadsheet; prompted when omitted.
        #[arg(long)]
        sheet_url: Option<String>,
    },
}

/// Everything a run needs, resolved before the browser starts. Spreadsheet
/// downloads and prompts happen here so a bad input never leaves a Chrome
/// instance behind.
enum PreparedCommand {
    Classify(String),
    Plan(ClassificationPlan),
    Reassign(ReassignTargets),
    Form(Vec<FormTask>),
}

impl PreparedCommand {
    fn profile(&self, config: &AppConfig) -> RunProfile {
        let wait_timeout = Duration::from_millis(config.wait_timeout_ms);
        match self {
            Self::Classify(_) => RunProfile::classification(wait_timeout, config.max_open_windows),
            Self::Plan(_) => RunProfile::spreadsheet_plan(wait_timeout, config.max_open_windows),
            Self::Reassign(_) => RunProfile::bulk_reassign(wait_timeout, config.max_open_windows),
            Self::Form(_) => RunProfile::form_fields(wait_timeout, config.form_max_open_windows),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.headless {
        config.headless = true;
    }
    if let Some(url) = &cli.page_url {
        config.page_url = url.clone();
    }
    let errors = config.validate();
    if !errors.is_empty() {
        for message in &errors {
            error!("configuration: {message}");
        }
        bail!("invalid configuration");
    }

    let prepared = prepare_command(&cli.command, &config).await?;
    let profile = prepared.profile(&config);

    let manager = if config.manage_chromedriver {
        let manager = ChromeDriverManager::new(config.chromedriver_path.clone());
        manager.start_driver(config.driver_port).await?;
        Some(manager)
    } else {
        None
    };

    let result = run(&config, profile, prepared).await;

    if let Some(manager) = &manager {
        manager.stop_driver().await;
    }

    match result {
        Ok(summary) => {
            info!(
                "Run complete: {} processed, {} skipped, {} failed across {} page(s)",
                summary.recorded, summary.skipped, summary.failed, summary.pages
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn run(
    config: &AppConfig,
    profile: RunProfile,
    prepared: PreparedCommand,
) -> Result<RunSummary> {
    let browser = BrowserDriver::new(
        config.headless,
        config.driver_port,
        config.wait_strategy,
        Duration::from_millis(config.poll_interval_ms),
    )
    .await?;
    let mut engine = AutomationEngine::new(browser, profile).await?;

    let outcome = async {
        engine.navigate(&config.page_url).await?;
        engine.prepare_page().await?;
        match &prepared {
            PreparedCommand::Classify(classification) => {
                engine.run_classification(classification).await
            }
            PreparedCommand::Plan(plan) => engine.run_spreadsheet_plan(plan).await,
            PreparedCommand::Reassign(targets) => engine.run_bulk_reassign(targets).await,
            PreparedCommand::Form(tasks) => engine.run_form_tasks(tasks).await,
        }
    }
    .await;

    // The session is torn down on both paths so no Chrome lingers.
    let quit = engine.close().await;
    let summary = outcome?;
    quit?;
    Ok(summary)
}

async fn prepare_command(command: &Commands, config: &AppConfig) -> Result<PreparedCommand> {
    match command {
        Commands::Classify { classification } => {
            let classification = match classification {
                Some(value) => value.clone(),
                None => prompt_classification()?,
            };
            Ok(PreparedCommand::Classify(classification))
        }
        Commands::Plan { sheet_url } => {
            let url = resolve_sheet_url(sheet_url.as_deref())?;
            let mapping = csv_loader::load_classification_map(
                &url,
                config.id_column,
                config.classification_column,
            )
            .await?;
            Ok(PreparedCommand::Plan(ClassificationPlan::new(
                mapping,
                &config.classification_aliases,
                &config.allowed_classifications,
            )))
        }
        Commands::Reassign {
            group,
            activity,
            object,
        } => Ok(PreparedCommand::Reassign(ReassignTargets {
            group: group.clone(),
            activity: activity.clone(),
            object: object.clone(),
        })),
        Commands::Form { sheet_url } => {
            let url = resolve_sheet_url(sheet_url.as_deref())?;
            let columns = TaskColumns {
                question: config.question_column,
                ordinal: config.ordinal_column,
                edit: config.edit_column,
                validation: config.validation_column,
            };
            let tasks = csv_loader::load_form_tasks(&url, &columns).await?;
            Ok(PreparedCommand::Form(tasks))
        }
    }
}

/// Interactive numbered menu over the accepted classifications.
fn prompt_classification() -> Result<String> {
    println!("Choose the classification to apply:");
    for (index, choice) in CLASSIFICATION_CHOICES.iter().enumerate() {
        println!("  {}. {choice}", index + 1);
    }
    print!("Number (1-{}): ", CLASSIFICATION_CHOICES.len());
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let picked = line
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| CLASSIFICATION_CHOICES.get(i));
    match picked {
        Some(choice) => Ok(choice.to_string()),
        None => Err(AutomationError::configuration(format!(
            "\"{}\" is not a number between 1 and {}",
            line.trim(),
            CLASSIFICATION_CHOICES.len()
        ))
        .into()),
    }
}

/// Resolves the spreadsheet URL, prompting when the flag was omitted. The
/// sheet must be published as CSV; anything else fails here, before the
/// browser starts.
fn resolve_sheet_url(flag: Option<&str>) -> Result<String> {
    let url = match flag {
        Some(url) => url.to_string(),
        None => {
            print!("Published-CSV URL of the spreadsheet: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    if url.is_empty() || !url.contains("csv") {
        return Err(AutomationError::configuration(
            "the spreadsheet URL must point at a published CSV export (it should contain \"csv\")",
        )
        .into());
    }
    Ok(url)
}
