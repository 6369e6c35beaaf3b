mod display;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use triage_agent::{Agent, RunOutcome};
use triage_ai::{Ensemble, OllamaEngine};
use triage_core::{Settings, Ticket, classifier_input, clean_subject_body};
use triage_tracker::TrackerClient;

#[derive(Parser)]
#[command(name = "triage", version)]
#[command(about = "Classify support tickets and file them as tracker tasks", long_about = None)]
struct Cli {
    /// Settings file (TOML). Built-in defaults are used when absent.
    #[arg(long, short, global = true, env = "TRIAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Tracker list that receives new tasks (overrides the settings file)
    #[arg(long, global = true, env = "TRIAGE_LIST_ID")]
    list_id: Option<String>,

    /// Tracker API token
    #[arg(long, global = true, env = "TRIAGE_TRACKER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent on one ticket and file the resulting task
    Submit {
        #[command(flatten)]
        ticket: TicketArgs,

        /// Print the outcome and trace as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify one ticket without touching the tracker
    Classify {
        #[command(flatten)]
        ticket: TicketArgs,

        #[arg(long)]
        json: bool,
    },

    /// List the tracker list's custom fields and dropdown options
    Fields {
        #[arg(long)]
        json: bool,
    },

    /// Check models, credentials, the reasoning engine and the tracker
    Health,
}

#[derive(Args)]
struct TicketArgs {
    #[arg(long, short)]
    subject: String,

    #[arg(long, short, default_value = "")]
    body: String,
}

impl TicketArgs {
    fn ticket(&self) -> anyhow::Result<Ticket> {
        Ok(Ticket::new(&self.subject, &self.body)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("triage v{}", env!("CARGO_PKG_VERSION"));

    let settings = Arc::new(load_settings(&cli)?);
    match &cli.command {
        Command::Submit { ticket, json } => submit(&cli, settings, ticket, *json).await,
        Command::Classify { ticket, json } => classify(&settings, ticket, *json).await,
        Command::Fields { json } => fields(&cli, settings, *json).await,
        Command::Health => health(&cli, settings).await,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(list_id) = &cli.list_id {
        settings.tracker.list_id = list_id.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn tracker(cli: &Cli, settings: Arc<Settings>) -> anyhow::Result<TrackerClient> {
    let token = cli
        .token
        .as_deref()
        .context("tracker token missing: set TRIAGE_TRACKER_TOKEN or pass --token")?;
    Ok(TrackerClient::new(settings, token)?)
}

fn ensemble(settings: &Settings) -> anyhow::Result<Ensemble> {
    Ensemble::load_onnx(
        &settings.models.dir,
        settings.enrichment.classifier_timeout(),
        settings.enrichment.tag_threshold,
    )
    .with_context(|| format!("loading classifiers from {}", settings.models.dir.display()))
}

async fn submit(
    cli: &Cli,
    settings: Arc<Settings>,
    args: &TicketArgs,
    json: bool,
) -> anyhow::Result<()> {
    let ticket = args.ticket()?;
    let tracker = tracker(cli, settings.clone())?;
    let ensemble = ensemble(&settings)?;
    let engine = OllamaEngine::new(&settings.engine)?;
    let agent = Agent::new(
        Arc::new(engine),
        Arc::new(ensemble),
        Arc::new(tracker),
        settings,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    let outcome = agent.run_with_cancel(&ticket, &cancel).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", display::outcome_card(&outcome));
    }
    match outcome {
        RunOutcome::Terminated { .. } => Ok(()),
        RunOutcome::Failed { error, .. } => bail!("run failed: {error}"),
    }
}

async fn classify(settings: &Settings, args: &TicketArgs, json: bool) -> anyhow::Result<()> {
    let ticket = args.ticket()?;
    let ensemble = ensemble(settings)?;
    let (subject, body) = clean_subject_body(ticket.subject(), ticket.body());
    let (results, record) = ensemble.enrich(&classifier_input(&subject, &body)).await?;

    if json {
        let out = serde_json::json!({ "classifications": results, "enrichment": record });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", display::classification_card(&results, &record));
    }
    Ok(())
}

async fn fields(cli: &Cli, settings: Arc<Settings>, json: bool) -> anyhow::Result<()> {
    let client = tracker(cli, settings.clone())?;
    let fields = client
        .list_fields()
        .await
        .with_context(|| format!("listing fields of list {}", client.list_id()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(fields)?);
    } else {
        print!("{}", display::fields_table(fields, &settings.fields));
    }
    Ok(())
}

async fn health(cli: &Cli, settings: Arc<Settings>) -> anyhow::Result<()> {
    let mut failures = 0;
    let mut check = |name: &str, result: anyhow::Result<String>| match result {
        Ok(detail) => println!("  ok    {name:<18} {detail}"),
        Err(e) => {
            failures += 1;
            println!("  FAIL  {name:<18} {e:#}");
        }
    };

    check(
        "classifiers",
        ensemble(&settings).map(|_| settings.models.dir.display().to_string()),
    );

    let engine = OllamaEngine::new(&settings.engine)?;
    let reachable = engine.is_available().await;
    check(
        "reasoning engine",
        if reachable {
            Ok(format!("{} at {}", engine.model(), settings.engine.base_url))
        } else {
            Err(anyhow::anyhow!("no answer from {}", settings.engine.base_url))
        },
    );

    match tracker(cli, settings.clone()) {
        Ok(client) => {
            check("tracker token", Ok("present".into()));
            let listed = client
                .list_fields()
                .await
                .map(|f| format!("list {} has {} custom fields", client.list_id(), f.len()))
                .map_err(anyhow::Error::from);
            check("tracker list", listed);
        }
        Err(e) => check("tracker token", Err(e)),
    }

    if failures > 0 {
        bail!("{failures} health check(s) failed");
    }
    Ok(())
}
