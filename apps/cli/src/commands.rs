//! CLI command definitions, routing, and tracing setup.

use std::time::Duration;

use afriverse_core::atoms;
use afriverse_core::pipeline::{Bureau, ProgressReporter, SubmissionOutcome, submit};
use afriverse_shared::{
    AppConfig, ContextMap, EntryId, IngestJob, Message, QueryRequest, init_config, load_config,
    validate_config,
};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// AfriVerse: ingest, symbolize, and validate cultural knowledge.
#[derive(Parser)]
#[command(
    name = "afriverse",
    version,
    about = "Run the AfriVerse ingestion pipeline: transcribe, symbolize, and validate community knowledge.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start every pipeline worker and run until Ctrl-C.
    Run,

    /// Push one submission through the pipeline and report each stage.
    Submit {
        /// Backend entry id of the submission.
        entry_id: u64,

        /// Content reference (CID) in the storage gateway.
        cid: String,

        /// Original filename of the upload.
        #[arg(short, long, default_value = "submission.wav")]
        filename: String,

        /// Spoken language code.
        #[arg(short, long, default_value = "sw")]
        language: String,

        /// Content type of the upload.
        #[arg(long, default_value = "audio")]
        content_type: String,

        /// Give up after this many seconds without a stage result.
        #[arg(long, default_value = "180")]
        idle_secs: u64,
    },

    /// Ask the knowledge base a question.
    Query {
        /// Free-text question.
        text: String,

        /// Community whose knowledge to favour.
        #[arg(short, long)]
        community: Option<String>,

        /// User id recorded with the query.
        #[arg(long, default_value = "anonymous")]
        user: String,
    },

    /// Check atoms offline: well-formed, repaired, or dropped.
    Atoms {
        /// Atoms to check, e.g. "(treats neem malaria)".
        #[arg(required = true)]
        atoms: Vec<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "afriverse=info",
        1 => "afriverse=debug",
        _ => "afriverse=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run => cmd_run().await,
        Command::Submit {
            entry_id,
            cid,
            filename,
            language,
            content_type,
            idle_secs,
        } => {
            let job = IngestJob {
                entry_id: EntryId(entry_id),
                content_reference: cid,
                filename,
                language,
                content_type,
            };
            cmd_submit(job, Duration::from_secs(idle_secs)).await
        }
        Command::Query {
            text,
            community,
            user,
        } => cmd_query(text, community, user).await,
        Command::Atoms { atoms } => cmd_atoms(&atoms),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

fn resolved_config() -> Result<AppConfig> {
    let config = load_config()?;
    validate_config(&config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run() -> Result<()> {
    let config = resolved_config()?;
    let bureau = Bureau::start(&config)?;

    let routes = bureau.routes();
    println!();
    println!("  AfriVerse pipeline running against {}", config.backend.base_url);
    println!("  ingest:     {}", routes.ingest);
    println!("  transcribe: {}", routes.transcribe);
    println!("  symbolizer: {}", routes.symbolizer);
    println!("  validator:  {}", routes.validator);
    println!("  query:      {}", routes.query);
    println!();
    println!("  Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for Ctrl-C: {e}"))?;

    info!("shutdown requested");
    bureau.shutdown().await;
    Ok(())
}

async fn cmd_submit(job: IngestJob, idle_timeout: Duration) -> Result<()> {
    let config = resolved_config()?;
    let bureau = Bureau::start(&config)?;

    info!(
        entry_id = %job.entry_id,
        cid = %job.content_reference,
        language = %job.language,
        "submitting entry"
    );

    let entry_id = job.entry_id;
    let reporter = CliProgress::new(entry_id);
    let outcome = submit(&bureau, job, idle_timeout, &reporter).await;
    bureau.shutdown().await;

    println!();
    if let Some(decision) = &outcome.decision {
        println!("  Entry {entry_id} {}", decision.decision);
        println!("  Approval:   {:.1}%", decision.approval_rate * 100.0);
        println!("  Confidence: {:.2}", decision.average_confidence);
    }
    println!("  Results: {}", outcome.results.len());
    println!("  Time:    {:.1}s", outcome.elapsed.as_secs_f64());
    println!();

    if let Some(error) = outcome.failure {
        return Err(eyre!("entry {entry_id} failed: {error}"));
    }
    if outcome.timed_out {
        return Err(eyre!(
            "entry {entry_id}: no stage result within {}s",
            idle_timeout.as_secs()
        ));
    }
    Ok(())
}

async fn cmd_query(text: String, community: Option<String>, user: String) -> Result<()> {
    let config = resolved_config()?;
    let bureau = Bureau::start(&config)?;

    let mut context = ContextMap::new();
    if let Some(community) = community {
        context.insert("community".into(), serde_json::Value::String(community));
    }
    let request = QueryRequest {
        query: text,
        user_id: user,
        context,
    };

    let mut mailbox = bureau.mailbox("cli");
    mailbox.send(&bureau.routes().query, request);
    let reply = mailbox
        .recv_timeout(config.backend.timeout() + Duration::from_secs(5))
        .await;
    drop(mailbox);
    bureau.shutdown().await;

    let Some(envelope) = reply else {
        return Err(eyre!("no answer from the query worker"));
    };
    let Message::QueryResponse(response) = envelope.message else {
        return Err(eyre!("unexpected reply: {:?}", envelope.message.kind()));
    };
    if !response.success {
        return Err(eyre!(
            "query failed: {}",
            response.error.unwrap_or_default()
        ));
    }

    println!();
    println!("  {}", response.answer.as_deref().unwrap_or("(no answer)"));
    if let Some(confidence) = response.confidence {
        println!("  Confidence: {:.0}%", confidence * 100.0);
    }
    for step in &response.reasoning_trace {
        println!("    ↳ {step}");
    }
    if !response.sources.is_empty() {
        println!("  Sources: {}", response.sources.join(", "));
    }
    println!();
    Ok(())
}

fn cmd_atoms(candidates: &[String]) -> Result<()> {
    let mut dropped = 0;
    for atom in candidates {
        if atoms::is_well_formed(atom) {
            println!("  ok        {atom}");
            continue;
        }
        match atoms::repair(atom) {
            Ok(repaired) => println!("  repaired  {atom}  →  {repaired}"),
            Err(e) => {
                dropped += 1;
                println!("  dropped   {atom}  ({e})");
            }
        }
    }

    println!();
    println!("  {} kept, {dropped} dropped", candidates.len() - dropped);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// One-line summary of a stage result.
fn describe(message: &Message) -> String {
    match message {
        Message::IngestResult(r) if r.success => "ingest      transcribed".to_string(),
        Message::TranscribeResult(r) if r.success => format!(
            "transcribe  transcribed ({})",
            r.language.as_deref().unwrap_or("unknown language")
        ),
        Message::SymbolizeResult(r) if r.success => {
            format!("symbolize   {} atoms", r.atoms.len())
        }
        Message::ValidationResult(r) => format!(
            "validate    {} ({:.2}) {}",
            r.decision, r.confidence, r.notes
        ),
        Message::ConsensusDecision(d) => format!(
            "consensus   {} ({}/{} approved, confidence {:.2})",
            d.decision, d.approved_count, d.total_count, d.average_confidence
        ),
        other => format!("{:?} failed", other.kind()),
    }
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(entry_id: EntryId) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message(format!("Ingesting entry {entry_id}"));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn result(&self, message: &Message) {
        let next = match message {
            Message::IngestResult(r) if r.success => "Symbolizing transcript",
            Message::TranscribeResult(r) if r.success => "Symbolizing transcript",
            Message::SymbolizeResult(r) if r.success => "Validating atoms",
            Message::ValidationResult(_) => "Reaching consensus",
            _ => "Finishing",
        };
        self.spinner.println(format!("  {}", describe(message)));
        self.spinner.set_message(next);
    }

    fn done(&self, _outcome: &SubmissionOutcome) {
        self.spinner.finish_and_clear();
    }
}
