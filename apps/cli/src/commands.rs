//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

use wikiharvest_checkpoint::CheckpointStore;
use wikiharvest_client::{EnrichClient, ItemScope, RetryPolicy, RetryTransport, WikiClient};
use wikiharvest_pipeline::{ProgressReporter, Scheduler, StagePipeline};
use wikiharvest_report::{OverwritePolicy, ReportWriter, export_pages};
use wikiharvest_shared::{
    AppConfig, ErrorLog, RunConfig, config_file_path, init_config, load_config,
    resolve_credentials,
};
use wikiharvest_worktree::{ItemFilter, build_work_tree};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// WikiHarvest — harvest and enrich a wiki space, resumably.
#[derive(Parser)]
#[command(
    name = "wikiharvest",
    version,
    about = "Harvest a wiki space through an LLM enrichment pipeline, with checkpointed resume.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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
    /// Harvest a scope: enumerate, enrich, checkpoint, and report.
    Run {
        /// Space key to harvest (e.g., ENG).
        #[arg(required_unless_present = "parent", conflicts_with = "parent")]
        scope: Option<String>,

        /// Harvest one page and its descendants instead of a space.
        /// Accepts a page id or a wiki page URL.
        #[arg(long)]
        parent: Option<String>,

        /// Output directory (defaults to the configured output_dir).
        #[arg(short, long)]
        out: Option<String>,

        /// Concurrent items per batch (overrides config).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Items per batch, i.e. the checkpoint sync interval (overrides config).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Maximum stage input size in bytes before chunking (overrides config).
        #[arg(long)]
        chunk_limit: Option<usize>,
    },

    /// Print the filtered work tree for a scope without processing anything.
    Tree {
        /// Space key to enumerate.
        #[arg(required_unless_present = "parent", conflicts_with = "parent")]
        scope: Option<String>,

        /// Enumerate one page and its descendants instead of a space.
        #[arg(long)]
        parent: Option<String>,

        /// Output directory holding the checkpoint (defaults to config).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Regenerate the reports for a scope from its checkpoint.
    Report {
        /// Space key.
        #[arg(required_unless_present = "parent", conflicts_with = "parent")]
        scope: Option<String>,

        /// Report on one page and its descendants instead of a space.
        #[arg(long)]
        parent: Option<String>,

        /// Output directory holding the checkpoint (defaults to config).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Export fetched page content as a directory tree of markdown files.
    Export {
        /// Space key.
        #[arg(required_unless_present = "parent", conflicts_with = "parent")]
        scope: Option<String>,

        /// Export one page and its descendants instead of a space.
        #[arg(long)]
        parent: Option<String>,

        /// Directory to export into.
        #[arg(long)]
        dest: String,

        /// Output directory holding the checkpoint (defaults to config).
        #[arg(short, long)]
        out: Option<String>,

        /// What to do when a destination file already exists.
        #[arg(long, default_value = "increment")]
        overwrite: OverwriteArg,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overwrite behavior for export.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum OverwriteArg {
    Overwrite,
    Skip,
    Increment,
}

impl From<OverwriteArg> for OverwritePolicy {
    fn from(arg: OverwriteArg) -> Self {
        match arg {
            OverwriteArg::Overwrite => OverwritePolicy::Overwrite,
            OverwriteArg::Skip => OverwritePolicy::Skip,
            OverwriteArg::Increment => OverwritePolicy::Increment,
        }
    }
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
        0 => "wikiharvest=info",
        1 => "wikiharvest=debug",
        _ => "wikiharvest=trace",
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
        Command::Run {
            scope,
            parent,
            out,
            concurrency,
            batch_size,
            chunk_limit,
        } => {
            let scope = resolve_scope(scope, parent.as_deref())?;
            cmd_run(&scope, out.as_deref(), concurrency, batch_size, chunk_limit).await
        }
        Command::Tree { scope, parent, out } => {
            let scope = resolve_scope(scope, parent.as_deref())?;
            cmd_tree(&scope, out.as_deref()).await
        }
        Command::Report { scope, parent, out } => {
            let scope = resolve_scope(scope, parent.as_deref())?;
            cmd_report(&scope, out.as_deref()).await
        }
        Command::Export {
            scope,
            parent,
            dest,
            out,
            overwrite,
        } => {
            let scope = resolve_scope(scope, parent.as_deref())?;
            cmd_export(&scope, &dest, out.as_deref(), overwrite.into()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup helpers
// ---------------------------------------------------------------------------

/// Turn the positional space key or `--parent` reference into a scope.
fn resolve_scope(scope: Option<String>, parent: Option<&str>) -> Result<ItemScope> {
    match (scope, parent) {
        (Some(key), None) => Ok(ItemScope::Space(key)),
        (None, Some(reference)) => Ok(ItemScope::Parent(parent_page_id(reference)?)),
        _ => Err(eyre!("give either a space key or --parent")),
    }
}

/// Accept a bare page id, or a wiki URL carrying `pageId=` or `/pages/<id>`.
fn parent_page_id(reference: &str) -> Result<String> {
    if !reference.is_empty() && reference.chars().all(|c| c.is_ascii_digit()) {
        return Ok(reference.to_string());
    }

    let url = Url::parse(reference)
        .map_err(|_| eyre!("'{reference}' is neither a page id nor a page URL"))?;
    if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "pageId") {
        return Ok(id.into_owned());
    }

    let mut segments = url.path_segments().into_iter().flatten();
    while let Some(segment) = segments.next() {
        if segment == "pages" {
            if let Some(id) = segments.next() {
                if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                    return Ok(id.to_string());
                }
            }
        }
    }

    Err(eyre!("could not find a page id in '{reference}'"))
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve the output directory from a flag or the config, and create it.
fn resolve_output_dir(config: &AppConfig, out: Option<&str>) -> Result<PathBuf> {
    let dir = expand_home(out.unwrap_or(&config.defaults.output_dir));
    std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("cannot create output directory '{}': {e}", dir.display()))?;
    Ok(dir)
}

/// Build the wiki client and enrichment client from the config.
fn build_clients(
    config: &AppConfig,
    run_config: &RunConfig,
    error_log: ErrorLog,
) -> Result<(WikiClient, EnrichClient)> {
    if config.wiki.base_url.is_empty() {
        return Err(eyre!(
            "wiki.base_url is not configured — run 'wikiharvest config init' and edit {}",
            config_file_path()?.display()
        ));
    }
    let base_url = Url::parse(&config.wiki.base_url)
        .map_err(|e| eyre!("invalid wiki.base_url '{}': {e}", config.wiki.base_url))?;
    let endpoint = Url::parse(&config.enrichment.endpoint).map_err(|e| {
        eyre!(
            "invalid enrichment.endpoint '{}': {e}",
            config.enrichment.endpoint
        )
    })?;

    let credentials = resolve_credentials(config)?;
    if credentials.is_none() {
        warn!("no wiki credentials in the environment, connecting anonymously");
    }

    let transport = RetryTransport::new(RetryPolicy::from(run_config), error_log)?;
    let wiki = WikiClient::new(transport.clone(), base_url, credentials);
    let enrich = EnrichClient::new(transport, endpoint, config.enrichment.model.clone());
    Ok((wiki, enrich))
}

fn error_log_path(output_dir: &Path, scope: &str) -> PathBuf {
    output_dir.join(format!("{scope}_errors.log"))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    scope: &ItemScope,
    out: Option<&str>,
    concurrency: Option<usize>,
    batch_size: Option<usize>,
    chunk_limit: Option<usize>,
) -> Result<()> {
    let config = load_config()?;
    let output_dir = resolve_output_dir(&config, out)?;
    let scope_key = scope.key();

    let mut run_config = RunConfig::from(&config);
    if let Some(n) = concurrency {
        run_config.concurrency = n;
    }
    if let Some(n) = batch_size {
        run_config.batch_size = n;
    }
    if let Some(n) = chunk_limit {
        run_config.chunk_limit = n;
    }

    let error_log = ErrorLog::new(error_log_path(&output_dir, &scope_key));
    let (wiki, enrich) = build_clients(&config, &run_config, error_log.clone())?;

    info!(
        scope = %scope,
        output_dir = %output_dir.display(),
        concurrency = run_config.concurrency,
        batch_size = run_config.batch_size,
        "starting harvest"
    );

    let reporter = CliProgress::new();
    reporter.phase("Enumerating items");
    let filter = ItemFilter::from_config(&config.filters);
    let (tree, enumerated) = build_work_tree(&wiki, scope, &filter).await?;
    info!(
        enumerated,
        kept = tree.len(),
        "work tree built"
    );

    if tree.is_empty() {
        reporter.finish();
        println!("No items matched in {scope} ({enumerated} enumerated).");
        return Ok(());
    }

    // Ctrl-C flips the cancel flag; the scheduler stops at the next batch
    // boundary with the checkpoint already on disk.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing current batch");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let pipeline = StagePipeline::new(wiki, enrich, run_config.chunk_limit);
    let scheduler = Scheduler::new(
        pipeline,
        CheckpointStore::for_scope(&output_dir, &scope_key),
        ReportWriter::for_scope(&output_dir, &scope_key),
        &scope_key,
        error_log,
        &run_config,
    );

    let summary = scheduler.run(&tree, cancel, &reporter).await?;
    reporter.finish();

    println!();
    if summary.cancelled {
        println!("  Harvest interrupted — run the same command to resume.");
    } else {
        println!("  Harvest finished.");
    }
    println!("  Scope:      {scope}");
    println!("  Items:      {}", summary.total);
    println!("  Processed:  {}", summary.processed);
    println!("  Skipped:    {}", summary.skipped);
    println!("  Failed:     {}", summary.failed);
    println!("  Checkpoint: {}", summary.checkpoint_path.display());
    println!("  Report:     {}", summary.report_md_path.display());
    println!("  JSON:       {}", summary.report_json_path.display());
    if summary.failed > 0 {
        println!("  Errors:     {}", summary.error_log_path.display());
    }
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// tree / report / export
// ---------------------------------------------------------------------------

async fn cmd_tree(scope: &ItemScope, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let output_dir = resolve_output_dir(&config, out)?;
    let run_config = RunConfig::from(&config);
    let scope_key = scope.key();
    let error_log = ErrorLog::new(error_log_path(&output_dir, &scope_key));
    let (wiki, _) = build_clients(&config, &run_config, error_log)?;

    let filter = ItemFilter::from_config(&config.filters);
    let (tree, enumerated) = build_work_tree(&wiki, scope, &filter).await?;
    let checkpoint = CheckpointStore::for_scope(&output_dir, &scope_key).load(&scope_key)?;

    println!("{scope}: {} items ({enumerated} enumerated)", tree.len());
    for id in tree.preorder() {
        let Some(item) = tree.get(id) else { continue };
        let marker = if checkpoint.is_processed(id) { "x" } else { " " };
        let indent = "  ".repeat(tree.depth(id));
        println!("{indent}- [{marker}] {}", item.title);
    }
    Ok(())
}

async fn cmd_report(scope: &ItemScope, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let output_dir = resolve_output_dir(&config, out)?;
    let run_config = RunConfig::from(&config);
    let scope_key = scope.key();
    let error_log = ErrorLog::new(error_log_path(&output_dir, &scope_key));
    let (wiki, _) = build_clients(&config, &run_config, error_log)?;

    let filter = ItemFilter::from_config(&config.filters);
    let (tree, _) = build_work_tree(&wiki, scope, &filter).await?;
    let checkpoint = CheckpointStore::for_scope(&output_dir, &scope_key).load(&scope_key)?;

    let writer = ReportWriter::for_scope(&output_dir, &scope_key);
    writer.write(&tree, &checkpoint)?;
    println!("Report written:");
    println!("  {}", writer.md_path().display());
    println!("  {}", writer.json_path().display());
    Ok(())
}

async fn cmd_export(
    scope: &ItemScope,
    dest: &str,
    out: Option<&str>,
    policy: OverwritePolicy,
) -> Result<()> {
    let config = load_config()?;
    let output_dir = resolve_output_dir(&config, out)?;
    let run_config = RunConfig::from(&config);
    let scope_key = scope.key();
    let error_log = ErrorLog::new(error_log_path(&output_dir, &scope_key));
    let (wiki, _) = build_clients(&config, &run_config, error_log)?;

    let filter = ItemFilter::from_config(&config.filters);
    let (tree, _) = build_work_tree(&wiki, scope, &filter).await?;
    let checkpoint = CheckpointStore::for_scope(&output_dir, &scope_key).load(&scope_key)?;

    let export_root = expand_home(dest);
    let stats = export_pages(&tree, &checkpoint, &export_root, policy)?;
    println!(
        "Exported {} pages to {} ({} skipped).",
        stats.written,
        export_root.display(),
        stats.skipped
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

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

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_done(&self, current: usize, total: usize, title: &str) {
        self.spinner
            .set_message(format!("Enriched [{current}/{total}] {title}"));
    }
}
