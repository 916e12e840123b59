use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use papergrab::config::{find_config_file, load_config, write_default_config, Config, LoggingConfig};
use papergrab::fallback::FallbackMode;
use papergrab::intent::{IntentRequest, QuantityMode};
use papergrab::models::{QuerySpec, RunSummary, SearchRequest, SortKey};
use papergrab::orchestrator::{BatchOrchestrator, CancellationFlag, StopPolicy, TopicRequest};
use papergrab::report;
use papergrab::sources::{ScopusSource, SearchSource};
use papergrab::utils::{load_identifiers, HttpClient};
use papergrab::Downloader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// papergrab - Search Scopus by topic and download open-access full text
#[derive(Parser, Debug)]
#[command(name = "papergrab")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search Scopus by topic and download open-access full text", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search Scopus and print the hits
    #[command(alias = "s")]
    Search {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        scopus: ScopusArgs,

        /// Number of hits to return
        #[arg(long, short = 'n', default_value_t = 20)]
        count: usize,

        /// Result offset
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Sort order (newest first whenever --from-year is given)
        #[arg(long, value_enum)]
        sort: Option<SortArg>,

        /// Only papers published in or after this year
        #[arg(long)]
        from_year: Option<i32>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Download PDFs for a list of DOIs
    #[command(alias = "d")]
    Download {
        /// DOI to download (repeatable)
        #[arg(long = "doi")]
        dois: Vec<String>,

        /// File with one DOI per line; blank lines and # comments are ignored
        #[arg(long)]
        doi_file: Option<PathBuf>,

        #[command(flatten)]
        download: DownloadArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Search a topic and download the best matching papers
    #[command(alias = "t")]
    Topic {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        scopus: ScopusArgs,

        /// Quantity tier: few (5), batch (20) or max (configured ceiling)
        #[arg(long, value_enum)]
        quantity_mode: Option<QuantityArg>,

        /// Exact number of papers wanted; overrides the tier
        #[arg(long, alias = "count")]
        target: Option<usize>,

        /// Maximum search entries to scan
        #[arg(long)]
        max_search_results: Option<usize>,

        /// Maximum identifiers to attempt
        #[arg(long)]
        max_attempts: Option<usize>,

        /// Stop after this many new downloads, whatever the stop policy
        #[arg(long)]
        max_success: Option<usize>,

        /// Prefer recent papers (last 3 years unless a window is given)
        #[arg(long)]
        latest: bool,

        /// Only papers from the last N years
        #[arg(long)]
        years_back: Option<u32>,

        /// Only papers published in or after this year; overrides --years-back
        #[arg(long)]
        from_year: Option<i32>,

        /// Sort order when no year filter is active
        #[arg(long, value_enum)]
        sort: Option<SortArg>,

        /// Stop after the target is on disk, or attempt exactly the target
        #[arg(long, value_enum, default_value_t = StopPolicyArg::EarlyStop)]
        stop_policy: StopPolicyArg,

        #[command(flatten)]
        download: DownloadArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show the effective configuration (credentials masked)
    Config {
        /// Write a default configuration file here instead
        #[arg(long, value_name = "PATH")]
        init: Option<PathBuf>,
    },
}

/// What to search for; exactly one is required
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
struct QueryArgs {
    /// Keyword phrase matched against title, abstract and keywords (repeatable, AND-joined)
    #[arg(long, short)]
    keywords: Vec<String>,

    /// Exact title
    #[arg(long)]
    title: Option<String>,

    /// Exact DOI
    #[arg(long)]
    doi: Option<String>,

    /// Raw Scopus query, used verbatim
    #[arg(long)]
    query: Option<String>,
}

impl QueryArgs {
    fn to_spec(&self) -> Result<QuerySpec> {
        if !self.keywords.is_empty() {
            return Ok(QuerySpec::Keywords(self.keywords.clone()));
        }
        match (&self.title, &self.doi, &self.query) {
            (Some(title), _, _) => Ok(QuerySpec::Title(title.clone())),
            (_, Some(doi), _) => Ok(QuerySpec::Doi(doi.clone())),
            (_, _, Some(query)) => Ok(QuerySpec::Raw(query.clone())),
            _ => bail!("one of --keywords, --title, --doi or --query is required"),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ScopusArgs {
    /// Elsevier API key (defaults to ELSEVIER_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Scopus entries requested per API call
    #[arg(long)]
    page_size: Option<usize>,
}

#[derive(Args, Debug, Clone)]
struct DownloadArgs {
    /// Output directory for PDFs
    #[arg(long)]
    outdir: Option<PathBuf>,

    /// Contact email for Unpaywall (defaults to UNPAYWALL_EMAIL)
    #[arg(long)]
    email: Option<String>,

    /// Fallback mode when no open-access copy is found
    #[arg(long, value_enum, alias = "scihub-fallback")]
    fallback: Option<FallbackArg>,

    /// Fallback command line, overriding discovery
    #[arg(long, alias = "scihub-cmd")]
    fallback_cmd: Option<String>,

    /// Per-identifier fallback timeout in seconds
    #[arg(long, alias = "scihub-timeout")]
    fallback_timeout: Option<u64>,

    /// Email substituted for {email} in the fallback arguments
    #[arg(long, alias = "scihub-email")]
    fallback_email: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Write the JSON report to this file and print its path
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SortArg {
    Citations,
    Date,
    Relevance,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Citations => SortKey::Citations,
            SortArg::Date => SortKey::Date,
            SortArg::Relevance => SortKey::Relevance,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum QuantityArg {
    Few,
    Batch,
    Max,
}

impl From<QuantityArg> for QuantityMode {
    fn from(arg: QuantityArg) -> Self {
        match arg {
            QuantityArg::Few => QuantityMode::Few,
            QuantityArg::Batch => QuantityMode::Batch,
            QuantityArg::Max => QuantityMode::Max,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FallbackArg {
    /// Open access only
    Off,
    /// Fallback after open access fails
    Auto,
    /// Fallback only
    #[value(alias = "on")]
    Force,
}

impl From<FallbackArg> for FallbackMode {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Off => FallbackMode::Off,
            FallbackArg::Auto => FallbackMode::Auto,
            FallbackArg::Force => FallbackMode::Force,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StopPolicyArg {
    EarlyStop,
    AttemptTarget,
}

impl From<StopPolicyArg> for StopPolicy {
    fn from(arg: StopPolicyArg) -> Self {
        match arg {
            StopPolicyArg::EarlyStop => StopPolicy::EarlyStop,
            StopPolicyArg::AttemptTarget => StopPolicy::AttemptTarget,
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool, logging: &LoggingConfig) {
    let level = match (quiet, verbose) {
        (true, _) => "error".to_string(),
        (false, 0) => logging.level.clone(),
        (false, 1) => "debug".to_string(),
        (false, _) => "trace".to_string(),
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("papergrab={}", level)),
    );

    // logs go to stderr so JSON on stdout stays parseable
    if logging.format.as_deref() == Some("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn apply_download_args(config: &mut Config, args: &DownloadArgs) {
    if let Some(email) = &args.email {
        config.credentials.unpaywall_email = Some(email.clone());
    }
    if let Some(mode) = args.fallback {
        config.fallback.mode = mode.into();
    }
    if let Some(timeout) = args.fallback_timeout {
        config.fallback.timeout_secs = timeout;
    }
    if let Some(email) = &args.fallback_email {
        config.fallback.email = Some(email.clone());
    }
}

fn apply_scopus_args(config: &mut Config, args: &ScopusArgs) {
    if let Some(key) = &args.api_key {
        config.credentials.elsevier_api_key = Some(key.clone());
    }
    if let Some(size) = args.page_size.filter(|s| *s > 0) {
        config.search.page_size = size;
    }
}

/// Build the `search` request; a year filter always sorts newest first
fn search_request(
    query: &QueryArgs,
    count: usize,
    start: usize,
    sort: Option<SortArg>,
    from_year: Option<i32>,
) -> Result<SearchRequest> {
    let freshness = IntentRequest {
        from_year,
        sort: sort.map(Into::into),
        ..Default::default()
    }
    .resolve_now(1)
    .freshness;

    Ok(SearchRequest::new(
        query.to_spec()?.build_with_year(freshness.from_year),
        count.max(1),
    )
    .sort(freshness.sort)
    .start(start))
}

fn print_summary(summary: &RunSummary, output: &OutputArgs) -> Result<ExitCode> {
    if output.json || output.out.is_some() {
        report::emit_json(summary, output.out.as_deref()).context("failed to write report")?;
    } else {
        print!("{}", report::render_summary(summary));
    }

    Ok(if summary.available() > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(find_config_file);
    let mut config = load_config(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("failed to load config {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;

    init_tracing(cli.verbose, cli.quiet, &config.logging);
    if let Some(path) = &config_path {
        tracing::debug!("Using config file: {}", path.display());
    }

    if let Some(timeout) = cli.timeout {
        config.http.timeout_secs = timeout;
    }

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, finishing the current item");
                cancel.cancel();
            }
        });
    }

    if let Commands::Config { init } = &cli.command {
        match init {
            Some(path) => {
                write_default_config(path)?;
                println!("Wrote default configuration to {}", path.display());
            }
            None => {
                match &config_path {
                    Some(path) => println!("# {}", path.display()),
                    None => println!("# no config file found; defaults and environment"),
                }
                print!("{}", config.to_toml_redacted()?);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let client = HttpClient::from_config(&config.http).context("failed to build HTTP client")?;

    match cli.command {
        Commands::Search {
            query,
            scopus,
            count,
            start,
            sort,
            from_year,
            output,
        } => {
            apply_scopus_args(&mut config, &scopus);
            let source = ScopusSource::new(&config, client)?;
            let request = search_request(&query, count, start, sort, from_year)?;

            let results = source.search(&request).await?;

            if output.json || output.out.is_some() {
                report::emit_json(&results, output.out.as_deref())
                    .context("failed to write report")?;
            } else {
                print!("{}", report::render_hits(&results));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Download {
            dois,
            doi_file,
            download,
            output,
        } => {
            let identifiers = load_identifiers(&dois, doi_file.as_deref())
                .with_context(|| format!("failed to read {:?}", doi_file))?;
            if identifiers.is_empty() {
                bail!("no DOI given; use --doi or --doi-file");
            }

            apply_download_args(&mut config, &download);
            let downloader =
                Downloader::from_config(&config, client, download.fallback_cmd.as_deref())?;
            let outdir = download
                .outdir
                .clone()
                .unwrap_or_else(|| config.downloads.default_path.clone());

            tracing::info!(
                "downloading {} identifiers to {}",
                identifiers.len(),
                outdir.display()
            );
            let summary = downloader.download_batch(&identifiers, &outdir, &cancel).await;
            print_summary(&summary, &output)
        }

        Commands::Topic {
            query,
            scopus,
            quantity_mode,
            target,
            max_search_results,
            max_attempts,
            max_success,
            latest,
            years_back,
            from_year,
            sort,
            stop_policy,
            download,
            output,
        } => {
            apply_scopus_args(&mut config, &scopus);
            apply_download_args(&mut config, &download);

            let search: Arc<dyn SearchSource> =
                Arc::new(ScopusSource::new(&config, client.clone())?);
            let downloader =
                Downloader::from_config(&config, client, download.fallback_cmd.as_deref())?;

            let request = TopicRequest {
                query: query.to_spec()?,
                intent: IntentRequest {
                    target,
                    quantity_mode: quantity_mode.map(Into::into),
                    latest,
                    years_back,
                    from_year,
                    sort: sort.map(Into::into),
                    max_search_results,
                    max_attempts,
                    max_success,
                },
                stop_policy: stop_policy.into(),
                outdir: download
                    .outdir
                    .clone()
                    .unwrap_or_else(|| config.downloads.default_path.clone()),
            };

            let orchestrator = BatchOrchestrator::new(search, downloader)
                .with_max_ceiling(config.quantity.max_ceiling)
                .with_cancellation(cancel.clone());

            let summary = orchestrator.run(&request).await?;
            print_summary(&summary, &output)
        }

        Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}
