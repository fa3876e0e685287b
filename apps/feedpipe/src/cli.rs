//! # CLI Module
//!
//! Command definitions and their implementations.
//!
//! Every subcommand has a `cmd_*` function that does the work and returns
//! its result, so commands can be exercised without spawning the binary.
//! Stage failures come back as failed [`OperationResponse`]s (status 1);
//! `Err` is reserved for unusable input such as a missing token.

use crate::pipeline::{FeedStages, HttpStages, RunSummary, run_jobs};
use crate::plan::{DEFAULT_MARKETPLACE, JobSpec, PlanError, RunPlan};
use clap::{Args, Parser, Subcommand};
use feedpipe_client::FeedClient;
use feedpipe_core::{
    Environment, FeedError, FeedRequest, FeedScope, FeedType, FilterCriteria, OperationResponse,
    StageKind, decompress_file, filter_file,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error("No token given: pass --token or set FEEDPIPE_TOKEN")]
    MissingToken,

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Cannot render output: {0}")]
    Output(#[from] serde_json::Error),
}

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Download, decompress and filter marketplace item feeds.
#[derive(Debug, Parser)]
#[command(name = "feedpipe", version, about)]
pub struct Cli {
    /// OAuth token, with or without the "Bearer " prefix.
    #[arg(long, env = "FEEDPIPE_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Feed service environment: production or sandbox.
    #[arg(long = "env", env = "FEEDPIPE_ENV", global = true, default_value = "sandbox")]
    pub environment: Environment,

    /// Override the feed service base URL.
    #[arg(long, env = "FEEDPIPE_BASE_URL", global = true, hide = true)]
    pub base_url: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download one feed file.
    Fetch(FetchArgs),

    /// Decompress a downloaded .gz feed file next to itself.
    Unzip {
        /// The .gz feed file.
        file: PathBuf,
    },

    /// Filter a decompressed feed file.
    Filter {
        /// The decompressed feed file.
        file: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Fetch, decompress and filter one or more feeds concurrently.
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// item or item_snapshot.
    #[arg(long)]
    pub feed_type: FeedType,

    #[arg(long)]
    pub category: String,

    /// Day of an item feed, yyyyMMdd.
    #[arg(long)]
    pub date: Option<String>,

    /// Hour of a snapshot feed, yyyy-MM-ddTHH:00:00.000Z.
    #[arg(long)]
    pub snapshot_date: Option<String>,

    /// NEWLY_LISTED or ALL_ACTIVE (item feeds only).
    #[arg(long)]
    pub scope: Option<FeedScope>,

    #[arg(long, default_value = DEFAULT_MARKETPLACE)]
    pub marketplace: String,

    /// Download directory (default: current directory).
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Keep records with this item id (repeatable).
    #[arg(long = "item-id")]
    pub item_ids: Vec<String>,

    /// Keep records from this seller (repeatable).
    #[arg(long = "seller")]
    pub sellers: Vec<String>,

    /// Keep records in this leaf category (repeatable).
    #[arg(long = "leaf-category")]
    pub leaf_categories: Vec<String>,

    /// Keep records located in this country (repeatable).
    #[arg(long = "country")]
    pub countries: Vec<String>,
}

impl FilterArgs {
    pub fn to_criteria(&self) -> FilterCriteria {
        FilterCriteria::new()
            .with_item_ids(self.item_ids.iter().cloned())
            .with_seller_usernames(self.sellers.iter().cloned())
            .with_leaf_category_ids(self.leaf_categories.iter().cloned())
            .with_item_location_countries(self.countries.iter().cloned())
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// JSON plan listing the jobs to run.
    #[arg(long, conflicts_with_all = ["category", "date", "snapshot_date"])]
    pub plan: Option<PathBuf>,

    #[arg(long, required_unless_present = "plan")]
    pub category: Option<String>,

    /// Adds an item job for this day, yyyyMMdd.
    #[arg(long)]
    pub date: Option<String>,

    /// Adds an item_snapshot job for this hour, yyyy-MM-ddTHH:00:00.000Z.
    #[arg(long)]
    pub snapshot_date: Option<String>,

    /// Scope of the item job.
    #[arg(long, default_value = "NEWLY_LISTED")]
    pub scope: FeedScope,

    #[arg(long, default_value = DEFAULT_MARKETPLACE)]
    pub marketplace: String,

    #[arg(long)]
    pub dir: Option<PathBuf>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Settings shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub token: Option<String>,
    pub environment: Environment,
    pub base_url: Option<String>,
    pub json: bool,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            token: cli.token.clone(),
            environment: cli.environment,
            base_url: cli.base_url.clone(),
            json: cli.json,
        }
    }

    fn token(&self) -> Result<&str, CliError> {
        self.token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(CliError::MissingToken)
    }

    fn stages(&self) -> HttpStages {
        let client = match &self.base_url {
            Some(url) => FeedClient::with_base_url(url.clone(), self.environment.chunk_size()),
            None => FeedClient::new(),
        };
        HttpStages::new(client)
    }

    fn emit<T: Serialize>(&self, value: &T, text: &str) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{}", text);
        }
        Ok(())
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Dispatch a parsed command line. `Ok(false)` means some stage failed.
pub async fn run(cli: Cli) -> Result<bool, CliError> {
    let ctx = Context::from_cli(&cli);
    match cli.command {
        Command::Fetch(args) => Ok(cmd_fetch(&ctx, &args).await?.is_success()),
        Command::Unzip { file } => Ok(cmd_unzip(&ctx, &file)?.is_success()),
        Command::Filter { file, filter } => Ok(cmd_filter(&ctx, &file, &filter)?.is_success()),
        Command::Run(args) => Ok(cmd_run(&ctx, &args).await?.all_succeeded()),
    }
}

/// Download one feed file.
pub async fn cmd_fetch(ctx: &Context, args: &FetchArgs) -> Result<OperationResponse, CliError> {
    let mut builder = FeedRequest::builder()
        .feed_type(args.feed_type)
        .category_id(args.category.clone())
        .marketplace_id(args.marketplace.clone())
        .token(ctx.token()?)
        .environment(ctx.environment);
    if let Some(date) = &args.date {
        builder = builder.date(date.clone());
    }
    if let Some(snapshot_date) = &args.snapshot_date {
        builder = builder.snapshot_date(snapshot_date.clone());
    }
    if let Some(scope) = args.scope {
        builder = builder.scope(scope);
    }
    let request = builder.build()?;

    let stages = ctx.stages();
    let result = stages.fetch(&request, args.dir.as_deref()).await;
    let response = OperationResponse::from_result(StageKind::Fetch, &result);
    if let Err(e) = &result {
        tracing::warn!("Exception in downloading feed: {}", e);
    }
    ctx.emit(&response, &format!("{}\n", response.to_text()))?;
    Ok(response)
}

/// Decompress a `.gz` feed file next to itself.
pub fn cmd_unzip(ctx: &Context, file: &std::path::Path) -> Result<OperationResponse, CliError> {
    let result = decompress_file(file);
    let response = OperationResponse::from_result(StageKind::Decompress, &result);
    if let Err(e) = &result {
        tracing::warn!("Exception in unzipping feed: {}", e);
    }
    ctx.emit(&response, &format!("{}\n", response.to_text()))?;
    Ok(response)
}

/// Filter a decompressed feed file into `<file>-filtered`.
pub fn cmd_filter(
    ctx: &Context,
    file: &std::path::Path,
    filter: &FilterArgs,
) -> Result<OperationResponse, CliError> {
    let criteria = filter.to_criteria();
    if criteria.is_empty() {
        return Err(FeedError::EmptyCriteria.into());
    }

    let result = filter_file(file, &criteria);
    if let Ok((_, stats)) = &result {
        tracing::info!(
            scanned = stats.scanned,
            retained = stats.retained,
            malformed = stats.malformed,
            "Filtered feed records"
        );
    }
    let result = result.map(|(path, _)| path);
    let response = OperationResponse::from_result(StageKind::Filter, &result);
    if let Err(e) = &result {
        tracing::warn!("Exception in filtering feed: {}", e);
    }
    ctx.emit(&response, &format!("{}\n", response.to_text()))?;
    Ok(response)
}

/// Run every job of a plan (or of the flags) concurrently and join them.
pub async fn cmd_run(ctx: &Context, args: &RunArgs) -> Result<RunSummary, CliError> {
    let token = ctx.token()?;
    let plan = match &args.plan {
        Some(path) => RunPlan::load(path)?,
        None => plan_from_args(args),
    };
    let jobs = plan.into_jobs(token, ctx.environment)?;

    let summary = run_jobs(Arc::new(ctx.stages()), jobs).await;
    ctx.emit(&summary, &summary.to_text())?;
    Ok(summary)
}

/// One `item` job for `--date`, one `item_snapshot` job for
/// `--snapshot-date`, both sharing the filter flags.
fn plan_from_args(args: &RunArgs) -> RunPlan {
    let category = args.category.clone().unwrap_or_default();
    let filter = args.filter.to_criteria();
    let mut jobs = Vec::new();

    if let Some(date) = &args.date {
        jobs.push(JobSpec {
            name: Some(FeedType::Item.to_string()),
            feed_type: FeedType::Item,
            category_id: category.clone(),
            date: Some(date.clone()),
            snapshot_date: None,
            scope: Some(args.scope),
            marketplace: None,
            directory: None,
            filter: filter.clone(),
        });
    }
    if let Some(snapshot_date) = &args.snapshot_date {
        jobs.push(JobSpec {
            name: Some(FeedType::ItemSnapshot.to_string()),
            feed_type: FeedType::ItemSnapshot,
            category_id: category,
            date: None,
            snapshot_date: Some(snapshot_date.clone()),
            scope: None,
            marketplace: None,
            directory: None,
            filter,
        });
    }

    RunPlan {
        marketplace: Some(args.marketplace.clone()),
        directory: args.dir.clone(),
        jobs,
    }
}
