//! # Pipeline Module
//!
//! Runs feed jobs: fetch → decompress → filter.
//!
//! Each job stops at its first failing stage; later stages are never
//! invoked. Jobs are independent tokio tasks sharing only the stage
//! implementation, and [`run_jobs`] joins every one of them before it
//! returns.

use feedpipe_client::FeedClient;
use feedpipe_core::{
    FeedError, FeedRequest, FeedType, FilterCriteria, OperationResponse, StageKind,
    decompress_file, filter_file,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::Instrument;

// =============================================================================
// STAGES
// =============================================================================

/// Failure of a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] feedpipe_client::Error),

    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The blocking worker running the stage died.
    #[error("Stage worker failed: {0}")]
    Worker(String),
}

/// The three operations a feed job is made of.
///
/// Each returns the path of the file it produced.
pub trait FeedStages: Send + Sync {
    fn fetch(
        &self,
        request: &FeedRequest,
        target_dir: Option<&Path>,
    ) -> impl Future<Output = Result<PathBuf, StageError>> + Send;

    fn decompress(&self, archive: &Path) -> impl Future<Output = Result<PathBuf, StageError>> + Send;

    fn filter(
        &self,
        input: &Path,
        criteria: &FilterCriteria,
    ) -> impl Future<Output = Result<PathBuf, StageError>> + Send;
}

/// Stages backed by the feed service and the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct HttpStages {
    client: FeedClient,
}

impl HttpStages {
    pub fn new(client: FeedClient) -> Self {
        Self { client }
    }
}

impl FeedStages for HttpStages {
    async fn fetch(
        &self,
        request: &FeedRequest,
        target_dir: Option<&Path>,
    ) -> Result<PathBuf, StageError> {
        let feed = self.client.fetch(request, target_dir).await?;
        Ok(feed.path)
    }

    async fn decompress(&self, archive: &Path) -> Result<PathBuf, StageError> {
        let archive = archive.to_path_buf();
        let output = tokio::task::spawn_blocking(move || decompress_file(&archive))
            .await
            .map_err(|e| StageError::Worker(e.to_string()))??;
        Ok(output)
    }

    async fn filter(&self, input: &Path, criteria: &FilterCriteria) -> Result<PathBuf, StageError> {
        let input = input.to_path_buf();
        let criteria = criteria.clone();
        let (output, stats) = tokio::task::spawn_blocking(move || filter_file(&input, &criteria))
            .await
            .map_err(|e| StageError::Worker(e.to_string()))??;
        tracing::info!(
            scanned = stats.scanned,
            retained = stats.retained,
            malformed = stats.malformed,
            "Filtered feed records"
        );
        Ok(output)
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// One fetch → decompress → filter run.
#[derive(Debug, Clone)]
pub struct FeedJob {
    pub name: String,
    pub request: FeedRequest,
    pub criteria: FilterCriteria,
    /// Download directory; `None` means the current directory.
    pub target_dir: Option<PathBuf>,
}

/// Outcome of one job: a response per executed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub name: String,
    pub feed_type: FeedType,
    /// Stages after the first failure are absent.
    pub stages: Vec<OperationResponse>,
    /// Set when the job's task died before reporting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl JobReport {
    fn new(name: impl Into<String>, feed_type: FeedType) -> Self {
        Self {
            name: name.into(),
            feed_type,
            stages: Vec::new(),
            aborted: None,
        }
    }

    /// Every stage ran and returned status 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.aborted.is_none()
            && self.stages.len() == StageKind::ALL.len()
            && self.stages.iter().all(OperationResponse::is_success)
    }

    /// The stage that stopped the job, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageKind> {
        self.stages
            .iter()
            .find(|s| !s.is_success())
            .map(|s| s.stage)
    }

    /// The filtered feed, when the job completed.
    #[must_use]
    pub fn output(&self) -> Option<&Path> {
        if !self.succeeded() {
            return None;
        }
        self.stages.last().and_then(|s| s.file_path.as_deref())
    }

    /// Record a stage result; `Err` carries the failed stage so callers
    /// can stop with `?`.
    fn record(
        &mut self,
        stage: StageKind,
        result: Result<PathBuf, StageError>,
    ) -> Result<PathBuf, StageKind> {
        self.stages.push(OperationResponse::from_result(stage, &result));
        match result {
            Ok(path) => {
                tracing::info!(stage = %stage, "Stage finished: {}", path.display());
                Ok(path)
            }
            Err(e) => {
                tracing::warn!(stage = %stage, "Stage failed, cannot proceed: {}", e);
                Err(stage)
            }
        }
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = format!("[{}] {}\n", self.name, self.feed_type);
        for stage in &self.stages {
            output.push_str(&format!("  {}\n", stage.to_text()));
        }
        if let Some(reason) = &self.aborted {
            output.push_str(&format!("  aborted: {}\n", reason));
        }
        output
    }
}

/// A report that stays readable if its job panics mid-stage.
type SharedReport = Mutex<JobReport>;

fn lock(report: &SharedReport) -> MutexGuard<'_, JobReport> {
    report.lock().unwrap_or_else(PoisonError::into_inner)
}

// Results are awaited before locking; the guard never lives across a stage.
async fn drive<S: FeedStages>(
    stages: &S,
    job: &FeedJob,
    report: &SharedReport,
) -> Result<PathBuf, StageKind> {
    let fetched = stages.fetch(&job.request, job.target_dir.as_deref()).await;
    let archive = lock(report).record(StageKind::Fetch, fetched)?;
    let decompressed = stages.decompress(&archive).await;
    let plain = lock(report).record(StageKind::Decompress, decompressed)?;
    let filtered = stages.filter(&plain, &job.criteria).await;
    lock(report).record(StageKind::Filter, filtered)
}

async fn run_recorded<S: FeedStages>(stages: &S, job: &FeedJob, report: &SharedReport) {
    let span = tracing::info_span!("feed_job", job = %job.name);
    async {
        tracing::info!("Starting {} feed job", job.request.feed_type());
        match drive(stages, job, report).await {
            Ok(output) => tracing::info!("Feed job finished: {}", output.display()),
            Err(stage) => tracing::warn!("Feed job stopped at {}", stage),
        }
    }
    .instrument(span)
    .await;
}

/// Run one job to completion or to its first failing stage.
pub async fn run_job<S: FeedStages>(stages: &S, job: &FeedJob) -> JobReport {
    let report = Mutex::new(JobReport::new(&job.name, job.request.feed_type()));
    run_recorded(stages, job, &report).await;
    report.into_inner().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// FAN-OUT
// =============================================================================

/// Reports of a multi-job run, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub reports: Vec<JobReport>,
}

impl RunSummary {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.reports.iter().all(JobReport::succeeded)
    }

    /// Names of jobs that did not complete.
    #[must_use]
    pub fn failed_jobs(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.name.as_str())
            .collect()
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        for report in &self.reports {
            output.push_str(&report.to_text());
        }
        let failed = self.failed_jobs();
        output.push_str(&format!(
            "{} job(s), {} succeeded, {} failed\n",
            self.reports.len(),
            self.reports.len() - failed.len(),
            failed.len()
        ));
        output
    }
}

/// Run all jobs concurrently and wait for every one of them.
///
/// A job whose task panics is reported as aborted, keeping the stages it
/// finished; the others are unaffected.
pub async fn run_jobs<S: FeedStages + 'static>(stages: Arc<S>, jobs: Vec<FeedJob>) -> RunSummary {
    let shared: Vec<Arc<SharedReport>> = jobs
        .iter()
        .map(|job| Arc::new(Mutex::new(JobReport::new(&job.name, job.request.feed_type()))))
        .collect();
    let mut finished = vec![false; jobs.len()];
    let mut slots = HashMap::new();
    let mut set = JoinSet::new();

    for (index, job) in jobs.into_iter().enumerate() {
        let stages = Arc::clone(&stages);
        let report = Arc::clone(&shared[index]);
        let handle = set.spawn(async move { run_recorded(stages.as_ref(), &job, &report).await });
        slots.insert(handle.id(), index);
    }

    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((id, ())) => {
                if let Some(&index) = slots.get(&id) {
                    finished[index] = true;
                }
            }
            Err(e) => {
                tracing::error!("Feed job task failed: {}", e);
                if let Some(&index) = slots.get(&e.id()) {
                    let mut report = lock(&shared[index]);
                    let running = StageKind::ALL.get(report.stages.len()).copied();
                    report.aborted = Some(match running {
                        Some(stage) => format!("{} stage: {}", stage, e),
                        None => e.to_string(),
                    });
                    finished[index] = true;
                }
            }
        }
    }

    let reports = shared
        .iter()
        .zip(finished)
        .map(|(report, done)| {
            let mut report = lock(report).clone();
            if !done {
                report.aborted = Some(String::from("job never reported"));
            }
            report
        })
        .collect();

    RunSummary { reports }
}
