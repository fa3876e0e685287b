//! # Plan Module
//!
//! JSON run plans: a list of feed jobs with shared defaults.
//!
//! ```json
//! {
//!   "marketplace": "EBAY_US",
//!   "directory": "feeds",
//!   "jobs": [
//!     { "feed_type": "item", "category_id": "625", "date": "20210125",
//!       "scope": "NEWLY_LISTED", "filter": { "item_ids": ["132029430107"] } }
//!   ]
//! }
//! ```
//!
//! Credentials never live in a plan; the token and environment are supplied
//! when the plan is turned into jobs.
//!
//! Jobs run concurrently and write files named after their request, so a
//! plan may not contain two jobs for the same feed in the same directory.
//! Job names must be unique.

use crate::pipeline::FeedJob;
use feedpipe_core::{Environment, FeedError, FeedRequest, FeedScope, FeedType, FilterCriteria};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Marketplace used when neither the plan nor the job names one.
pub const DEFAULT_MARKETPLACE: &str = "EBAY_US";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Cannot read plan {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid plan: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Plan contains no jobs")]
    NoJobs,

    #[error("Job '{name}': {source}")]
    Job { name: String, source: FeedError },

    #[error("Job name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("Jobs '{first}' and '{second}' both write {}; give them different directories", .path.display())]
    SharedOutput {
        first: String,
        second: String,
        path: PathBuf,
    },
}

/// A set of jobs plus defaults applied to each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunPlan {
    #[serde(default)]
    pub marketplace: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    pub jobs: Vec<JobSpec>,
}

/// One job as written in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub feed_type: FeedType,
    pub category_id: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub snapshot_date: Option<String>,
    #[serde(default)]
    pub scope: Option<FeedScope>,
    #[serde(default)]
    pub marketplace: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub filter: FilterCriteria,
}

impl RunPlan {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate every job and bind it to the given credentials.
    ///
    /// Fails on the first invalid job; nothing runs unless the whole plan
    /// is valid.
    pub fn into_jobs(self, token: &str, environment: Environment) -> Result<Vec<FeedJob>, PlanError> {
        if self.jobs.is_empty() {
            return Err(PlanError::NoJobs);
        }

        let mut jobs = Vec::with_capacity(self.jobs.len());
        let mut names = HashSet::new();
        let mut outputs: HashMap<PathBuf, String> = HashMap::new();
        for (index, spec) in self.jobs.into_iter().enumerate() {
            let name = spec
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{}", spec.feed_type, index));
            if !names.insert(name.clone()) {
                return Err(PlanError::DuplicateName(name));
            }
            let fail = |source: FeedError| PlanError::Job {
                name: name.clone(),
                source,
            };

            if spec.filter.is_empty() {
                return Err(fail(FeedError::EmptyCriteria));
            }

            let marketplace = spec
                .marketplace
                .or_else(|| self.marketplace.clone())
                .unwrap_or_else(|| DEFAULT_MARKETPLACE.to_string());

            let mut builder = FeedRequest::builder()
                .feed_type(spec.feed_type)
                .category_id(spec.category_id)
                .marketplace_id(marketplace)
                .token(token)
                .environment(environment);
            if let Some(date) = spec.date {
                builder = builder.date(date);
            }
            if let Some(snapshot_date) = spec.snapshot_date {
                builder = builder.snapshot_date(snapshot_date);
            }
            if let Some(scope) = spec.scope {
                builder = builder.scope(scope);
            }
            let request = builder.build().map_err(fail)?;

            let target_dir = spec.directory.or_else(|| self.directory.clone());
            let archive = output_key(target_dir.as_deref(), &request.file_name());
            if let Some(first) = outputs.insert(archive.clone(), name.clone()) {
                return Err(PlanError::SharedOutput {
                    first,
                    second: name,
                    path: archive,
                });
            }

            jobs.push(FeedJob {
                name,
                request,
                criteria: spec.filter,
                target_dir,
            });
        }
        Ok(jobs)
    }
}

/// Download path of a job with `.` segments dropped, so `feeds` and
/// `./feeds` compare equal. `None` is the current directory.
fn output_key(target_dir: Option<&Path>, file_name: &str) -> PathBuf {
    let mut key: PathBuf = target_dir
        .map(|dir| {
            dir.components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect()
        })
        .unwrap_or_default();
    key.push(file_name);
    key
}

// =============================================================================
// TESTS
// =============================================================================
