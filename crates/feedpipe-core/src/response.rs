//! # Response Module
//!
//! Per-stage status records.
//!
//! Every stage of a feed job reports an [`OperationResponse`]: status code
//! `0` with the produced file on success, non-zero with a message on
//! failure. A failed response ends the job.

use crate::{STATUS_FAILED, STATUS_OK};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The pipeline stage a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Fetch,
    Decompress,
    Filter,
}

impl StageKind {
    /// Stages in execution order.
    pub const ALL: [Self; 3] = [Self::Fetch, Self::Decompress, Self::Filter];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Decompress => "decompress",
            Self::Filter => "filter",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub stage: StageKind,
    /// `0` on success, non-zero on failure.
    pub status_code: i32,
    pub message: String,
    /// File produced by the stage, if it succeeded.
    pub file_path: Option<PathBuf>,
}

impl OperationResponse {
    #[must_use]
    pub fn success(stage: StageKind, file_path: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            status_code: STATUS_OK,
            message: String::from("ok"),
            file_path: Some(file_path.into()),
        }
    }

    #[must_use]
    pub fn failure(stage: StageKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            status_code: STATUS_FAILED,
            message: message.into(),
            file_path: None,
        }
    }

    /// Build from a stage result, keeping the error's display text.
    #[must_use]
    pub fn from_result<E: fmt::Display>(stage: StageKind, result: &Result<PathBuf, E>) -> Self {
        match result {
            Ok(path) => Self::success(stage, path.clone()),
            Err(e) => Self::failure(stage, e.to_string()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    /// One-line human readable summary.
    #[must_use]
    pub fn to_text(&self) -> String {
        match (&self.file_path, self.is_success()) {
            (Some(path), true) => format!("{:<10} status=0 file={}", self.stage, path.display()),
            _ => format!(
                "{:<10} status={} error={}",
                self.stage, self.status_code, self.message
            ),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::FeedError;

    #[test]
    fn success_has_zero_status_and_path() {
        let response = OperationResponse::success(StageKind::Fetch, "feed.gz");
        assert!(response.is_success());
        assert_eq!(response.status_code, 0);
        assert_eq!(response.file_path, Some(PathBuf::from("feed.gz")));
    }

    #[test]
    fn failure_has_nonzero_status_and_no_path() {
        let response = OperationResponse::failure(StageKind::Filter, "boom");
        assert!(!response.is_success());
        assert_ne!(response.status_code, 0);
        assert!(response.file_path.is_none());
    }

    #[test]
    fn from_result_keeps_error_text() {
        let result: Result<PathBuf, FeedError> = Err(FeedError::EmptyCriteria);
        let response = OperationResponse::from_result(StageKind::Filter, &result);
        assert_eq!(response.message, "Filter criteria are empty");
    }

    #[test]
    fn to_text_mentions_stage_and_outcome() {
        let ok = OperationResponse::success(StageKind::Decompress, "feed");
        assert!(ok.to_text().contains("decompress"));
        assert!(ok.to_text().contains("status=0"));

        let failed = OperationResponse::failure(StageKind::Fetch, "403 Forbidden");
        assert!(failed.to_text().contains("403 Forbidden"));
    }
}
