//! # Request Module
//!
//! Immutable description of one feed download.
//!
//! A [`FeedRequest`] can only be obtained from [`FeedRequestBuilder::build`],
//! so every request that reaches the client has already been validated:
//! the category is numeric, the date matches the feed type, and the token
//! carries its `Bearer ` prefix.

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Prefix of an OAuth bearer token in the `Authorization` header.
pub const TOKEN_BEARER_PREFIX: &str = "Bearer ";

/// Range size used against the production service (100 MiB).
pub const PRODUCTION_CHUNK_SIZE: u64 = 104_857_600;

/// Range size used against the sandbox service (10 MiB).
pub const SANDBOX_CHUNK_SIZE: u64 = 10_485_760;

const PRODUCTION_BASE_URL: &str = "https://api.ebay.com/buy/feed/v1_beta";
const SANDBOX_BASE_URL: &str = "https://api.sandbox.ebay.com/buy/feed/v1_beta";

// =============================================================================
// FEED TYPE
// =============================================================================

/// Which feed the service should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedType {
    /// Daily feed of items, keyed by `yyyyMMdd` and a scope.
    Item,
    /// Hourly snapshot feed, keyed by an ISO-8601 hour.
    ItemSnapshot,
}

impl FeedType {
    /// Wire name, also the endpoint path segment.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::ItemSnapshot => "item_snapshot",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "ITEM" => Ok(Self::Item),
            "ITEM_SNAPSHOT" => Ok(Self::ItemSnapshot),
            _ => Err(FeedError::InvalidRequest(format!("unknown feed type '{}'", s))),
        }
    }
}

// =============================================================================
// FEED SCOPE
// =============================================================================

/// Scope of a daily `item` feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedScope {
    #[default]
    NewlyListed,
    AllActive,
}

impl FeedScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewlyListed => "NEWLY_LISTED",
            Self::AllActive => "ALL_ACTIVE",
        }
    }
}

impl fmt::Display for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedScope {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "NEWLY_LISTED" => Ok(Self::NewlyListed),
            "ALL_ACTIVE" => Ok(Self::AllActive),
            _ => Err(FeedError::InvalidRequest(format!("unknown feed scope '{}'", s))),
        }
    }
}

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Target deployment of the feed service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Sandbox,
}

impl Environment {
    /// Base URL of the feed API for this environment.
    #[must_use]
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Production => PRODUCTION_BASE_URL,
            Self::Sandbox => SANDBOX_BASE_URL,
        }
    }

    /// Size of each `Range` request.
    #[must_use]
    pub fn chunk_size(self) -> u64 {
        match self {
            Self::Production => PRODUCTION_CHUNK_SIZE,
            Self::Sandbox => SANDBOX_CHUNK_SIZE,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "PRODUCTION" | "PROD" => Ok(Self::Production),
            "SANDBOX" => Ok(Self::Sandbox),
            _ => Err(FeedError::InvalidRequest(format!("unknown environment '{}'", s))),
        }
    }
}

// =============================================================================
// FEED DATE
// =============================================================================

/// The date key of a feed file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedDate {
    /// `yyyyMMdd`, used by the daily feed.
    Day(String),
    /// `yyyy-MM-ddTHH:00:00.000Z`, used by the snapshot feed.
    Snapshot(String),
}

impl FeedDate {
    /// The date exactly as sent to the service.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Day(d) | Self::Snapshot(d) => d,
        }
    }

    /// Filesystem-safe form: `yyyyMMdd` or `yyyyMMddTHH`.
    #[must_use]
    pub fn compact(&self) -> String {
        match self {
            Self::Day(d) => d.clone(),
            Self::Snapshot(s) => {
                let digits: String = s.chars().filter(char::is_ascii_digit).take(10).collect();
                if digits.len() == 10 {
                    format!("{}T{}", &digits[..8], &digits[8..])
                } else {
                    digits
                }
            }
        }
    }
}

// =============================================================================
// FEED REQUEST
// =============================================================================

/// A validated request for one feed file.
#[derive(Clone, PartialEq, Eq)]
pub struct FeedRequest {
    feed_type: FeedType,
    category_id: String,
    date: FeedDate,
    scope: Option<FeedScope>,
    marketplace_id: String,
    token: String,
    environment: Environment,
}

impl FeedRequest {
    /// Start building a request.
    #[must_use]
    pub fn builder() -> FeedRequestBuilder {
        FeedRequestBuilder::default()
    }

    #[must_use]
    pub fn feed_type(&self) -> FeedType {
        self.feed_type
    }

    #[must_use]
    pub fn category_id(&self) -> &str {
        &self.category_id
    }

    #[must_use]
    pub fn date(&self) -> &FeedDate {
        &self.date
    }

    /// Present only for [`FeedType::Item`].
    #[must_use]
    pub fn scope(&self) -> Option<FeedScope> {
        self.scope
    }

    #[must_use]
    pub fn marketplace_id(&self) -> &str {
        &self.marketplace_id
    }

    /// Full `Authorization` header value, `Bearer ` prefix included.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Endpoint path segment relative to the environment's base URL.
    #[must_use]
    pub fn endpoint_path(&self) -> &'static str {
        self.feed_type.as_str()
    }

    /// Query parameters identifying the feed file.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match (&self.date, self.scope) {
            (FeedDate::Day(date), Some(scope)) => vec![
                ("feed_scope", scope.as_str().to_string()),
                ("category_id", self.category_id.clone()),
                ("date", date.clone()),
            ],
            (FeedDate::Day(date), None) => vec![
                ("category_id", self.category_id.clone()),
                ("date", date.clone()),
            ],
            (FeedDate::Snapshot(snapshot), _) => vec![
                ("category_id", self.category_id.clone()),
                ("snapshot_date", snapshot.clone()),
            ],
        }
    }

    /// Deterministic name of the downloaded archive.
    ///
    /// `item_newly_listed_625_EBAY_US_20210125.gz` or
    /// `item_snapshot_625_EBAY_US_20210129T02.gz`.
    #[must_use]
    pub fn file_name(&self) -> String {
        match self.scope {
            Some(scope) => format!(
                "{}_{}_{}_{}_{}.gz",
                self.feed_type,
                scope.as_str().to_ascii_lowercase(),
                self.category_id,
                self.marketplace_id,
                self.date.compact()
            ),
            None => format!(
                "{}_{}_{}_{}.gz",
                self.feed_type,
                self.category_id,
                self.marketplace_id,
                self.date.compact()
            ),
        }
    }
}

impl fmt::Debug for FeedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedRequest")
            .field("feed_type", &self.feed_type)
            .field("category_id", &self.category_id)
            .field("date", &self.date)
            .field("scope", &self.scope)
            .field("marketplace_id", &self.marketplace_id)
            .field("token", &"<redacted>")
            .field("environment", &self.environment)
            .finish()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Fluent builder for [`FeedRequest`].
#[derive(Debug, Clone, Default)]
pub struct FeedRequestBuilder {
    feed_type: Option<FeedType>,
    category_id: Option<String>,
    date: Option<String>,
    snapshot_date: Option<String>,
    scope: Option<FeedScope>,
    marketplace_id: Option<String>,
    token: Option<String>,
    environment: Option<Environment>,
}

impl FeedRequestBuilder {
    #[must_use]
    pub fn feed_type(mut self, feed_type: FeedType) -> Self {
        self.feed_type = Some(feed_type);
        self
    }

    #[must_use]
    pub fn category_id(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    /// `yyyyMMdd` day of a daily feed.
    #[must_use]
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// `yyyy-MM-ddTHH:00:00.000Z` hour of a snapshot feed.
    #[must_use]
    pub fn snapshot_date(mut self, snapshot_date: impl Into<String>) -> Self {
        self.snapshot_date = Some(snapshot_date.into());
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: FeedScope) -> Self {
        self.scope = Some(scope);
        self
    }

    #[must_use]
    pub fn marketplace_id(mut self, marketplace_id: impl Into<String>) -> Self {
        self.marketplace_id = Some(marketplace_id.into());
        self
    }

    /// OAuth token, with or without the `Bearer ` prefix.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Validate the collected fields and produce the request.
    pub fn build(self) -> Result<FeedRequest> {
        let feed_type = self
            .feed_type
            .ok_or_else(|| invalid("feed type is required"))?;

        let category_id = required(self.category_id, "category id")?;
        if !category_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(format!(
                "category id '{}' must be numeric",
                category_id
            )));
        }

        let marketplace_id = required(self.marketplace_id, "marketplace id")?;
        if !marketplace_id
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(invalid(format!(
                "marketplace id '{}' must look like EBAY_US",
                marketplace_id
            )));
        }

        let token = required(self.token, "token")?;
        let token = if token.starts_with(TOKEN_BEARER_PREFIX) {
            token
        } else if token == TOKEN_BEARER_PREFIX.trim_end() {
            return Err(invalid("token is required"));
        } else {
            format!("{}{}", TOKEN_BEARER_PREFIX, token)
        };

        let (date, scope) = match feed_type {
            FeedType::Item => {
                if self.snapshot_date.is_some() {
                    return Err(invalid("item feeds take a date, not a snapshot date"));
                }
                let date = required(self.date, "date")?;
                validate_day(&date)?;
                let scope = self
                    .scope
                    .ok_or_else(|| invalid("item feeds require a feed scope"))?;
                (FeedDate::Day(date), Some(scope))
            }
            FeedType::ItemSnapshot => {
                if self.date.is_some() || self.scope.is_some() {
                    return Err(invalid(
                        "snapshot feeds take only a snapshot date, no date or scope",
                    ));
                }
                let snapshot = required(self.snapshot_date, "snapshot date")?;
                validate_snapshot(&snapshot)?;
                (FeedDate::Snapshot(snapshot), None)
            }
        };

        Ok(FeedRequest {
            feed_type,
            category_id,
            date,
            scope,
            marketplace_id,
            token,
            environment: self.environment.unwrap_or_default(),
        })
    }
}

// =============================================================================
// VALIDATION HELPERS
// =============================================================================

fn invalid(message: impl Into<String>) -> FeedError {
    FeedError::InvalidRequest(message.into())
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_uppercase().replace('-', "_")
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(invalid(format!("{} is required", what))),
    }
}

fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn validate_month_day(month: Option<u32>, day: Option<u32>, raw: &str) -> Result<()> {
    match (month, day) {
        (Some(1..=12), Some(1..=31)) => Ok(()),
        _ => Err(invalid(format!("'{}' is not a calendar date", raw))),
    }
}

/// Accepts `yyyyMMdd`.
fn validate_day(date: &str) -> Result<()> {
    if date.len() != 8 || digits(date).is_none() {
        return Err(invalid(format!("date '{}' must be yyyyMMdd", date)));
    }
    validate_month_day(digits(&date[4..6]), digits(&date[6..8]), date)
}

/// Accepts `yyyy-MM-ddTHH:00:00.000Z`.
fn validate_snapshot(snapshot: &str) -> Result<()> {
    let shape_error = || {
        invalid(format!(
            "snapshot date '{}' must be yyyy-MM-ddTHH:00:00.000Z",
            snapshot
        ))
    };

    if !snapshot.is_ascii() || snapshot.len() != 24 {
        return Err(shape_error());
    }
    let bytes = snapshot.as_bytes();
    if bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'T' {
        return Err(shape_error());
    }
    if digits(&snapshot[0..4]).is_none() {
        return Err(shape_error());
    }
    if &snapshot[13..] != ":00:00.000Z" {
        return Err(invalid(format!(
            "snapshot date '{}' must fall on a whole hour",
            snapshot
        )));
    }
    match digits(&snapshot[11..13]) {
        Some(0..=23) => {}
        _ => return Err(shape_error()),
    }
    validate_month_day(digits(&snapshot[5..7]), digits(&snapshot[8..10]), snapshot)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    fn item_builder() -> FeedRequestBuilder {
        FeedRequest::builder()
            .feed_type(FeedType::Item)
            .category_id("625")
            .date("20210125")
            .scope(FeedScope::NewlyListed)
            .marketplace_id("EBAY_US")
            .token("v^1.1#abc")
    }

    fn snapshot_builder() -> FeedRequestBuilder {
        FeedRequest::builder()
            .feed_type(FeedType::ItemSnapshot)
            .category_id("625")
            .snapshot_date("2021-01-29T02:00:00.000Z")
            .marketplace_id("EBAY_US")
            .token("Bearer v^1.1#abc")
    }

    #[test]
    fn item_request_builds() {
        let request = item_builder().build().unwrap();
        assert_eq!(request.feed_type(), FeedType::Item);
        assert_eq!(request.scope(), Some(FeedScope::NewlyListed));
        assert_eq!(request.environment(), Environment::Sandbox);
        assert_eq!(request.endpoint_path(), "item");
    }

    #[test]
    fn token_gets_bearer_prefix_once() {
        let plain = item_builder().build().unwrap();
        assert_eq!(plain.token(), "Bearer v^1.1#abc");

        let prefixed = snapshot_builder().build().unwrap();
        assert_eq!(prefixed.token(), "Bearer v^1.1#abc");
    }

    #[test]
    fn bare_prefix_is_not_a_token() {
        let err = item_builder().token("Bearer ").build();
        assert!(matches!(err, Err(FeedError::InvalidRequest(_))));
    }

    #[test]
    fn item_query_pairs() {
        let request = item_builder().build().unwrap();
        assert_eq!(
            request.query_pairs(),
            vec![
                ("feed_scope", "NEWLY_LISTED".to_string()),
                ("category_id", "625".to_string()),
                ("date", "20210125".to_string()),
            ]
        );
    }

    #[test]
    fn snapshot_query_pairs() {
        let request = snapshot_builder().build().unwrap();
        assert_eq!(request.endpoint_path(), "item_snapshot");
        assert_eq!(
            request.query_pairs(),
            vec![
                ("category_id", "625".to_string()),
                ("snapshot_date", "2021-01-29T02:00:00.000Z".to_string()),
            ]
        );
    }

    #[test]
    fn file_names_are_deterministic() {
        assert_eq!(
            item_builder().build().unwrap().file_name(),
            "item_newly_listed_625_EBAY_US_20210125.gz"
        );
        assert_eq!(
            snapshot_builder().build().unwrap().file_name(),
            "item_snapshot_625_EBAY_US_20210129T02.gz"
        );
    }

    #[test]
    fn item_requires_scope_and_date() {
        let no_scope = FeedRequest::builder()
            .feed_type(FeedType::Item)
            .category_id("625")
            .date("20210125")
            .marketplace_id("EBAY_US")
            .token("t")
            .build();
        assert!(no_scope.is_err());

        let no_date = FeedRequest::builder()
            .feed_type(FeedType::Item)
            .category_id("625")
            .scope(FeedScope::AllActive)
            .marketplace_id("EBAY_US")
            .token("t")
            .build();
        assert!(no_date.is_err());
    }

    #[test]
    fn item_rejects_snapshot_date() {
        let result = item_builder()
            .snapshot_date("2021-01-29T02:00:00.000Z")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_rejects_date_and_scope() {
        assert!(snapshot_builder().date("20210125").build().is_err());
        assert!(snapshot_builder().scope(FeedScope::AllActive).build().is_err());
    }

    #[test]
    fn invalid_dates_rejected() {
        for date in ["2021012", "2021-01-25", "20211325", "20210100", "abcdefgh"] {
            assert!(item_builder().date(date).build().is_err(), "{}", date);
        }
    }

    #[test]
    fn invalid_snapshots_rejected() {
        for snapshot in [
            "2021-01-29T02:30:00.000Z",
            "2021-01-29T24:00:00.000Z",
            "2021-13-29T02:00:00.000Z",
            "2021-01-29 02:00:00.000Z",
            "20210129T02",
        ] {
            assert!(
                snapshot_builder().snapshot_date(snapshot).build().is_err(),
                "{}",
                snapshot
            );
        }
    }

    #[test]
    fn category_and_marketplace_validated() {
        assert!(item_builder().category_id("6x5").build().is_err());
        assert!(item_builder().category_id("  ").build().is_err());
        assert!(item_builder().marketplace_id("ebay-us").build().is_err());
    }

    #[test]
    fn missing_feed_type_rejected() {
        let result = FeedRequest::builder()
            .category_id("625")
            .date("20210125")
            .marketplace_id("EBAY_US")
            .token("t")
            .build();
        assert!(matches!(result, Err(FeedError::InvalidRequest(_))));
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("ITEM_SNAPSHOT".parse::<FeedType>().unwrap(), FeedType::ItemSnapshot);
        assert_eq!("item".parse::<FeedType>().unwrap(), FeedType::Item);
        assert_eq!("newly-listed".parse::<FeedScope>().unwrap(), FeedScope::NewlyListed);
        assert_eq!("Production".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn environment_settings() {
        assert_eq!(Environment::Production.chunk_size(), PRODUCTION_CHUNK_SIZE);
        assert_eq!(Environment::Sandbox.chunk_size(), SANDBOX_CHUNK_SIZE);
        assert!(Environment::Sandbox.base_url().contains("sandbox"));
    }

    #[test]
    fn debug_hides_token() {
        let request = item_builder().build().unwrap();
        let debug = format!("{:?}", request);
        assert!(!debug.contains("abc"));
        assert!(debug.contains("<redacted>"));
    }
}
