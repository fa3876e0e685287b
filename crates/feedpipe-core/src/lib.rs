//! # Feedpipe Core
//!
//! The pure logic behind the `feedpipe` pipeline:
//!
//! - [`request`]: validated, immutable feed requests and their wire shape
//! - [`archive`]: gzip decompression over `Read`/`Write`
//! - [`filter`]: streaming record selection by identifier sets
//! - [`response`]: per-stage status records (`0` = success)
//!
//! No async and no network here. The client crate performs downloads and
//! the app layer owns the files.

pub mod archive;
pub mod error;
pub mod filter;
pub mod request;
pub mod response;

pub use archive::{decompress_file, decompress_stream, decompressed_path};
pub use error::FeedError;
pub use filter::{FilterCriteria, FilterStats, filter_file, filter_records, filtered_path};
pub use request::{Environment, FeedDate, FeedRequest, FeedRequestBuilder, FeedScope, FeedType};
pub use response::{OperationResponse, StageKind};

/// Status code reported by a successful stage.
pub const STATUS_OK: i32 = 0;

/// Status code reported by a failed stage.
pub const STATUS_FAILED: i32 = 1;
