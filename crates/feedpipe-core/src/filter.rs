//! # Filter Module
//!
//! Streaming selection of feed records by identifier sets.
//!
//! Feed files are tab-separated with a header line. Columns are located by
//! header name, so the filter does not depend on column order. A record is
//! kept when it matches every non-empty criterion; within one criterion any
//! listed value matches.
//!
//! Output preserves the input byte-for-byte: the header first, then the
//! retained lines in their original order. Records are not required to be
//! UTF-8.

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

// =============================================================================
// COLUMN NAMES
// =============================================================================

pub const ITEM_ID_COLUMN: &str = "ItemId";
pub const SELLER_USERNAME_COLUMN: &str = "SellerUsername";
pub const CATEGORY_ID_COLUMN: &str = "CategoryId";
pub const ITEM_LOCATION_COUNTRY_COLUMN: &str = "ItemLocationCountry";

const FIELD_SEPARATOR: u8 = b'\t';
const BYTE_ORDER_MARK: char = '\u{feff}';

// =============================================================================
// CRITERIA
// =============================================================================

/// Identifier sets to filter on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub item_ids: BTreeSet<String>,
    /// Compared case-insensitively.
    pub seller_usernames: BTreeSet<String>,
    pub leaf_category_ids: BTreeSet<String>,
    /// ISO country codes, compared case-insensitively.
    pub item_location_countries: BTreeSet<String>,
}

impl FilterCriteria {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_item_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.item_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_seller_usernames<I, S>(mut self, sellers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seller_usernames.extend(sellers.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_leaf_category_ids<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leaf_category_ids.extend(categories.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_item_location_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.item_location_countries
            .extend(countries.into_iter().map(Into::into));
        self
    }

    /// True when no identifiers are set at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
            && self.seller_usernames.is_empty()
            && self.leaf_category_ids.is_empty()
            && self.item_location_countries.is_empty()
    }

    fn checks(&self) -> [(&'static str, &BTreeSet<String>, bool); 4] {
        [
            (ITEM_ID_COLUMN, &self.item_ids, false),
            (SELLER_USERNAME_COLUMN, &self.seller_usernames, true),
            (CATEGORY_ID_COLUMN, &self.leaf_category_ids, false),
            (ITEM_LOCATION_COUNTRY_COLUMN, &self.item_location_countries, true),
        ]
    }
}

/// Counters reported by a filter run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    /// Non-blank records read after the header.
    pub scanned: u64,
    pub retained: u64,
    /// Records too short to contain a filtered column.
    pub malformed: u64,
}

// =============================================================================
// MATCHER
// =============================================================================

struct ColumnCheck {
    column: usize,
    values: BTreeSet<Vec<u8>>,
    fold_case: bool,
}

/// Criteria resolved against a concrete header.
struct Matcher {
    checks: Vec<ColumnCheck>,
    min_cells: usize,
}

impl Matcher {
    fn compile(header: &[u8], criteria: &FilterCriteria) -> Result<Self> {
        let header = String::from_utf8_lossy(header);
        let columns: Vec<&str> = header
            .trim_end_matches(['\r', '\n'])
            .split(char::from(FIELD_SEPARATOR))
            .map(|name| name.trim().trim_start_matches(BYTE_ORDER_MARK))
            .collect();

        let mut checks = Vec::new();
        for (name, values, fold_case) in criteria.checks() {
            if values.is_empty() {
                continue;
            }
            let column = columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .ok_or_else(|| FeedError::MissingColumn(name.to_string()))?;
            let values = values
                .iter()
                .map(|v| {
                    let v = v.trim().as_bytes();
                    if fold_case { v.to_ascii_lowercase() } else { v.to_vec() }
                })
                .collect();
            checks.push(ColumnCheck {
                column,
                values,
                fold_case,
            });
        }

        let min_cells = checks.iter().map(|c| c.column + 1).max().unwrap_or(0);
        Ok(Self { checks, min_cells })
    }

    /// `None` when the record is too short to evaluate.
    fn matches(&self, cells: &[&[u8]]) -> Option<bool> {
        if cells.len() < self.min_cells {
            return None;
        }
        Some(self.checks.iter().all(|check| {
            let cell = cells[check.column];
            if check.fold_case {
                check.values.contains(&cell.to_ascii_lowercase())
            } else {
                check.values.contains(cell)
            }
        }))
    }
}

fn split_record(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    let end = line
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    line[..end]
        .split(|b| *b == FIELD_SEPARATOR)
        .map(<[u8]>::trim_ascii)
}

// =============================================================================
// FILTERING
// =============================================================================

/// Copy the header and every matching record from `reader` to `writer`.
///
/// Lines are handled as raw bytes; cells outside the filtered columns may
/// hold any encoding.
pub fn filter_records<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    criteria: &FilterCriteria,
) -> Result<FilterStats> {
    if criteria.is_empty() {
        return Err(FeedError::EmptyCriteria);
    }

    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 || line.trim_ascii().is_empty() {
        return Err(FeedError::EmptyFeed);
    }
    let matcher = Matcher::compile(&line, criteria)?;
    writer.write_all(&line)?;

    let mut stats = FilterStats::default();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.trim_ascii().is_empty() {
            continue;
        }
        stats.scanned += 1;

        let cells: Vec<&[u8]> = split_record(&line).collect();
        match matcher.matches(&cells) {
            Some(true) => {
                writer.write_all(&line)?;
                stats.retained += 1;
            }
            Some(false) => {}
            None => stats.malformed += 1,
        }
    }

    writer.flush()?;
    Ok(stats)
}

/// Output path for a filtered feed: `<path>-filtered`.
#[must_use]
pub fn filtered_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push("-filtered");
    path.with_file_name(name)
}

/// Filter `path` into [`filtered_path`]`(path)`, replacing any existing
/// file. A partially written output is removed on failure.
pub fn filter_file(path: &Path, criteria: &FilterCriteria) -> Result<(PathBuf, FilterStats)> {
    if criteria.is_empty() {
        return Err(FeedError::EmptyCriteria);
    }
    let output = filtered_path(path);
    let reader = BufReader::new(File::open(path)?);
    let writer = BufWriter::new(File::create(&output)?);

    match filter_records(reader, writer, criteria) {
        Ok(stats) => Ok((output, stats)),
        Err(e) => {
            let _ = std::fs::remove_file(&output);
            Err(e)
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
    use proptest::prelude::*;

    const FEED: &str = "ItemId\tTitle\tCategoryId\tSellerUsername\tItemLocationCountry\n\
                        132029430107\tLamp\t625\tAcme\tUS\n\
                        111\tChair\t625\tbob\tDE\n\
                        132676918161\tDesk\t777\tacme\tUS\n\
                        14270967132\tRug\t625\tcarol\tGB\n";

    fn run(input: &str, criteria: &FilterCriteria) -> Result<(String, FilterStats)> {
        let mut out = Vec::new();
        let stats = filter_records(input.as_bytes(), &mut out, criteria)?;
        Ok((String::from_utf8(out).unwrap(), stats))
    }

    #[test]
    fn filters_by_item_ids() {
        let criteria =
            FilterCriteria::new().with_item_ids(["132029430107", "132676918161", "14270967132"]);
        let (out, stats) = run(FEED, &criteria).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ItemId"));
        assert!(lines[1].starts_with("132029430107"));
        assert!(lines[2].starts_with("132676918161"));
        assert!(lines[3].starts_with("14270967132"));
        assert_eq!(
            stats,
            FilterStats {
                scanned: 4,
                retained: 3,
                malformed: 0
            }
        );
    }

    #[test]
    fn criteria_combine_with_and() {
        let criteria = FilterCriteria::new()
            .with_leaf_category_ids(["625"])
            .with_item_location_countries(["us", "gb"]);
        let (out, stats) = run(FEED, &criteria).unwrap();
        assert_eq!(stats.retained, 2);
        assert!(out.contains("Lamp"));
        assert!(out.contains("Rug"));
        assert!(!out.contains("Desk"));
    }

    #[test]
    fn seller_match_ignores_case() {
        let criteria = FilterCriteria::new().with_seller_usernames(["ACME"]);
        let (_, stats) = run(FEED, &criteria).unwrap();
        assert_eq!(stats.retained, 2);
    }

    #[test]
    fn item_ids_match_exactly() {
        let criteria = FilterCriteria::new().with_item_ids(["13202943010"]);
        let (out, stats) = run(FEED, &criteria).unwrap();
        assert_eq!(stats.retained, 0);
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn header_lookup_is_order_and_case_independent() {
        let input = "title\titemid\nLamp\t42\nChair\t43\n";
        let criteria = FilterCriteria::new().with_item_ids(["43"]);
        let (out, _) = run(input, &criteria).unwrap();
        assert_eq!(out, "title\titemid\nChair\t43\n");
    }

    #[test]
    fn byte_order_mark_on_header_is_ignored() {
        let input = "\u{feff}ItemId\tTitle\n42\tLamp\n";
        let criteria = FilterCriteria::new().with_item_ids(["42"]);
        let (_, stats) = run(input, &criteria).unwrap();
        assert_eq!(stats.retained, 1);
    }

    #[test]
    fn crlf_lines_are_preserved() {
        let input = "ItemId\tTitle\r\n42\tLamp\r\n43\tChair\r\n";
        let criteria = FilterCriteria::new().with_item_ids(["42"]);
        let (out, _) = run(input, &criteria).unwrap();
        assert_eq!(out, "ItemId\tTitle\r\n42\tLamp\r\n");
    }

    #[test]
    fn non_utf8_cells_pass_through_untouched() {
        let input: &[u8] = b"ItemId\tTitle\n42\tCaf\xe9\n43\tLamp\n44\tNa\xefve\n";
        let criteria = FilterCriteria::new().with_item_ids(["43", "44"]);
        let mut out = Vec::new();

        let stats = filter_records(input, &mut out, &criteria).unwrap();

        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.retained, 2);
        assert_eq!(out, b"ItemId\tTitle\n43\tLamp\n44\tNa\xefve\n");
    }

    #[test]
    fn non_utf8_seller_compares_bytewise() {
        let input: &[u8] = b"SellerUsername\tItemId\nm\xfcller\t1\nacme\t2\n";
        let criteria = FilterCriteria::new().with_seller_usernames(["ACME"]);
        let mut out = Vec::new();

        let stats = filter_records(input, &mut out, &criteria).unwrap();

        assert_eq!(stats.retained, 1);
        assert_eq!(out, b"SellerUsername\tItemId\nacme\t2\n");
    }

    #[test]
    fn short_and_blank_rows() {
        let input = "Title\tItemId\nLamp\t42\n\nbroken\n";
        let criteria = FilterCriteria::new().with_item_ids(["42"]);
        let (_, stats) = run(input, &criteria).unwrap();
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.retained, 1);
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn empty_criteria_rejected() {
        let result = run(FEED, &FilterCriteria::new());
        assert!(matches!(result, Err(FeedError::EmptyCriteria)));
    }

    #[test]
    fn empty_feed_rejected() {
        let criteria = FilterCriteria::new().with_item_ids(["1"]);
        assert!(matches!(run("", &criteria), Err(FeedError::EmptyFeed)));
    }

    #[test]
    fn missing_column_rejected() {
        let criteria = FilterCriteria::new().with_seller_usernames(["acme"]);
        let result = run("ItemId\tTitle\n1\tLamp\n", &criteria);
        match result {
            Err(FeedError::MissingColumn(name)) => assert_eq!(name, SELLER_USERNAME_COLUMN),
            other => panic!("expected MissingColumn, got {:?}", other.map(|(_, s)| s)),
        }
    }

    #[test]
    fn filtered_path_appends_suffix() {
        assert_eq!(
            filtered_path(Path::new("feeds/item_625")),
            PathBuf::from("feeds/item_625-filtered")
        );
    }

    #[test]
    fn filter_file_roundtrip_on_disk() {
        let temp = tempfile::tempdir().unwrap();
        let input = temp.path().join("item_625");
        std::fs::write(&input, FEED).unwrap();

        let criteria = FilterCriteria::new().with_item_ids(["111"]);
        let (output, stats) = filter_file(&input, &criteria).unwrap();
        assert_eq!(output, temp.path().join("item_625-filtered"));
        assert_eq!(stats.retained, 1);
        assert!(std::fs::read_to_string(&output).unwrap().contains("Chair"));
    }

    #[test]
    fn filter_file_removes_output_on_failure() {
        let temp = tempfile::tempdir().unwrap();
        let input = temp.path().join("item_625");
        std::fs::write(&input, "Title\nLamp\n").unwrap();

        let criteria = FilterCriteria::new().with_item_ids(["1"]);
        assert!(filter_file(&input, &criteria).is_err());
        assert!(!filtered_path(&input).exists());
    }

    #[test]
    fn criteria_deserialize_with_missing_fields() {
        let criteria: FilterCriteria =
            serde_json::from_str(r#"{"item_ids": ["132029430107", "14270967132"]}"#).unwrap();
        assert_eq!(criteria.item_ids.len(), 2);
        assert!(criteria.seller_usernames.is_empty());
        assert!(!criteria.is_empty());
    }

    proptest! {
        #[test]
        fn output_is_ordered_subset_of_input(
            ids in proptest::collection::vec(0u8..20, 0..60),
            wanted in proptest::collection::btree_set(0u8..20, 1..6),
        ) {
            let mut input = String::from("ItemId\tTitle\n");
            for (row, id) in ids.iter().enumerate() {
                input.push_str(&format!("{}\trow{}\n", id, row));
            }
            let criteria = FilterCriteria::new()
                .with_item_ids(wanted.iter().map(|w| w.to_string()));

            let (out, stats) = run(&input, &criteria).unwrap();
            let out_lines: Vec<&str> = out.lines().collect();
            prop_assert_eq!(out_lines[0], "ItemId\tTitle");

            let expected: Vec<String> = ids
                .iter()
                .enumerate()
                .filter(|(_, id)| wanted.contains(*id))
                .map(|(row, id)| format!("{}\trow{}", id, row))
                .collect();
            prop_assert_eq!(&out_lines[1..], expected.as_slice());
            prop_assert_eq!(stats.retained, expected.len() as u64);
            prop_assert_eq!(stats.scanned, ids.len() as u64);
        }
    }
}
