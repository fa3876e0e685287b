//! # Archive Module
//!
//! Gzip decompression of downloaded feed files.
//!
//! The stream variant works on any `Read`/`Write` pair; [`decompress_file`]
//! is the file-to-file convenience used by the pipeline, writing the plain
//! feed next to the archive.

use crate::error::{FeedError, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

/// First two bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompress a gzip stream into `writer`.
///
/// All members of a multi-member archive are decoded. Returns the number
/// of decompressed bytes written.
pub fn decompress_stream<R: Read, W: Write>(mut reader: R, mut writer: W) -> Result<u64> {
    let mut magic = [0u8; 2];
    match reader.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FeedError::NotGzip(String::from("input shorter than a gzip header")));
        }
        Err(e) => return Err(e.into()),
    }
    if magic != GZIP_MAGIC {
        return Err(FeedError::NotGzip(String::from("missing gzip magic bytes")));
    }

    let mut decoder = MultiGzDecoder::new(Cursor::new(magic).chain(reader));
    let written = io::copy(&mut decoder, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

/// Path of the plain feed for a `.gz` archive: the same path minus `.gz`.
pub fn decompressed_path(path: &Path) -> Result<PathBuf> {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("gz") => Ok(path.with_extension("")),
        _ => Err(FeedError::NotGzip(format!(
            "{} has no .gz extension",
            path.display()
        ))),
    }
}

/// Decompress `path` into [`decompressed_path`]`(path)`, replacing any
/// existing file. A partially written output is removed on failure.
pub fn decompress_file(path: &Path) -> Result<PathBuf> {
    let output = decompressed_path(path)?;
    let input = BufReader::new(File::open(path)?);
    let writer = BufWriter::new(File::create(&output)?);

    match decompress_stream(input, writer) {
        Ok(_) => Ok(output),
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
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decompresses_single_member() {
        let compressed = gzip(b"ItemId\tTitle\n1\tLamp\n");
        let mut out = Vec::new();
        let written = decompress_stream(compressed.as_slice(), &mut out).unwrap();
        assert_eq!(out, b"ItemId\tTitle\n1\tLamp\n");
        assert_eq!(written, out.len() as u64);
    }

    #[test]
    fn decompresses_every_member() {
        let mut compressed = gzip(b"first\n");
        compressed.extend(gzip(b"second\n"));
        let mut out = Vec::new();
        decompress_stream(compressed.as_slice(), &mut out).unwrap();
        assert_eq!(out, b"first\nsecond\n");
    }

    #[test]
    fn rejects_plain_text() {
        let mut out = Vec::new();
        let result = decompress_stream(&b"ItemId\tTitle\n"[..], &mut out);
        assert!(matches!(result, Err(FeedError::NotGzip(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_empty_input() {
        let result = decompress_stream(&b""[..], Vec::new());
        assert!(matches!(result, Err(FeedError::NotGzip(_))));
    }

    #[test]
    fn truncated_archive_is_io_error() {
        let data: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
        let compressed = gzip(&data);
        let truncated = &compressed[..compressed.len() - 12];
        let result = decompress_stream(truncated, Vec::new());
        assert!(matches!(result, Err(FeedError::Io(_))));
    }

    #[test]
    fn decompressed_path_strips_gz() {
        assert_eq!(
            decompressed_path(Path::new("feeds/item_625.gz")).unwrap(),
            PathBuf::from("feeds/item_625")
        );
        assert_eq!(
            decompressed_path(Path::new("a.tsv.GZ")).unwrap(),
            PathBuf::from("a.tsv")
        );
        assert!(decompressed_path(Path::new("feeds/item_625.tsv")).is_err());
        assert!(decompressed_path(Path::new("feeds/item_625")).is_err());
    }

    #[test]
    fn decompress_file_writes_next_to_archive() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("item_625.gz");
        std::fs::write(&archive, gzip(b"ItemId\n42\n")).unwrap();

        let output = decompress_file(&archive).unwrap();
        assert_eq!(output, temp.path().join("item_625"));
        assert_eq!(std::fs::read(&output).unwrap(), b"ItemId\n42\n");
    }

    #[test]
    fn decompress_file_cleans_up_on_failure() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("broken.gz");
        std::fs::write(&archive, b"not gzip at all").unwrap();

        assert!(decompress_file(&archive).is_err());
        assert!(!temp.path().join("broken").exists());
    }
}
