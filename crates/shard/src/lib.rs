//! # Shard - Bin File Codec
//!
//! On-disk format of a single storage bin in the ShoalKV storage engine.
//!
//! A shard is a UTF-8 text file holding one record per line, preceded by a
//! checksum header that vouches for the data section:
//!
//! ```text
//! <decimal-crc32>
//! "KEYVAL~alpha":"1";
//! "KEYVAL~beta":"2";
//! "TRIGRM~abcdefgh":"abcdefghij,abcdefghik";
//! ```
//!
//! - Line 1 is the decimal CRC32 of all record lines, each followed by `\n`.
//!   The separator is pinned to `\n` on both the write and the verify path,
//!   so files are portable across platforms.
//! - Records are sorted ascending by on-disk key and formatted as
//!   `"<key>":"<value>";`. Keys and values must not contain the literal
//!   sequence `":"` or `;` — the codec does not escape.
//! - Blank lines and lines starting with `//` are ignored on read.
//!
//! The on-disk key carries a namespace prefix joined by `~`: [`KEYVAL`] for
//! value records (name = user key) and [`TRIGRM`] for posting-list records
//! (name = 8-gram). Both kinds share the same shard files; the namespace
//! keeps them from colliding and spreads them across different bins.
//!
//! ## Error policy
//!
//! A missing file reads as an empty shard — bins are created lazily and a
//! never-written bin is simply empty. A zero-line file, an unparsable
//! checksum header and a checksum mismatch are all errors: the caller (the
//! engine) decides whether to attempt parity recovery. Individual malformed
//! record lines are *not* errors; the checksum is the integrity gate, so a
//! line that fails to parse under a matching checksum is silently skipped.

use crc32fast::Hasher as Crc32;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Namespace of value records; the name part is the user key.
pub const KEYVAL: &str = "KEYVAL";
/// Namespace of posting-list records; the name part is an 8-gram.
pub const TRIGRM: &str = "TRIGRM";
/// Joins the namespace to the name in an on-disk key. Reserved: user keys
/// containing it would be mis-split.
pub const NAMESPACE_SEP: &str = "~";

/// Line separator used for both serialization and checksum verification.
pub const LINE_SEP: &str = "\n";

const FILE_PREFIX: &str = "storageBin_";
const FILE_EXTENSION: &str = ".dat";

/// Errors that can occur while reading or writing a shard file.
#[derive(Debug, Error)]
pub enum ShardError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file exists but has no lines at all (not even a checksum header).
    #[error("shard file is empty")]
    Empty,

    /// The first non-blank line did not parse as a decimal checksum. The
    /// header cannot vouch for the data, so this is treated like a mismatch.
    #[error("unparsable checksum header: {0:?}")]
    BadHeader(String),

    /// The stored checksum does not match the one computed over the data
    /// section.
    #[error("checksum mismatch: header {header}, computed {computed}")]
    ChecksumMismatch { header: u64, computed: u32 },
}

/// Path of bin `bin` inside the storage directory: `storageBin_<bin>.dat`.
pub fn bin_path(dir: &Path, bin: usize) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{bin}{FILE_EXTENSION}"))
}

/// On-disk key of the value record for a user key.
pub fn value_key(user_key: &str) -> String {
    format!("{KEYVAL}{NAMESPACE_SEP}{user_key}")
}

/// On-disk key of the posting-list record for an 8-gram.
pub fn gram_key(gram: &str) -> String {
    format!("{TRIGRM}{NAMESPACE_SEP}{gram}")
}

/// The user key of a value record, or `None` for any other namespace.
pub fn user_key(disk_key: &str) -> Option<&str> {
    disk_key.strip_prefix(KEYVAL)?.strip_prefix(NAMESPACE_SEP)
}

/// Whether an on-disk key names a value record.
pub fn is_value_key(disk_key: &str) -> bool {
    user_key(disk_key).is_some()
}

/// Whether an on-disk key names a posting-list record.
pub fn is_gram_key(disk_key: &str) -> bool {
    disk_key
        .strip_prefix(TRIGRM)
        .is_some_and(|rest| rest.starts_with(NAMESPACE_SEP))
}

/// Serializes one record line: `"<key>":"<value>";`.
pub fn format_line(key: &str, value: &str) -> String {
    format!("\"{key}\":\"{value}\";")
}

/// Parses one record line, returning `None` for lines that do not match the
/// `"<key>":"<value>";` shape.
///
/// Mirrors the lenient shape check of the write format: everything after the
/// first `;` is discarded, the remainder must split into exactly two halves
/// at `":"`, and stray `"` characters are stripped from both halves.
pub fn parse_line(line: &str) -> Option<(String, String)> {
    let relevant = line.split(';').next().unwrap_or("").trim();
    let mut halves = relevant.split("\":\"");
    let key = halves.next()?;
    let value = halves.next()?;
    if halves.next().is_some() {
        return None;
    }
    Some((
        key.trim().replace('"', ""),
        value.trim().replace('"', ""),
    ))
}

/// Reads a shard file into a map of on-disk key to payload.
///
/// A missing file yields an empty map. When `verify` is set, the CRC32 of
/// the data lines (each followed by [`LINE_SEP`]) is compared against the
/// header and a mismatch fails the read; when unset the header is only
/// required to be parsable.
///
/// # Errors
///
/// [`ShardError::Empty`] for a zero-line file, [`ShardError::BadHeader`] for
/// a garbled header, [`ShardError::ChecksumMismatch`] when verification
/// fails, [`ShardError::Io`] for anything the filesystem reports.
pub fn read(path: &Path, verify: bool) -> Result<HashMap<String, String>, ShardError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(ShardError::Io(e)),
    };

    // XOR-reconstructing a group member that never held data yields a file
    // of pure NUL bytes (the surviving members cancel against the parity).
    // Such a file is an empty shard, not a corrupt one.
    if !raw.is_empty() && raw.bytes().all(|b| b == 0) {
        return Ok(HashMap::new());
    }

    let mut lines = raw.lines();
    let header_line = loop {
        match lines.next() {
            Some(line) if !line.trim().is_empty() => break line,
            Some(_) => continue,
            None => return Err(ShardError::Empty),
        }
    };
    let header: u64 = header_line
        .trim()
        .parse()
        .map_err(|_| ShardError::BadHeader(header_line.to_string()))?;

    // Parity recovery zero-extends a reconstructed shard to the longest
    // group member, so a recovered file may end in a run of NUL bytes.
    // That tail must count as blank or the recovered file would never
    // re-verify against its own header.
    let data_lines: Vec<&str> = lines
        .filter(|line| {
            let trimmed = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            !trimmed.is_empty() && !trimmed.starts_with("//")
        })
        .collect();

    if verify {
        let mut crc = Crc32::new();
        for line in &data_lines {
            crc.update(line.as_bytes());
            crc.update(LINE_SEP.as_bytes());
        }
        let computed = crc.finalize();
        if header != u64::from(computed) {
            return Err(ShardError::ChecksumMismatch { header, computed });
        }
    }

    let mut records = HashMap::new();
    for line in data_lines {
        if let Some((key, value)) = parse_line(line) {
            records.insert(key, value);
        }
    }
    Ok(records)
}

/// Writes a shard file from a map of on-disk key to payload.
///
/// Records are sorted ascending by key, serialized into a single buffer, and
/// written below a freshly computed checksum header. The parent directory is
/// created if missing (bins materialize lazily on first write).
///
/// # Errors
///
/// Returns [`ShardError::Io`] on filesystem failure.
pub fn write(path: &Path, records: &HashMap<String, String>) -> Result<(), ShardError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let sorted: BTreeMap<&String, &String> = records.iter().collect();
    let mut data = String::new();
    for (key, value) in sorted {
        data.push_str(&format_line(key, value));
        data.push_str(LINE_SEP);
    }

    let mut crc = Crc32::new();
    crc.update(data.as_bytes());
    let checksum = crc.finalize();

    fs::write(path, format!("{checksum}{LINE_SEP}{data}"))?;
    Ok(())
}
