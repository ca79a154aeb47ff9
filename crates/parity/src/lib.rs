//! # Parity - XOR Recovery Groups
//!
//! Single-file damage recovery for the ShoalKV storage engine.
//!
//! Bins are partitioned into fixed-size *parity groups*: bin `i` belongs to
//! the group of `P` consecutive bins starting at `⌊i/P⌋·P`. Each group owns
//! one parity file whose bytes are the bytewise XOR of every member shard
//! that currently exists:
//!
//! ```text
//! storageBin_0.dat ┐
//! storageBin_1.dat ┼─ XOR ─> storageParity_0_3.par
//! storageBin_2.dat ┤
//! storageBin_3.dat ┘
//! ```
//!
//! Because XOR is its own inverse, any single missing or corrupt member can
//! be rebuilt by XOR-ing the surviving members with the parity file. Members
//! may have different lengths: shorter files are treated as zero-padded to
//! the longest, so the parity file is always as long as the longest member.
//!
//! This crate only moves bytes. *When* to refresh parity (after every shard
//! write) and *when* to recover (on a failed read or write) is decided by the
//! engine, which also holds the per-group lock around both operations.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FILE_PREFIX: &str = "storageParity_";
const FILE_EXTENSION: &str = ".par";

/// Block size for the streaming XOR.
const BLOCK: usize = 4096;

/// Errors that can occur while building or applying parity.
#[derive(Debug, Error)]
pub enum ParityError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// First and last bin of the parity group containing `bin`.
pub fn group_bounds(bin: usize, group_size: usize) -> (usize, usize) {
    let start = bin / group_size * group_size;
    (start, start + group_size - 1)
}

/// Path of a group's parity file: `storageParity_<start>_<end>.par`.
pub fn parity_path(dir: &Path, start: usize, end: usize) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{start}_{end}{FILE_EXTENSION}"))
}

/// Rebuilds the parity file of the group containing `bin` from its existing
/// member shards.
///
/// Members that have never been written are skipped; an all-missing group
/// produces an empty parity file.
pub fn update_group(dir: &Path, bin: usize, group_size: usize) -> Result<(), ParityError> {
    let (start, end) = group_bounds(bin, group_size);
    let members: Vec<PathBuf> = (start..=end)
        .map(|i| shard::bin_path(dir, i))
        .filter(|p| p.exists())
        .collect();
    xor_files(&members, &parity_path(dir, start, end))
}

/// Reconstructs the shard file of `bin` by XOR-ing the *other* existing
/// members of its group with the group's parity file.
///
/// # Errors
///
/// Fails with [`ParityError::Io`] when the parity file does not exist — a
/// group that was never written cannot recover anything.
pub fn recover_member(dir: &Path, bin: usize, group_size: usize) -> Result<(), ParityError> {
    let (start, end) = group_bounds(bin, group_size);
    let mut inputs: Vec<PathBuf> = (start..=end)
        .filter(|&i| i != bin)
        .map(|i| shard::bin_path(dir, i))
        .filter(|p| p.exists())
        .collect();
    inputs.push(parity_path(dir, start, end));
    xor_files(&inputs, &shard::bin_path(dir, bin))
}

/// XORs `inputs` byte-by-byte into `target`.
///
/// The output length is the maximum input length; missing trailing bytes of
/// shorter inputs read as zero. Processing is block-wise: for each 4 KiB
/// position the output block is as long as the longest block any input
/// produced there. Input handles are dropped on every exit path.
pub fn xor_files(inputs: &[PathBuf], target: &Path) -> Result<(), ParityError> {
    let mut max_len = 0u64;
    for path in inputs {
        max_len = max_len.max(fs::metadata(path)?.len());
    }

    let mut readers = Vec::with_capacity(inputs.len());
    for path in inputs {
        readers.push(File::open(path)?);
    }

    if target.exists() {
        fs::remove_file(target)?;
    }
    let mut out = BufWriter::new(File::create(target)?);

    let mut acc = [0u8; BLOCK];
    let mut buf = [0u8; BLOCK];
    let mut pos = 0u64;
    while pos < max_len {
        acc.fill(0);
        let mut produced = 0usize;
        for reader in &mut readers {
            buf.fill(0);
            let n = read_block(reader, &mut buf)?;
            produced = produced.max(n);
            for i in 0..n {
                acc[i] ^= buf[i];
            }
        }
        out.write_all(&acc[..produced])?;
        pos += BLOCK as u64;
    }
    out.flush()?;
    Ok(())
}

/// Fills as much of `buf` as the reader can provide, tolerating short reads.
/// Returns the number of bytes actually read (0 at EOF).
fn read_block(reader: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
