//! Bin-level I/O: shard reads and writes wrapped with checksum verification,
//! parity refresh, and bounded XOR-recovery retries.
//!
//! This is the only module that touches shard files directly. With parity
//! disabled it degrades to the bare codec: no verification, no parity files,
//! no retries — any codec error surfaces immediately.

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::{lock_guard, MAX_RECOVERY_COUNT};

/// Shared bin I/O state. Also handed (behind an `Arc`) to the cache
/// refresher as its shard loader, so refreshed snapshots go through the same
/// verification and recovery as foreground reads.
pub(crate) struct BinIo {
    dir: PathBuf,
    parity_enabled: bool,
    parity_group_size: usize,
    /// One lock per parity group, keyed by the group's `(start, end)` bins.
    /// Acquired after the bin lock, never before.
    parity_locks: DashMap<(usize, usize), Arc<Mutex<()>>>,
}

impl BinIo {
    pub fn new(dir: PathBuf, parity_enabled: bool, parity_group_size: usize) -> Self {
        Self {
            dir,
            parity_enabled,
            parity_group_size,
            parity_locks: DashMap::new(),
        }
    }

    pub fn parity_enabled(&self) -> bool {
        self.parity_enabled
    }

    /// Reads one bin, verifying its checksum when parity is enabled.
    ///
    /// A bin whose parity group was never written reads as empty. A bin that
    /// is missing *while its group parity exists* counts as damaged — like a
    /// truncated or checksum-mismatched file it triggers a recovery and
    /// re-read cycle, up to [`MAX_RECOVERY_COUNT`] attempts.
    ///
    /// # Errors
    ///
    /// Surfaces the codec error once recovery is exhausted (or immediately
    /// when parity is disabled), and any error of the recovery itself.
    pub fn read_bin(&self, bin: usize) -> Result<HashMap<String, String>> {
        let path = shard::bin_path(&self.dir, bin);
        let mut attempts = 0;
        loop {
            if self.parity_enabled && !path.exists() {
                let (start, end) = parity::group_bounds(bin, self.parity_group_size);
                if !parity::parity_path(&self.dir, start, end).exists() {
                    // Neither the shard nor its group parity was ever
                    // written: an empty bin, nothing to recover.
                    return Ok(HashMap::new());
                }
                self.handle_failure(bin, &mut attempts, "read", &"shard file missing")?;
                continue;
            }
            match shard::read(&path, self.parity_enabled) {
                Ok(records) => return Ok(records),
                Err(e) => {
                    self.handle_failure(bin, &mut attempts, "read", &e)?;
                }
            }
        }
    }

    /// Writes one bin and refreshes its parity group.
    ///
    /// A failed write triggers the same recovery and retry cycle as a failed
    /// read.
    pub fn write_bin(&self, bin: usize, records: &HashMap<String, String>) -> Result<()> {
        let path = shard::bin_path(&self.dir, bin);
        let mut attempts = 0;
        loop {
            let result = shard::write(&path, records)
                .map_err(anyhow::Error::from)
                .and_then(|()| {
                    if self.parity_enabled {
                        self.refresh_parity(bin)?;
                    }
                    Ok(())
                });
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.handle_failure(bin, &mut attempts, "write", &e)?;
                }
            }
        }
    }

    /// Common retry bookkeeping: recover and count the attempt, or give up.
    fn handle_failure<E: std::fmt::Display>(
        &self,
        bin: usize,
        attempts: &mut usize,
        op: &str,
        error: &E,
    ) -> Result<()> {
        if !self.parity_enabled {
            return Err(anyhow!("shard {op} failed for bin {bin}: {error}"));
        }
        if *attempts >= MAX_RECOVERY_COUNT {
            return Err(anyhow!(
                "bin {bin} still failing after {MAX_RECOVERY_COUNT} recovery attempts: {error}"
            ));
        }
        *attempts += 1;
        warn!(
            bin,
            attempt = *attempts,
            error = %error,
            "shard {op} failed, attempting parity recovery"
        );
        self.recover(bin)
            .with_context(|| format!("recovering bin {bin}"))?;
        debug!(bin, "parity recovery complete");
        Ok(())
    }

    /// Rebuilds the parity file of the group containing `bin`.
    fn refresh_parity(&self, bin: usize) -> Result<()> {
        let lock = self.group_lock(bin);
        let _guard = lock_guard(&lock);
        parity::update_group(&self.dir, bin, self.parity_group_size)
            .with_context(|| format!("updating parity for bin {bin}"))
    }

    /// Reconstructs the shard file of `bin` from its parity group.
    fn recover(&self, bin: usize) -> Result<()> {
        let lock = self.group_lock(bin);
        let _guard = lock_guard(&lock);
        parity::recover_member(&self.dir, bin, self.parity_group_size)?;
        Ok(())
    }

    fn group_lock(&self, bin: usize) -> Arc<Mutex<()>> {
        let bounds = parity::group_bounds(bin, self.parity_group_size);
        self.parity_locks
            .entry(bounds)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
