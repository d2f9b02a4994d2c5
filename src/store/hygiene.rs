// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Sweeps of artifacts left in a file store directory by crashed holders.
//!
//! Expired leases are reclaimed, and temp files and unreadable lease files are
//! deleted once older than the age threshold. Leases, unreadable records and
//! reader directories are only touched under the owning key's guard; guard
//! files themselves are left alone.

use crate::error::Result;
use crate::store::file::{
    FileLockStore, KeyGuard, LEASE_SUFFIX, LOCK_SUFFIX, READERS_SUFFIX, RecordState,
    TMP_SEGMENT, has_suffix, read_record, reclaim_expired, remove_if_exists,
};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::cmp;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Summary of a hygiene sweep.
#[derive(Debug, Default, Clone)]
pub struct StoreHygieneReport {
    pub removed_leases: usize,
    pub removed_corrupt: usize,
    pub removed_leftovers: usize,
    pub removed_dirs: usize,
    pub errors: usize,
    pub duration: Duration,
}

impl StoreHygieneReport {
    pub fn total_removed(&self) -> usize {
        self.removed_leases + self.removed_corrupt + self.removed_leftovers + self.removed_dirs
    }
}

#[derive(Debug, Clone)]
pub struct StoreHygieneRunner {
    root: PathBuf,
    age_threshold: Duration,
}

impl StoreHygieneRunner {
    pub fn new(root: PathBuf, age_threshold: Duration) -> Self {
        Self {
            root,
            age_threshold,
        }
    }

    pub fn for_store(store: &FileLockStore, age_threshold: Duration) -> Self {
        Self::new(store.root().to_path_buf(), age_threshold)
    }

    /// Age after which unreadable files are considered abandoned, derived
    /// from the longest lease the registry hands out.
    pub fn default_threshold(expire_after: Duration) -> Duration {
        let minimum = Duration::from_secs(60);
        expire_after
            .checked_mul(2)
            .map(|candidate| cmp::max(candidate, minimum))
            .unwrap_or(minimum)
    }

    pub fn run(&self) -> Result<StoreHygieneReport> {
        self.run_with_now(SystemTime::now())
    }

    pub(crate) fn run_with_now(&self, now: SystemTime) -> Result<StoreHygieneReport> {
        let start = Instant::now();
        let mut report = StoreHygieneReport::default();

        if !self.root.exists() {
            report.duration = start.elapsed();
            return Ok(report);
        }

        let mut reader_dirs = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("Failed to read lock directory {}: {err}", dir.display());
                    report.errors += 1;
                    continue;
                }
            };

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!("Failed to read entry in {}: {err}", dir.display());
                        report.errors += 1;
                        continue;
                    }
                };
                let path = entry.path();
                let file_type = match entry.file_type() {
                    Ok(file_type) => file_type,
                    Err(err) => {
                        warn!(
                            "Failed to determine file type for {}: {err}",
                            path.display()
                        );
                        report.errors += 1;
                        continue;
                    }
                };

                if file_type.is_dir() {
                    if has_suffix(&path, READERS_SUFFIX) {
                        reader_dirs.push(path.clone());
                    }
                    stack.push(path);
                    continue;
                }

                if !file_type.is_file() {
                    continue;
                }

                if is_leftover(&path) {
                    self.process_leftover(&path, now, &mut report);
                } else if has_suffix(&path, LOCK_SUFFIX) || has_suffix(&path, LEASE_SUFFIX) {
                    self.process_lease(&path, now, &mut report);
                }
            }
        }

        for dir in reader_dirs {
            let _guard = match KeyGuard::for_path(&dir) {
                Ok(guard) => guard,
                Err(err) => {
                    warn!("Failed to lock key of {}: {err}", dir.display());
                    report.errors += 1;
                    continue;
                }
            };
            // Only empty directories go; populated ones report ENOTEMPTY.
            if fs::remove_dir(&dir).is_ok() {
                report.removed_dirs += 1;
            }
        }

        report.duration = start.elapsed();
        debug!(
            "Lock store sweep removed {} lease(s), {} corrupt file(s), {} leftover(s), {} dir(s) in {:.3}s (errors: {})",
            report.removed_leases,
            report.removed_corrupt,
            report.removed_leftovers,
            report.removed_dirs,
            report.duration.as_secs_f64(),
            report.errors
        );
        Ok(report)
    }

    fn process_lease(&self, path: &Path, now: SystemTime, report: &mut StoreHygieneReport) {
        let state = match read_record(path) {
            Ok(state) => state,
            Err(err) => {
                warn!("Failed to read lease file {}: {err}", path.display());
                report.errors += 1;
                return;
            }
        };

        match state {
            RecordState::Present(record) if !record.is_live(DateTime::<Utc>::from(now)) => {
                match reclaim_expired(path, &record, DateTime::<Utc>::from(now)) {
                    Ok(true) => {
                        debug!("Removed expired lease on {} held by {}", record.key, record.holder);
                        report.removed_leases += 1;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!("Failed to remove expired lease {}: {err}", path.display());
                        report.errors += 1;
                    }
                }
            }
            RecordState::Corrupt if self.is_stale(path, now, report) => {
                match remove_corrupt(path) {
                    Ok(true) => report.removed_corrupt += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!("Failed to remove unreadable lease {}: {err}", path.display());
                        report.errors += 1;
                    }
                }
            }
            _ => {}
        }
    }

    fn process_leftover(&self, path: &Path, now: SystemTime, report: &mut StoreHygieneReport) {
        if !self.is_stale(path, now, report) {
            return;
        }

        match remove_if_exists(path) {
            Ok(true) => report.removed_leftovers += 1,
            Ok(false) => {}
            Err(err) => {
                warn!("Failed to remove leftover file {}: {err}", path.display());
                report.errors += 1;
            }
        }
    }

    fn is_stale(&self, path: &Path, now: SystemTime, report: &mut StoreHygieneReport) -> bool {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Failed to read metadata for {}: {err}", path.display());
                report.errors += 1;
                return false;
            }
        };

        match metadata.modified() {
            Ok(modified) => match now.duration_since(modified) {
                Ok(age) => age >= self.age_threshold,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

fn is_leftover(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(TMP_SEGMENT))
}

/// Removes an unreadable lease if it is still unreadable under the key guard.
fn remove_corrupt(path: &Path) -> std::io::Result<bool> {
    let _guard = KeyGuard::for_path(path)?;
    match read_record(path)? {
        RecordState::Corrupt => remove_if_exists(path),
        RecordState::Present(_) | RecordState::Missing => Ok(false),
    }
}
