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

//! Lease store shared between processes through a directory.
//!
//! An exclusive claim is a `<key>.lock` file carrying a JSON lease record
//! (holder, hold count, expiry). Readers each own a file in `<key>.readers/`.
//! Every change to a key's files happens while holding an advisory lock on
//! `<key>.guard`, and each record is read again under that lock before it is
//! replaced or removed. Guard files are never deleted: a process that opened
//! an unlinked guard would lock a different inode than everyone else.

use crate::error::{LockError, Result};
use crate::locking::acquisition::AcquireRequest;
use crate::locking::kind::{HolderId, LockType};
use crate::store::LockStore;
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// File suffix of exclusive lease files.
pub(crate) const LOCK_SUFFIX: &str = ".lock";
/// Directory suffix holding one lease file per reader.
pub(crate) const READERS_SUFFIX: &str = ".readers";
/// File suffix of reader lease files.
pub(crate) const LEASE_SUFFIX: &str = ".lease";
/// File suffix of the per-key advisory lock serializing record changes.
pub(crate) const GUARD_SUFFIX: &str = ".guard";
/// Substring of temporary files used for atomic record replacement.
pub(crate) const TMP_SEGMENT: &str = ".tmp-";

const MAX_IMMEDIATE_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LeaseRecord {
    pub key: String,
    pub holder: HolderId,
    pub kind: LockType,
    pub count: u32,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn new(key: &str, holder: &HolderId, kind: LockType, lease: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            holder: holder.clone(),
            kind,
            count: 1,
            pid: std::process::id(),
            acquired_at: now,
            expires_at: deadline(now, lease),
        }
    }

    pub(crate) fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    fn is_same_lease(&self, other: &LeaseRecord) -> bool {
        self.holder == other.holder && self.acquired_at == other.acquired_at
    }
}

pub(crate) enum RecordState {
    Missing,
    Corrupt,
    Present(LeaseRecord),
}

enum Attempt {
    Granted,
    Busy,
    Retry,
}

/// Exclusive advisory lock on a key's guard file, released on drop.
pub(crate) struct KeyGuard {
    file: File,
}

impl KeyGuard {
    fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock()?;
        Ok(Self { file })
    }

    /// Guard for the key owning `path`, which may be a `.lock` file, a
    /// `.readers` directory or a reader `.lease` file.
    pub(crate) fn for_path(path: &Path) -> io::Result<Self> {
        let guard = guard_path_for(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not belong to a lock key", path.display()),
            )
        })?;
        Self::acquire(&guard)
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Lease store backed by lock files in a shared directory.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    root: PathBuf,
}

impl FileLockStore {
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            LockError::InvalidConfig(format!(
                "Failed to create lock directory {}: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}{LOCK_SUFFIX}", encode_component(key)))
    }

    fn guard(&self, key: &str) -> io::Result<KeyGuard> {
        KeyGuard::acquire(
            &self
                .root
                .join(format!("{}{GUARD_SUFFIX}", encode_component(key))),
        )
    }

    fn readers_dir(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}{READERS_SUFFIX}", encode_component(key)))
    }

    fn reader_path(&self, key: &str, holder: &HolderId) -> PathBuf {
        self.readers_dir(key)
            .join(format!("{}{LEASE_SUFFIX}", encode_component(holder.as_str())))
    }

    fn record_path(&self, key: &str, kind: LockType, holder: &HolderId) -> PathBuf {
        if kind.is_shared() {
            self.reader_path(key, holder)
        } else {
            self.lock_path(key)
        }
    }

    fn attempt(&self, request: &AcquireRequest<'_>) -> io::Result<Attempt> {
        let _guard = self.guard(request.store_key())?;
        let outcome = if request.kind().is_shared() {
            self.attempt_shared(request)
        } else {
            self.attempt_exclusive(request)
        };
        match outcome {
            // A concurrent sweep removed a directory underneath us.
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Attempt::Retry),
            other => other,
        }
    }

    fn attempt_exclusive(&self, request: &AcquireRequest<'_>) -> io::Result<Attempt> {
        let key = request.store_key();
        let holder = request.holder();
        let path = self.lock_path(key);

        if self.live_readers(key, holder)? > 0 {
            return Ok(Attempt::Busy);
        }

        let now = Utc::now();
        match read_record(&path)? {
            RecordState::Missing => {
                let record = LeaseRecord::new(key, holder, request.kind(), request.lease());
                if create_record(&path, &record)? {
                    Ok(Attempt::Granted)
                } else {
                    Ok(Attempt::Retry)
                }
            }
            RecordState::Present(mut current) if current.is_live(now) => {
                if &current.holder != holder {
                    return Ok(Attempt::Busy);
                }
                current.count = current.count.saturating_add(1);
                current.expires_at = current.expires_at.max(deadline(now, request.lease()));
                replace_record(&path, &current)?;
                Ok(Attempt::Granted)
            }
            RecordState::Present(expired) => {
                debug!(
                    "Taking over expired lease on {key} held by {} (pid {})",
                    expired.holder, expired.pid
                );
                let record = LeaseRecord::new(key, holder, request.kind(), request.lease());
                replace_record(&path, &record)?;
                Ok(Attempt::Granted)
            }
            RecordState::Corrupt => Ok(Attempt::Busy),
        }
    }

    fn attempt_shared(&self, request: &AcquireRequest<'_>) -> io::Result<Attempt> {
        let key = request.store_key();
        let holder = request.holder();
        let own_path = self.reader_path(key, holder);
        let now = Utc::now();

        match read_record(&own_path)? {
            RecordState::Present(mut current) if current.is_live(now) => {
                current.count = current.count.saturating_add(1);
                current.expires_at = current.expires_at.max(deadline(now, request.lease()));
                replace_record(&own_path, &current)?;
                return Ok(Attempt::Granted);
            }
            RecordState::Present(_) | RecordState::Corrupt => remove_if_exists(&own_path).map(|_| ())?,
            RecordState::Missing => {}
        }

        if self.writer_blocks(key, holder)? {
            return Ok(Attempt::Busy);
        }

        fs::create_dir_all(self.readers_dir(key))?;
        let record = LeaseRecord::new(key, holder, request.kind(), request.lease());
        if create_record(&own_path, &record)? {
            Ok(Attempt::Granted)
        } else {
            Ok(Attempt::Retry)
        }
    }

    /// Counts live reader leases other than `except`'s. Caller holds the guard.
    fn live_readers(&self, key: &str, except: &HolderId) -> io::Result<usize> {
        let dir = self.readers_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        let mut live = 0;
        for entry in entries {
            let path = entry?.path();
            if !has_suffix(&path, LEASE_SUFFIX) {
                continue;
            }
            match read_record(&path)? {
                RecordState::Present(record) if !record.is_live(now) => {
                    debug!("Dropping expired reader lease {}", path.display());
                    remove_if_exists(&path)?;
                }
                RecordState::Present(record) if &record.holder == except => {}
                RecordState::Present(_) | RecordState::Corrupt => live += 1,
                RecordState::Missing => {}
            }
        }
        Ok(live)
    }

    /// Whether an exclusive lease held by someone else is in the way of a
    /// reader. Caller holds the guard.
    fn writer_blocks(&self, key: &str, holder: &HolderId) -> io::Result<bool> {
        let path = self.lock_path(key);
        let now = Utc::now();
        match read_record(&path)? {
            RecordState::Present(current) if !current.is_live(now) => {
                remove_expired_locked(&path, &current, now)?;
                Ok(false)
            }
            RecordState::Present(current) => Ok(&current.holder != holder),
            RecordState::Corrupt => Ok(true),
            RecordState::Missing => Ok(false),
        }
    }

    fn prune_readers_dir(&self, key: &str) {
        // Fails harmlessly while other readers still hold leases.
        let _ = fs::remove_dir(self.readers_dir(key));
    }
}

impl LockStore for FileLockStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn supports(&self, kind: LockType) -> bool {
        !matches!(kind, LockType::Fair)
    }

    fn try_acquire(&self, request: &mut AcquireRequest<'_>) -> Result<bool> {
        if !self.supports(request.kind()) {
            return Err(LockError::UnsupportedLockType {
                store: self.name().to_string(),
                kind: request.kind(),
            });
        }

        let mut immediate_retries = 0;
        loop {
            if request.cancellation().is_cancelled() {
                return Err(request.interrupted());
            }

            let attempt = self
                .attempt(request)
                .map_err(|err| LockError::store(request.key().as_str(), err))?;
            match attempt {
                Attempt::Granted => {
                    debug!(
                        "Acquired {} file lease on {} for {} after {:.3}s",
                        request.kind(),
                        request.store_key(),
                        request.holder(),
                        request.elapsed().as_secs_f64()
                    );
                    request.notify_acquired();
                    return Ok(true);
                }
                Attempt::Retry if immediate_retries < MAX_IMMEDIATE_RETRIES => {
                    immediate_retries += 1;
                    continue;
                }
                Attempt::Retry | Attempt::Busy => {
                    immediate_retries = 0;
                    if request.is_non_blocking() || request.budget().is_expired() {
                        request.notify_timeout();
                        return Ok(false);
                    }

                    request.record_wait_start();
                    request.record_retry();
                    match request.next_sleep_interval() {
                        Some(delay) => {
                            if !request.cancellation().sleep(delay) {
                                return Err(request.interrupted());
                            }
                        }
                        None => {
                            request.notify_timeout();
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }

    fn release(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool> {
        let path = self.record_path(key, kind, holder);
        let _guard = self.guard(key).map_err(|err| LockError::store(key, err))?;
        let released = release_record(&path, holder).map_err(|err| LockError::store(key, err))?;
        if kind.is_shared() {
            self.prune_readers_dir(key);
        }
        Ok(released)
    }

    fn is_held_by(&self, key: &str, kind: LockType, holder: &HolderId) -> Result<bool> {
        let path = self.record_path(key, kind, holder);
        match read_record(&path).map_err(|err| LockError::store(key, err))? {
            RecordState::Present(current) => {
                Ok(&current.holder == holder && current.is_live(Utc::now()))
            }
            RecordState::Missing | RecordState::Corrupt => Ok(false),
        }
    }

    fn renew(
        &self,
        key: &str,
        kind: LockType,
        holder: &HolderId,
        lease: Duration,
    ) -> Result<bool> {
        let path = self.record_path(key, kind, holder);
        let _guard = self.guard(key).map_err(|err| LockError::store(key, err))?;
        let now = Utc::now();
        match read_record(&path).map_err(|err| LockError::store(key, err))? {
            RecordState::Present(mut current) if &current.holder == holder && current.is_live(now) => {
                current.expires_at = deadline(now, lease);
                replace_record(&path, &current).map_err(|err| LockError::store(key, err))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Drops one hold of `holder` on `path`. Caller holds the key guard.
fn release_record(path: &Path, holder: &HolderId) -> io::Result<bool> {
    match read_record(path)? {
        RecordState::Present(mut current) if &current.holder == holder => {
            if !current.is_live(Utc::now()) {
                // Ours but already lapsed; clean it up without claiming a release.
                remove_if_exists(path)?;
                return Ok(false);
            }
            if current.count > 1 {
                current.count -= 1;
                replace_record(path, &current)?;
            } else {
                remove_if_exists(path)?;
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub(crate) fn read_record(path: &Path) -> io::Result<RecordState> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RecordState::Missing),
        Err(err) => return Err(err),
    };
    match serde_json::from_slice::<LeaseRecord>(&contents) {
        Ok(record) => Ok(RecordState::Present(record)),
        Err(_) => Ok(RecordState::Corrupt),
    }
}

/// Creates `path` only if absent. Returns `false` when another claim exists.
fn create_record(path: &Path, record: &LeaseRecord) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied && path.exists() => {
            return Ok(false);
        }
        Err(err) => return Err(err),
    };

    if let Err(err) = write_payload(&mut file, record) {
        drop(file);
        let _ = remove_if_exists(path);
        return Err(err);
    }
    Ok(true)
}

fn replace_record(path: &Path, record: &LeaseRecord) -> io::Result<()> {
    let tmp = append_suffix(path, &format!("{TMP_SEGMENT}{}", Uuid::new_v4()));
    let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
    if let Err(err) = write_payload(&mut file, record) {
        drop(file);
        let _ = remove_if_exists(&tmp);
        return Err(err);
    }
    drop(file);
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = remove_if_exists(&tmp);
    })
}

fn write_payload(file: &mut File, record: &LeaseRecord) -> io::Result<()> {
    let payload = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    file.write_all(&payload)?;
    file.sync_all()
}

/// Removes the lease at `path` if it is still the expired lease `expired`.
/// Takes the key guard, so a claim made after `expired` was read survives.
pub(crate) fn reclaim_expired(
    path: &Path,
    expired: &LeaseRecord,
    now: DateTime<Utc>,
) -> io::Result<bool> {
    let _guard = KeyGuard::for_path(path)?;
    remove_expired_locked(path, expired, now)
}

fn remove_expired_locked(path: &Path, expired: &LeaseRecord, now: DateTime<Utc>) -> io::Result<bool> {
    match read_record(path)? {
        RecordState::Present(current) if current.is_same_lease(expired) && !current.is_live(now) =>
        {
            let removed = remove_if_exists(path)?;
            if removed {
                debug!(
                    "Reclaimed expired lease on {} held by {}",
                    expired.key, expired.holder
                );
            }
            Ok(removed)
        }
        _ => {
            trace!("Lease {} changed since it was judged expired", path.display());
            Ok(false)
        }
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub(crate) fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(suffix))
}

/// `<root>/<key>.guard` for a key's lock file, readers dir or reader lease.
fn guard_path_for(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    if let Some(stem) = name
        .strip_suffix(LOCK_SUFFIX)
        .or_else(|| name.strip_suffix(READERS_SUFFIX))
    {
        return Some(path.with_file_name(format!("{stem}{GUARD_SUFFIX}")));
    }
    if name.ends_with(LEASE_SUFFIX) {
        let dir = path.parent()?;
        if has_suffix(dir, READERS_SUFFIX) {
            return guard_path_for(dir);
        }
    }
    None
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(suffix);
    path.with_file_name(file_name)
}

fn deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Maps an arbitrary key onto a portable file name component.
fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::cancellation::CancellationToken;
    use crate::locking::kind::LockKey;
    use crate::locking::acquisition::PollingBackoff;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    fn request(
        key: &str,
        holder: &HolderId,
        kind: LockType,
        wait: Duration,
        lease: Duration,
    ) -> AcquireRequest<'static> {
        AcquireRequest::new(LockKey::from(key), holder.clone(), kind, wait, lease)
            .with_store_key(format!("locks:{key}"))
            .with_backoff(PollingBackoff::new(
                Duration::from_millis(5),
                2,
                Duration::from_millis(20),
            ))
    }

    fn grab(store: &FileLockStore, key: &str, holder: &HolderId, kind: LockType) -> bool {
        store
            .try_acquire(&mut request(
                key,
                holder,
                kind,
                Duration::ZERO,
                Duration::from_secs(30),
            ))
            .unwrap()
    }

    #[test]
    fn key_encoding_is_portable() {
        assert_eq!(encode_component("locks:order:u1"), "locks%3Aorder%3Au1");
        assert_eq!(encode_component("a/b.c"), "a%2Fb%2Ec");
    }

    #[test]
    fn exclusive_lease_file_lifecycle() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::open(temp.path()).unwrap();
        let holder = HolderId::new("a");

        assert!(grab(&store, "order:1", &holder, LockType::Reentrant));
        let path = store.lock_path("locks:order:1");
        assert!(path.exists());
        let record = match read_record(&path).unwrap() {
            RecordState::Present(record) => record,
            _ => panic!("expected a lease record"),
        };
        assert_eq!(record.holder, holder);
        assert_eq!(record.pid, std::process::id());

        assert!(
            store
                .release("locks:order:1", LockType::Reentrant, &holder)
                .unwrap()
        );
        assert!(!path.exists());
    }

    #[test]
    fn separate_instances_exclude_each_other() {
        let temp = TempDir::new().unwrap();
        let first = FileLockStore::open(temp.path()).unwrap();
        let second = FileLockStore::open(temp.path()).unwrap();
        let a = HolderId::new("a");
        let b = HolderId::new("b");

        assert!(grab(&first, "k", &a, LockType::Write));
        assert!(!grab(&second, "k", &b, LockType::Write));
        assert!(!second.release("locks:k", LockType::Write, &b).unwrap());
        assert!(first.is_held_by("locks:k", LockType::Write, &a).unwrap());

        first.release("locks:k", LockType::Write, &a).unwrap();
        assert!(grab(&second, "k", &b, LockType::Write));
    }

    #[test]
    fn reentrant_file_holds_are_counted() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::open(temp.path()).unwrap();
        let a = HolderId::new("a");

        assert!(grab(&store, "k", &a, LockType::Reentrant));
        assert!(grab(&store, "k", &a, LockType::Reentrant));
        assert!(store.release("locks:k", LockType::Reentrant, &a).unwrap());
        assert!(store.is_held_by("locks:k", LockType::Reentrant, &a).unwrap());
        assert!(store.release("locks:k", LockType::Reentrant, &a).unwrap());
        assert!(!store.lock_path("locks:k").exists());
    }

    #[test]
    fn readers_share_and_block_writer() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::open(temp.path()).unwrap();
        let r1 = HolderId::new("r1");
        let r2 = HolderId::new("r2");
        let w = HolderId::new("w");

        assert!(grab(&store, "cfg", &r1, LockType::Read));
        assert!(grab(&store, "cfg", &r2, LockType::Read));
        assert!(!grab(&store, "cfg", &w, LockType::Write));

        store.release("locks:cfg", LockType::Read, &r1).unwrap();
        store.release("locks:cfg", LockType::Read, &r2).unwrap();
        assert!(grab(&store, "cfg", &w, LockType::Write));
        assert!(!grab(&store, "cfg", &r1, LockType::Read));
        assert!(!store.readers_dir("locks:cfg").exists());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::open(temp.path()).unwrap();
        let a = HolderId::new("a");
        let b = HolderId::new("b");

        assert!(
            store
                .try_acquire(&mut request(
                    "k",
                    &a,
                    LockType::Write,
                    Duration::ZERO,
                    Duration::from_millis(20),
                ))
                .unwrap()
        );
        thread::sleep(Duration::from_millis(40));

        assert!(grab(&store, "k", &b, LockType::Write));
        assert!(!store.release("locks:k", LockType::Write, &a).unwrap());
        assert!(store.is_held_by("locks:k", LockType::Write, &b).unwrap());
        let leftovers = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(TMP_SEGMENT))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn late_reclaim_of_stale_record_keeps_new_holder() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileLockStore::open(temp.path()).unwrap());
        let a = HolderId::new("a");
        let b = HolderId::new("b");
        let path = store.lock_path("locks:k");

        assert!(
            store
                .try_acquire(&mut request(
                    "k",
                    &a,
                    LockType::Write,
                    Duration::ZERO,
                    Duration::from_millis(20),
                ))
                .unwrap()
        );
        let stale = match read_record(&path).unwrap() {
            RecordState::Present(record) => record,
            _ => panic!("expected a lease record"),
        };
        thread::sleep(Duration::from_millis(40));
        assert!(
            store
                .try_acquire(&mut request(
                    "k",
                    &b,
                    LockType::Write,
                    Duration::ZERO,
                    Duration::from_secs(60),
                ))
                .unwrap()
        );

        let reclaimer = {
            let path = path.clone();
            thread::spawn(move || {
                let mut removed = 0;
                for _ in 0..200 {
                    if reclaim_expired(&path, &stale, Utc::now()).unwrap() {
                        removed += 1;
                    }
                }
                removed
            })
        };
        let contender = {
            let store = Arc::new(FileLockStore::open(temp.path()).unwrap());
            thread::spawn(move || {
                let c = HolderId::new("c");
                (0..200)
                    .filter(|_| grab(&store, "k", &c, LockType::Write))
                    .count()
            })
        };

        assert_eq!(reclaimer.join().unwrap(), 0);
        assert_eq!(contender.join().unwrap(), 0);
        assert!(store.is_held_by("locks:k", LockType::Write, &b).unwrap());
    }

    #[test]
    fn lapsed_holder_cannot_release_or_renew_successor() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::open(temp.path()).unwrap();
        let a = HolderId::new("a");
        let b = HolderId::new("b");
        let mut first = request("k", &a, LockType::Reentrant, Duration::ZERO, Duration::from_millis(20));
        assert!(store.try_acquire(&mut first).unwrap());
        thread::sleep(Duration::from_millis(40));
        assert!(grab(&store, "k", &b, LockType::Reentrant));

        assert!(!store.renew("locks:k", LockType::Reentrant, &a, Duration::from_secs(60)).unwrap());
        assert!(!store.release("locks:k", LockType::Reentrant, &a).unwrap());
        match read_record(&store.lock_path("locks:k")).unwrap() {
            RecordState::Present(record) => assert_eq!(record.holder, b),
            _ => panic!("successor lease was disturbed"),
        }
    }

    #[test]
    fn guard_path_is_shared_by_key_artifacts() {
        let root = Path::new("/tmp/locks");
        let expected = Some(root.join("locks%3Ak.guard"));
        assert_eq!(guard_path_for(&root.join("locks%3Ak.lock")), expected);
        assert_eq!(guard_path_for(&root.join("locks%3Ak.readers")), expected);
        assert_eq!(
            guard_path_for(&root.join("locks%3Ak.readers").join("r1.lease")),
            expected
        );
        assert_eq!(guard_path_for(&root.join("stray.lease")), None);
    }

    #[test]
    fn renew_rewrites_expiry() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::open(temp.path()).unwrap();
        let a = HolderId::new("a");
        assert!(
            store
                .try_acquire(&mut request(
                    "k",
                    &a,
                    LockType::Reentrant,
                    Duration::ZERO,
                    Duration::from_millis(50),
                ))
                .unwrap()
        );
        assert!(
            store
                .renew("locks:k", LockType::Reentrant, &a, Duration::from_secs(10))
                .unwrap()
        );
        thread::sleep(Duration::from_millis(80));
        assert!(store.is_held_by("locks:k", LockType::Reentrant, &a).unwrap());
    }

    #[test]
    fn fair_locks_are_rejected() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::open(temp.path()).unwrap();
        let err = store
            .try_acquire(&mut request(
                "k",
                &HolderId::new("a"),
                LockType::Fair,
                Duration::ZERO,
                Duration::from_secs(1),
            ))
            .unwrap_err();
        assert!(matches!(err, LockError::UnsupportedLockType { .. }));
    }

    #[test]
    fn blocked_wait_times_out_and_can_be_cancelled() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileLockStore::open(temp.path()).unwrap());
        let a = HolderId::new("a");
        assert!(grab(&store, "k", &a, LockType::Write));

        let started = Instant::now();
        let granted = store
            .try_acquire(&mut request(
                "k",
                &HolderId::new("b"),
                LockType::Write,
                Duration::from_millis(100),
                Duration::from_secs(1),
            ))
            .unwrap();
        assert!(!granted);
        assert!(started.elapsed() >= Duration::from_millis(100));

        let token = CancellationToken::new();
        let waiter_token = token.clone();
        let waiter_store = store.clone();
        let waiter = thread::spawn(move || {
            let mut req = request(
                "k",
                &HolderId::new("c"),
                LockType::Write,
                Duration::from_secs(10),
                Duration::from_secs(1),
            )
            .with_cancellation(waiter_token);
            waiter_store.try_acquire(&mut req)
        });
        thread::sleep(Duration::from_millis(30));
        token.cancel();
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, LockError::Interrupted { .. }));
    }
}
