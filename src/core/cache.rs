// Copyright (c) 2026 Duskboard
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! The per-thread content store: one `Cache` per `datfile`, persisted
//! under `<cache_dir>/<dathash>/`, plus a `CacheRegistry` that owns the
//! set of caches known locally.

use md5::{Digest, Md5};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::record::{Record, RecordError, SpamCheck};

const SEVEN_DAYS_SECS: i64 = 7 * 24 * 3600;

/// Cache-level failures. All are recovered locally by the caller; none
/// of them are fatal to the process.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// A record could not be parsed or hashed.
    #[error("record: {0}")]
    Record(#[from] RecordError),
}

/// `md5_hex(datfile)`, the on-disk directory name for a thread.
pub fn dathash(datfile: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(datfile.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current Unix time in seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Per-thread-type retention and sync knobs (the `save_record`,
/// `save_size`, `get_range`, `sync_range`, `save_removed` tables in the
/// configuration).
#[derive(Clone, Copy, Debug)]
pub struct CacheLimits {
    /// Maximum number of records ever retained (informational; enforcement
    /// happens through `save_size`).
    pub save_record: u64,
    /// Maximum number of live records kept in `record/`.
    pub save_size: u64,
    /// Oldest-fetch window in seconds, used when a cache is empty.
    pub get_range: i64,
    /// Overlap window in seconds for incremental range sync.
    pub sync_range: i64,
    /// Tombstone retention window in seconds.
    pub save_removed: i64,
}

impl CacheLimits {
    /// Apply the one documented auto-correction: a tombstone must outlive
    /// any range-sync window that could otherwise resurrect it, so
    /// `save_removed` is raised to `sync_range + 1` when it would
    /// otherwise not exceed `sync_range`.
    pub fn normalized(mut self) -> Self {
        if self.save_removed != 0 && self.save_removed <= self.sync_range {
            self.save_removed = self.sync_range + 1;
        }
        self
    }
}

/// Derived, recomputable-from-disk counters for one cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheInfo {
    /// Sum of live record file sizes, in bytes.
    pub size: u64,
    /// Number of live records.
    pub count: u64,
    /// Number of records with `stamp > now - 7 days`.
    pub velocity: u64,
    /// Max stamp seen, including tombstones.
    pub stamp: i64,
    /// Max stamp among live records.
    pub valid_stamp: i64,
}

struct CacheState {
    info: CacheInfo,
}

/// A thread's content store.
pub struct Cache {
    datfile: String,
    dir: PathBuf,
    state: RwLock<CacheState>,
    limits: CacheLimits,
    record_limit_bytes: usize,
    spam_check: Arc<dyn SpamCheck>,
}

struct RecordEntry {
    stamp: i64,
    id: String,
    path: PathBuf,
    len: u64,
}

impl Cache {
    /// Open (creating if absent) the cache for `datfile`.
    pub async fn open(
        cache_dir: &Path,
        datfile: String,
        limits: CacheLimits,
        record_limit_bytes: usize,
        spam_check: Arc<dyn SpamCheck>,
    ) -> Result<Self, CacheError> {
        let dir = cache_dir.join(dathash(&datfile));
        let cache = Self {
            datfile,
            dir,
            state: RwLock::new(CacheState { info: CacheInfo::default() }),
            limits: limits.normalized(),
            record_limit_bytes,
            spam_check,
        };
        cache.setup_directories()?;
        let info = cache.read_info()?;
        cache.state.write().await.info = info;
        Ok(cache)
    }

    /// The thread identifier this cache stores.
    pub fn datfile(&self) -> &str {
        &self.datfile
    }

    fn record_dir(&self) -> PathBuf {
        self.dir.join("record")
    }

    fn removed_dir(&self) -> PathBuf {
        self.dir.join("removed")
    }

    fn attach_dir(&self) -> PathBuf {
        self.dir.join("attach")
    }

    fn tag_path(&self) -> PathBuf {
        self.dir.join("tag.txt")
    }

    fn stat_path(&self) -> PathBuf {
        self.dir.join("dat.stat")
    }

    fn setup_directories(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::create_dir_all(self.record_dir())?;
        fs::create_dir_all(self.removed_dir())?;
        fs::create_dir_all(self.attach_dir())?;
        let stat_path = self.stat_path();
        if !stat_path.exists() {
            fs::write(&stat_path, &self.datfile)?;
        }
        Ok(())
    }

    fn parse_idstr(name: &str) -> Option<(i64, String)> {
        let (stamp_str, id) = name.split_once('_')?;
        let stamp: i64 = stamp_str.parse().ok()?;
        Some((stamp, id.to_string()))
    }

    fn list_entries(dir: &Path) -> io::Result<Vec<RecordEntry>> {
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((stamp, id)) = Self::parse_idstr(&name) else { continue };
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push(RecordEntry { stamp, id, path: entry.path(), len });
        }
        Ok(out)
    }

    /// Recompute [`CacheInfo`] by walking `record/` (and `removed/` for the
    /// max-stamp-including-tombstones rule). Used at open and as the
    /// anti-entropy driver's periodic fallback recount.
    pub fn read_info(&self) -> io::Result<CacheInfo> {
        let now = now_unix();
        let live = Self::list_entries(&self.record_dir())?;
        let removed = Self::list_entries(&self.removed_dir())?;

        let mut info = CacheInfo::default();
        for e in &live {
            info.count += 1;
            info.size += e.len;
            if e.stamp > now - SEVEN_DAYS_SECS {
                info.velocity += 1;
            }
            info.valid_stamp = info.valid_stamp.max(e.stamp);
            info.stamp = info.stamp.max(e.stamp);
        }
        for e in &removed {
            info.stamp = info.stamp.max(e.stamp);
        }
        Ok(info)
    }

    /// Re-walk disk and replace the in-memory counters. Call after bulk
    /// mutation (GC passes) rather than trusting incremental bookkeeping.
    pub async fn recompute_info(&self) -> Result<(), CacheError> {
        let info = self.read_info()?;
        self.state.write().await.info = info;
        Ok(())
    }

    /// Snapshot of the current counters.
    pub async fn info(&self) -> CacheInfo {
        self.state.read().await.info
    }

    /// `true` if this thread has any live record or tombstone on disk.
    pub async fn has_record(&self) -> bool {
        let record_empty = fs::read_dir(self.record_dir())
            .map(|mut d| d.next().is_none())
            .unwrap_or(true);
        let removed_empty = fs::read_dir(self.removed_dir())
            .map(|mut d| d.next().is_none())
            .unwrap_or(true);
        !(record_empty && removed_empty)
    }

    /// Ingest one record. Writes `record/<idstr>`; when `really` is set,
    /// updates `count`/`velocity`/`size`/`valid_stamp`. `stamp` always
    /// advances to at least `record.stamp`, even when `really` is false.
    /// Re-ingesting a byte-identical record is a no-op on the counters.
    pub async fn add(&self, record: &Record, really: bool) -> Result<bool, CacheError> {
        self.setup_directories()?;
        let path = self.record_dir().join(record.idstr());
        let line = record.to_line();

        let changed = match fs::read(&path) {
            Ok(existing) => existing != line.as_bytes(),
            Err(_) => true,
        };
        fs::write(&path, line.as_bytes())?;

        let mut state = self.state.write().await;
        if really && changed {
            state.info.count += 1;
            if record.stamp > now_unix() - SEVEN_DAYS_SECS {
                state.info.velocity += 1;
            }
            state.info.size += line.len() as u64;
            state.info.valid_stamp = state.info.valid_stamp.max(record.stamp);
        }
        state.info.stamp = state.info.stamp.max(record.stamp);
        Ok(changed)
    }

    /// Write a record straight to `removed/`, never counted as live.
    async fn tombstone(&self, record: &Record) -> Result<(), CacheError> {
        self.setup_directories()?;
        let path = self.removed_dir().join(record.idstr());
        fs::write(&path, record.to_line().as_bytes())?;
        let mut state = self.state.write().await;
        state.info.stamp = state.info.stamp.max(record.stamp);
        Ok(())
    }

    /// Move a live record to `removed/` in response to a remove-directive
    /// record, decrementing `count`/`size` if it was present. Returns
    /// `true` only when a live record actually existed and was moved.
    async fn apply_remove(&self, target_stamp: i64, target_id: &str) -> Result<bool, CacheError> {
        let idstr = format!("{target_stamp}_{target_id}");
        let src = self.record_dir().join(&idstr);
        let Ok(meta) = fs::metadata(&src) else { return Ok(false) };
        let len = meta.len();
        self.setup_directories()?;
        fs::rename(&src, self.removed_dir().join(&idstr))?;

        let mut state = self.state.write().await;
        state.info.count = state.info.count.saturating_sub(1);
        state.info.size = state.info.size.saturating_sub(len);
        Ok(true)
    }

    /// Parse each line of `res` as a record, apply the `(stamp, id,
    /// begin, end)` filter (a match is required only when the
    /// corresponding filter is set — `stamp >= 0`/non-empty `id`/both
    /// range bounds non-negative), then accept or tombstone it depending
    /// on the size limit and the spam heuristic.
    ///
    /// `accepted` carries the `(stamp, id)` of every genuinely new live
    /// record (an overwrite of a byte-identical existing record does not
    /// count), so a caller can `TellUpdate` exactly the records this
    /// thread did not already have.
    pub async fn check_data(&self, res: &str, stamp: i64, id: &str, begin: i64, end: i64) -> CheckOutcome {
        let mut outcome = CheckOutcome::default();

        for line in res.lines() {
            if line.trim().is_empty() {
                continue;
            }
            outcome.processed += 1;

            let rec = match Record::parse(line) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(error = %e, "broken record, skipping");
                    continue;
                }
            };

            if stamp >= 0 && rec.stamp != stamp {
                continue;
            }
            if !id.is_empty() && rec.id != id {
                continue;
            }
            if begin >= 0 && end >= 0 && !(begin <= rec.stamp && rec.stamp <= end) {
                continue;
            }

            if let Some((target_stamp, target_id)) = rec.remove_target() {
                if let Ok(true) = self.apply_remove(target_stamp, &target_id).await {
                    outcome.removed = true;
                }
            }

            let is_spam = rec.size() > self.record_limit_bytes || self.spam_check.is_spam(&rec);
            if is_spam {
                let _ = self.tombstone(&rec).await;
                outcome.spam = true;
            } else {
                let is_new = self.add(&rec, true).await.unwrap_or(false);
                if is_new {
                    outcome.accepted.push((rec.stamp, rec.id.clone()));
                }
            }
        }

        outcome
    }

    /// Exact single-record acceptance path for a `/get/<datfile>/<stamp>/<id>`
    /// response: same as [`Cache::check_data`] with an exact stamp/id filter
    /// and no range bound.
    pub async fn accept_exact(&self, res: &str, stamp: i64, id: &str) -> CheckOutcome {
        self.check_data(res, stamp, id, -1, -1).await
    }

    /// How the anti-entropy driver should fetch new records for this
    /// thread: an open-ended `/get` when the cache is empty and has
    /// nowhere better to start from, otherwise a `/head` index fetch
    /// followed by per-record `/get`s.
    pub async fn plan_range_fetch(&self) -> RangeFetchPlan {
        let now = now_unix();
        let info = self.info().await;
        let has_records = self.has_record().await;

        let mut begin = 0i64.max(info.stamp.min(now - self.limits.sync_range));
        if !has_records && self.limits.get_range > 0 {
            begin = 0i64.max(now - self.limits.get_range);
        }

        if begin == 0 && !has_records {
            RangeFetchPlan::Get { begin }
        } else {
            RangeFetchPlan::Head { begin }
        }
    }

    /// Drop the oldest excess live records (by stamp) once `record/`
    /// exceeds `save_size`, limited to entries whose retention window has
    /// elapsed (`stamp + limit < now`), then de-duplicate by record `id`
    /// (distinct from `idstr`), keeping the earliest occurrence.
    pub async fn remove_records(&self, now: i64, limit: i64) -> Result<(), CacheError> {
        let mut entries = Self::list_entries(&self.record_dir())?;
        entries.sort_by_key(|e| e.stamp);

        let save_size = self.limits.save_size;
        if entries.len() as u64 > save_size {
            let excess = entries.len() as u64 - save_size;
            let mut dropped = 0u64;
            for e in &entries {
                if dropped >= excess {
                    break;
                }
                if e.stamp + limit < now {
                    fs::remove_file(&e.path)?;
                    dropped += 1;
                }
            }
        }

        let mut remaining = Self::list_entries(&self.record_dir())?;
        remaining.sort_by_key(|e| e.stamp);
        let mut seen = HashSet::new();
        for e in &remaining {
            if !seen.insert(e.id.clone()) {
                fs::remove_file(&e.path)?;
            }
        }

        self.recompute_info().await
    }

    /// GC `attach/` entries whose corresponding record file in `record/`
    /// no longer exists (the `s`-prefixed thumbnail variant is treated the
    /// same as its primary attachment).
    pub fn check_attach(&self) -> io::Result<()> {
        let dir = self.attach_dir();
        if !dir.exists() {
            return Ok(());
        }
        let record_dir = self.record_dir();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let stripped = name.strip_prefix('s').unwrap_or(&name);
            let idstr = stripped.split('.').next().unwrap_or(stripped);
            if !record_dir.join(idstr).exists() {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    /// Purge tombstones older than `save_removed`.
    pub fn remove_expired_tombstones(&self, now: i64, save_removed: i64) -> io::Result<()> {
        if save_removed <= 0 {
            return Ok(());
        }
        for e in Self::list_entries(&self.removed_dir())? {
            if e.stamp + save_removed < now {
                let _ = fs::remove_file(&e.path);
            }
        }
        Ok(())
    }

    /// Recursively delete this thread's on-disk directory.
    pub fn remove(&self) -> io::Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// User tags for this thread, one per line in `tag.txt`.
    pub fn tags(&self) -> io::Result<Vec<String>> {
        match fs::read_to_string(self.tag_path()) {
            Ok(s) => Ok(s.lines().map(str::to_string).filter(|l| !l.is_empty()).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Overwrite `tag.txt`.
    pub fn set_tags(&self, tags: &[String]) -> io::Result<()> {
        fs::write(self.tag_path(), tags.join("\n"))
    }

    /// Append tags not already present.
    pub fn add_tags(&self, tags: &[String]) -> io::Result<()> {
        let mut current = self.tags()?;
        for t in tags {
            if !current.contains(t) {
                current.push(t.clone());
            }
        }
        self.set_tags(&current)
    }
}

/// The outcome of feeding wire data through [`Cache::check_data`]/[`Cache::accept_exact`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Number of non-blank lines parsed (broken lines included).
    pub processed: usize,
    /// `(stamp, id)` of every record genuinely new to this cache.
    pub accepted: Vec<(i64, String)>,
    /// Whether any line in this batch was rejected as spam/oversized.
    pub spam: bool,
    /// Whether any line in this batch tombstoned a previously live record.
    pub removed: bool,
}

impl CheckOutcome {
    /// `true` if at least one record was newly accepted.
    pub fn got(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// The outcome of [`Cache::plan_range_fetch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeFetchPlan {
    /// Issue `/get/<datfile>/<begin>-` and accept whatever comes back.
    Get {
        /// Inclusive lower bound, open-ended upper bound.
        begin: i64,
    },
    /// Issue `/head/<datfile>/<begin>-` and fetch individual records by
    /// `<stamp>/<id>` for each reported entry.
    Head {
        /// Inclusive lower bound, open-ended upper bound.
        begin: i64,
    },
}

/// Enumerates the caches known locally, lazily constructing [`Cache`]
/// handles keyed by `datfile` (the `cacheList` of the original design).
pub struct CacheRegistry {
    cache_dir: PathBuf,
    caches: RwLock<HashMap<String, Arc<Cache>>>,
    limits: CacheLimits,
    record_limit_bytes: usize,
    spam_check: Arc<dyn SpamCheck>,
}

impl CacheRegistry {
    /// Build a registry rooted at `cache_dir`. Does not scan the
    /// directory; caches are created on first use or discovered via
    /// [`CacheRegistry::known_datfiles`].
    pub fn new(
        cache_dir: PathBuf,
        limits: CacheLimits,
        record_limit_bytes: usize,
        spam_check: Arc<dyn SpamCheck>,
    ) -> Self {
        Self {
            cache_dir,
            caches: RwLock::new(HashMap::new()),
            limits,
            record_limit_bytes,
            spam_check,
        }
    }

    /// Get the cache for `datfile`, creating it on disk if this is the
    /// first time it's been seen.
    pub async fn get_or_create(&self, datfile: &str) -> Result<Arc<Cache>, CacheError> {
        if let Some(existing) = self.caches.read().await.get(datfile) {
            return Ok(existing.clone());
        }
        let mut guard = self.caches.write().await;
        if let Some(existing) = guard.get(datfile) {
            return Ok(existing.clone());
        }
        let cache = Arc::new(
            Cache::open(
                &self.cache_dir,
                datfile.to_string(),
                self.limits,
                self.record_limit_bytes,
                self.spam_check.clone(),
            )
            .await?,
        );
        guard.insert(datfile.to_string(), cache.clone());
        Ok(cache)
    }

    /// `datfile`s for every directory already present under `cache_dir`,
    /// resolved from each directory's `dat.stat` marker. Directories whose
    /// marker doesn't hash back to the directory name are renamed in
    /// place (the startup-time rehash consistency pass).
    pub fn known_datfiles(&self) -> io::Result<Vec<String>> {
        let mut out = Vec::new();
        if !self.cache_dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let stat_path = entry.path().join("dat.stat");
            let Ok(datfile) = fs::read_to_string(&stat_path) else { continue };
            let datfile = datfile.trim().to_string();
            if datfile.is_empty() {
                continue;
            }
            let expected = dathash(&datfile);
            if expected != dir_name {
                let new_path = self.cache_dir.join(&expected);
                if fs::rename(entry.path(), &new_path).is_ok() {
                    tracing::warn!(old = %dir_name, new = %expected, "rehashed cache directory");
                }
            }
            out.push(datfile);
        }
        Ok(out)
    }

    /// Every cache handle currently live in memory.
    pub async fn live_caches(&self) -> Vec<Arc<Cache>> {
        self.caches.read().await.values().cloned().collect()
    }

    /// `removeRecords` across every known cache.
    pub async fn clean_records(&self, now: i64) -> Result<(), CacheError> {
        for cache in self.live_caches().await {
            cache.remove_records(now, cache.limits.save_removed.max(1)).await?;
        }
        Ok(())
    }

    /// `removeRemoved` across every known cache.
    pub async fn remove_expired_tombstones(&self, now: i64) -> Result<(), CacheError> {
        for cache in self.live_caches().await {
            cache.remove_expired_tombstones(now, cache.limits.save_removed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::DefaultSpamFilter;

    fn limits() -> CacheLimits {
        CacheLimits { save_record: 100, save_size: 10, get_range: 86_400, sync_range: 3_600, save_removed: 0 }
            .normalized()
    }

    #[tokio::test]
    async fn add_then_add_same_record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(
            dir.path(),
            "thread_abc".to_string(),
            limits(),
            2048 * 1024,
            Arc::new(DefaultSpamFilter::default()),
        )
        .await
        .unwrap();

        let rec = Record::build(1_000, &[("body", "hi")], None).unwrap();
        assert!(cache.add(&rec, true).await.unwrap());
        assert!(!cache.add(&rec, true).await.unwrap());
        assert_eq!(cache.info().await.count, 1);
    }

    #[tokio::test]
    async fn valid_stamp_never_exceeds_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(
            dir.path(),
            "thread_abc".to_string(),
            limits(),
            2048 * 1024,
            Arc::new(DefaultSpamFilter::default()),
        )
        .await
        .unwrap();
        let rec = Record::build(500, &[("body", "x")], None).unwrap();
        cache.add(&rec, true).await.unwrap();
        let info = cache.info().await;
        assert!(info.valid_stamp <= info.stamp);
    }

    #[tokio::test]
    async fn oversized_record_is_spam() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(
            dir.path(),
            "thread_abc".to_string(),
            limits(),
            16, // tiny limit forces spam
            Arc::new(DefaultSpamFilter::default()),
        )
        .await
        .unwrap();
        let rec = Record::build(1, &[("body", "this body is way too long for the limit")], None).unwrap();
        let line = rec.to_line();
        let outcome = cache.check_data(&line, -1, "", -1, -1).await;
        assert_eq!(outcome.processed, 1);
        assert!(!outcome.got());
        assert!(outcome.spam);
        assert!(!outcome.removed);
        assert_eq!(cache.info().await.count, 0);
    }

    #[tokio::test]
    async fn remove_directive_tombstones_target() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(
            dir.path(),
            "thread_abc".to_string(),
            limits(),
            2048 * 1024,
            Arc::new(DefaultSpamFilter::default()),
        )
        .await
        .unwrap();
        let target = Record::build(10, &[("body", "doomed")], None).unwrap();
        cache.add(&target, true).await.unwrap();
        assert_eq!(cache.info().await.count, 1);

        let remover = Record::build(
            20,
            &[("remove_stamp", "10"), ("remove_id", &target.id)],
            None,
        )
        .unwrap();
        let line = remover.to_line();
        let outcome = cache.check_data(&line, -1, "", -1, -1).await;
        assert!(outcome.got());
        assert!(outcome.removed);
        assert_eq!(cache.info().await.count, 1); // remover itself now counted live
        assert!(!dir.path().join(dathash("thread_abc")).join("record").join(target.idstr()).exists());
        assert!(dir.path().join(dathash("thread_abc")).join("removed").join(target.idstr()).exists());
    }

    #[tokio::test]
    async fn plan_range_fetch_empty_cache_with_zero_get_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut l = limits();
        l.get_range = 0;
        let cache = Cache::open(
            dir.path(),
            "thread_abc".to_string(),
            l,
            2048 * 1024,
            Arc::new(DefaultSpamFilter::default()),
        )
        .await
        .unwrap();
        match cache.plan_range_fetch().await {
            RangeFetchPlan::Get { begin } => assert_eq!(begin, 0),
            other => panic!("expected Get{{begin: 0}}, got {other:?}"),
        }
    }
}
