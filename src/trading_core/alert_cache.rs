//! Alert Dedup Cache
//!
//! At most one alert per dedup key per calendar day. Records are evicted
//! oldest-first when the size ceiling is exceeded, and the whole store rotates
//! at the UTC day boundary.
//!
//! Persisted as `alerts_YYYYMMDD.json.zst` (zstd-compressed JSON) so restarts
//! within a day keep their dedup state.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::alerts::{AlertPayload, DedupKey};

/// Default size ceiling (100MB)
pub const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;

const FILE_PREFIX: &str = "alerts_";
const FILE_SUFFIX: &str = ".json.zst";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub key: String,
    pub payload: AlertPayload,
    pub emitted_at: DateTime<Utc>,
    pub delivered: bool,
}

impl AlertRecord {
    fn size(&self) -> usize {
        serde_json::to_vec(self)
            .map(|v| v.len())
            .unwrap_or(self.key.len())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DayFile {
    day: NaiveDate,
    /// Oldest first
    records: Vec<AlertRecord>,
}

#[derive(Debug)]
pub struct AlertCache {
    dir: Option<PathBuf>,
    day: NaiveDate,
    records: HashMap<String, (AlertRecord, usize)>,
    order: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
    dirty: bool,
}

impl AlertCache {
    /// In-memory cache, nothing persisted
    pub fn in_memory(max_bytes: usize, now: DateTime<Utc>) -> Self {
        Self {
            dir: None,
            day: now.date_naive(),
            records: HashMap::new(),
            order: VecDeque::new(),
            bytes: 0,
            max_bytes,
            dirty: false,
        }
    }

    /// Open the cache in `dir`, loading today's file and removing older day files
    pub fn open(dir: &Path, max_bytes: usize, now: DateTime<Utc>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

        let mut cache = Self::in_memory(max_bytes, now);
        cache.dir = Some(dir.to_path_buf());
        cache.remove_stale_files()?;

        let path = cache.day_path(cache.day);
        if path.exists() {
            let compressed = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let json = zstd::decode_all(&compressed[..])
                .with_context(|| format!("Failed to decompress {}", path.display()))?;
            let file: DayFile = serde_json::from_slice(&json)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            if file.day == cache.day {
                for record in file.records {
                    cache.insert(record);
                }
                cache.evict_to_ceiling();
            }
            info!("Loaded {} alert records from {}", cache.len(), path.display());
        }
        cache.dirty = false;

        Ok(cache)
    }

    /// Admit `key` once per day; later calls with the same key are duplicates
    pub fn admit(&mut self, key: &DedupKey, payload: &AlertPayload, now: DateTime<Utc>) -> Admission {
        self.rotate_if_needed(now);

        let key = key.as_string();
        if self.records.contains_key(&key) {
            debug!("Duplicate alert {}", key);
            return Admission::Duplicate;
        }

        let record = AlertRecord {
            key: key.clone(),
            payload: payload.clone(),
            emitted_at: now,
            delivered: true,
        };
        if record.size() > self.max_bytes {
            warn!("Alert record {} exceeds cache ceiling, not retained", key);
            return Admission::Accepted;
        }

        self.insert(record);
        self.evict_to_ceiling();
        self.dirty = true;
        Admission::Accepted
    }

    /// Record a notifier failure; the key stays admitted
    pub fn mark_undelivered(&mut self, key: &DedupKey) -> bool {
        let Some((record, size)) = self.records.get_mut(&key.as_string()) else {
            return false;
        };
        record.delivered = false;
        let resized = record.size();
        self.bytes = self.bytes - *size + resized;
        *size = resized;
        self.dirty = true;
        self.evict_to_ceiling();
        true
    }

    /// Clear everything when the day has changed since the last admit
    pub fn rotate_if_needed(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today == self.day {
            return;
        }
        info!(
            "Rotating alert cache {} -> {} ({} records dropped)",
            self.day,
            today,
            self.records.len()
        );
        self.clear();
        self.day = today;
        if let Err(e) = self.remove_stale_files() {
            warn!("Failed to remove old alert cache files: {}", e);
        }
    }

    /// Write today's records if anything changed
    pub fn flush(&mut self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let records: Vec<AlertRecord> = self
            .order
            .iter()
            .filter_map(|k| self.records.get(k).map(|(r, _)| r.clone()))
            .collect();
        let file = DayFile {
            day: self.day,
            records,
        };
        let json = serde_json::to_vec(&file)?;
        let compressed = zstd::encode_all(&json[..], 3)?;

        let path = self.day_path(self.day);
        let tmp = dir.join(format!("{}{}.tmp", FILE_PREFIX, self.day.format("%Y%m%d")));
        std::fs::write(&tmp, compressed).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!("Flushed {} alert records to {}", file.records.len(), path.display());
        self.dirty = false;
        Ok(())
    }

    /// Empty the in-memory store
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.bytes = 0;
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.records.contains_key(&key.as_string())
    }

    pub fn get(&self, key: &DedupKey) -> Option<&AlertRecord> {
        self.records.get(&key.as_string()).map(|(r, _)| r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    fn insert(&mut self, record: AlertRecord) {
        let size = record.size();
        if self.records.contains_key(&record.key) {
            return;
        }
        self.order.push_back(record.key.clone());
        self.records.insert(record.key.clone(), (record, size));
        self.bytes += size;
    }

    fn evict_to_ceiling(&mut self) {
        while self.bytes > self.max_bytes {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some((_, size)) = self.records.remove(&oldest) {
                self.bytes -= size;
                debug!("Evicted alert record {}", oldest);
            }
        }
    }

    fn day_path(&self, day: NaiveDate) -> PathBuf {
        let name = format!("{}{}{}", FILE_PREFIX, day.format("%Y%m%d"), FILE_SUFFIX);
        match &self.dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn remove_stale_files(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let current = self.day_path(self.day);
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) && path != current {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                info!("Removed old alert cache {}", name);
            }
        }
        Ok(())
    }
}
