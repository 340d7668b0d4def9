//! Reconciles candidate jobs with the store.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use djb_core::{NormalizedJob, UnknownVariant};
use djb_storage::{DedupRow, InsertOutcome, JobStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cleanup deletes go out in batches of this many ids.
pub const DELETE_CHUNK: usize = 100;
/// Title prefix length of the soft dedup key.
pub const TITLE_KEY_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub inserted: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for SyncCounts {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

/// A store failure partway through a batch, with what was done before it.
#[derive(Debug, Error)]
#[error("{source} (after {} inserted, {} skipped)", counts.inserted, counts.skipped)]
pub struct SyncAborted {
    pub counts: SyncCounts,
    pub source: StoreError,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn JobStore>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Conditional insert of every candidate. Candidates are visited oldest
    /// first, so when two collapse to the same id or apply URL the earliest
    /// `posted_at` is the one kept. A store error aborts the batch; rows
    /// already inserted stay and are counted in the error.
    pub async fn sync(&self, mut candidates: Vec<NormalizedJob>) -> Result<SyncCounts, SyncAborted> {
        candidates.sort_by(|a, b| a.posted_at.cmp(&b.posted_at));

        let mut counts = SyncCounts::default();
        let mut batch_ids = HashSet::new();
        let mut batch_urls = HashSet::new();

        for job in &candidates {
            let url = job.apply_url.as_deref();
            if !batch_ids.insert(job.id.clone()) || url.is_some_and(|u| batch_urls.contains(u)) {
                debug!(id = %job.id, "duplicate within batch");
                counts.skipped += 1;
                continue;
            }
            if let Some(url) = url {
                batch_urls.insert(url.to_string());
            }

            match self.reconcile(job).await {
                Ok(true) => counts.inserted += 1,
                Ok(false) => counts.skipped += 1,
                Err(source) => {
                    warn!(id = %job.id, inserted = counts.inserted, skipped = counts.skipped, error = %source, "sync aborted");
                    return Err(SyncAborted { counts, source });
                }
            }
        }

        info!(candidates = candidates.len(), inserted = counts.inserted, skipped = counts.skipped, "sync finished");
        Ok(counts)
    }

    /// `true` when `job` was written.
    async fn reconcile(&self, job: &NormalizedJob) -> Result<bool, StoreError> {
        if self.store.exists_by_id(&job.id).await? {
            debug!(id = %job.id, "already stored");
            return Ok(false);
        }
        if let Some(url) = job.apply_url.as_deref() {
            if let Some(existing) = self.store.find_id_by_apply_url(url).await? {
                debug!(id = %job.id, %existing, "apply url already stored");
                return Ok(false);
            }
        }
        match self.store.insert_if_absent(job).await? {
            InsertOutcome::Inserted => Ok(true),
            InsertOutcome::Duplicate => {
                debug!(id = %job.id, "lost insert race");
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupKey {
    ApplyUrl,
    TitleCompany,
}

impl DedupKey {
    pub const ALL: &'static [DedupKey] = &[DedupKey::ApplyUrl, DedupKey::TitleCompany];

    pub fn as_str(&self) -> &'static str {
        match self {
            DedupKey::ApplyUrl => "apply-url",
            DedupKey::TitleCompany => "title-company",
        }
    }

    /// Grouping key for a stored row; `None` leaves the row out of cleanup.
    pub fn key_for(&self, row: &DedupRow) -> Option<String> {
        match self {
            DedupKey::ApplyUrl => row
                .apply_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            DedupKey::TitleCompany => {
                let title: String = normalize_key_fragment(&row.title)
                    .chars()
                    .take(TITLE_KEY_CHARS)
                    .collect();
                let company = normalize_key_fragment(&row.company);
                if title.is_empty() {
                    None
                } else {
                    Some(format!("{}|{company}", title.trim_end()))
                }
            }
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DedupKey {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| UnknownVariant {
                kind: "dedupe key",
                value: s.to_string(),
                valid: Self::ALL.iter().map(DedupKey::as_str).collect(),
            })
    }
}

/// Lowercase, alphanumerics only, single spaces.
pub fn normalize_key_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ids to delete: in every group sharing a key, all but the oldest row
/// (ties broken by id).
pub fn plan_cleanup(rows: &[DedupRow], key: DedupKey) -> (usize, Vec<String>) {
    let mut groups: BTreeMap<String, Vec<&DedupRow>> = BTreeMap::new();
    for row in rows {
        if let Some(k) = key.key_for(row) {
            groups.entry(k).or_default().push(row);
        }
    }

    let mut duplicate_groups = 0;
    let mut doomed = Vec::new();
    for members in groups.values_mut() {
        if members.len() < 2 {
            continue;
        }
        duplicate_groups += 1;
        members.sort_by(|a, b| a.posted_at.cmp(&b.posted_at).then_with(|| a.id.cmp(&b.id)));
        doomed.extend(members.iter().skip(1).map(|row| row.id.clone()));
    }
    (duplicate_groups, doomed)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Always `true`; failures are reported as errors instead.
    pub success: bool,
    pub key: DedupKey,
    pub dry_run: bool,
    pub scanned: usize,
    /// Keys shared by more than one row.
    pub groups: usize,
    /// Rows that are not the oldest in their group.
    pub duplicates: usize,
    pub deleted: u64,
    pub duration_ms: u64,
}

/// Batch job that collapses stored duplicates, oldest `posted_at` wins.
#[derive(Clone)]
pub struct DuplicateCleanup {
    store: Arc<dyn JobStore>,
}

impl DuplicateCleanup {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, key: DedupKey, dry_run: bool) -> Result<CleanupReport, StoreError> {
        let clock = Instant::now();
        let rows = self.store.list_dedup_rows().await?;
        let (groups, doomed) = plan_cleanup(&rows, key);

        let mut deleted = 0;
        if !dry_run {
            for chunk in doomed.chunks(DELETE_CHUNK) {
                deleted += self.store.delete_by_ids(chunk).await?;
                debug!(%key, batch = chunk.len(), "deleted duplicate batch");
            }
        }

        let report = CleanupReport {
            success: true,
            key,
            dry_run,
            scanned: rows.len(),
            groups,
            duplicates: doomed.len(),
            deleted,
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        info!(%key, dry_run, scanned = report.scanned, groups, duplicates = report.duplicates, deleted, duration_ms = report.duration_ms, "duplicate cleanup finished");
        Ok(report)
    }
}
