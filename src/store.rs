//! File Store (spec.md §4.4): atomic publish of (metadata, body) pairs and
//! variation records, lookup, eviction, and orphan cleanup.

use std::path::{Path, PathBuf};

use log::{trace, warn};
use time::OffsetDateTime;

use crate::{
    error::Result,
    filename::{self, FileKind, FileName},
    model::{CachedResponse, ResponseEntry},
    variation::Variation,
};

/// What a successful [`FileStore::lookup`] found.
#[derive(Debug, Clone)]
pub enum LookupHit {
    /// A directly-servable response.
    Response(CachedResponse),
    /// An indirection pointing at the variation needed to compute the
    /// downstream response key (spec.md §9 "Two-level lookup").
    Variation(Variation),
}

/// The two-level on-disk cache engine (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`, with `root/temp/`
    /// as its atomic-publish staging area.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tokio::fs::create_dir_all(root.join("temp")).await?;
        Ok(Self { root })
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Looks up `key` as of `now`, returning the most recent non-expired
    /// permanent entry sharing its `keyHash` prefix, or `None` if no such
    /// entry exists.
    ///
    /// An expired hit is deleted and treated as a miss (spec.md §7 `Expired`).
    /// `now` comes from the injected [`crate::clock::Clock`] (spec.md §9
    /// "Clock") so expiration decisions are testable without real sleeps.
    pub async fn lookup(&self, key: &str, now: OffsetDateTime) -> Result<Option<LookupHit>> {
        let hash = filename::sha1_hex(key);
        let Some((path, name)) = self.find_winning_candidate(&hash).await? else {
            return Ok(None);
        };

        let expiration = read_expiration(&path).await?;
        if now > expiration {
            trace!("file-http-cache: {hash} expired, scheduling delete");
            self.delete_name(&name).await;
            return Ok(None);
        }

        match name.kind() {
            FileKind::ResponseMeta => {
                let Some(hit) = self.read_response(&path, &name).await? else {
                    return Ok(None);
                };
                Ok(Some(LookupHit::Response(hit)))
            }
            FileKind::Variation => {
                let bytes = tokio::fs::read(&path).await?;
                let variation: Variation = serde_json::from_slice(&bytes)?;
                Ok(Some(LookupHit::Variation(variation)))
            }
            FileKind::ResponseBody => Ok(None),
        }
    }

    async fn read_response(&self, meta_path: &Path, meta_name: &FileName) -> Result<Option<CachedResponse>> {
        let body_name = meta_name.to_response_file_name();
        let body_path = self.root.join(body_name.to_file_name());
        if tokio::fs::metadata(&body_path).await.is_err() {
            // Invariant violation: metadata without a body. Drop the orphaned
            // metadata rather than serve a response with no content.
            warn!("file-http-cache: metadata with no body, dropping {:?}", meta_path);
            let _ = tokio::fs::remove_file(meta_path).await;
            return Ok(None);
        }
        let meta_bytes = tokio::fs::read(meta_path).await?;
        let entry: ResponseEntry = serde_json::from_slice(&meta_bytes)?;
        let body = tokio::fs::read(&body_path).await?;
        Ok(Some(CachedResponse { entry, body }))
    }

    /// Finds the file under `root/` matching `{hash}_*.json`, picking the
    /// lexicographically greatest name (spec.md §4.4, §9 "Filename as index").
    async fn find_winning_candidate(&self, hash: &str) -> Result<Option<(PathBuf, FileName)>> {
        let mut best: Option<(String, FileName)> = None;
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let prefix = format!("{hash}_");
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            if !file_name.starts_with(&prefix) || !file_name.ends_with(".json") {
                continue;
            }
            let Some(parsed) = FileName::parse(file_name) else {
                trace!("file-http-cache: skipping corrupt filename {file_name}");
                continue;
            };
            if best.as_ref().is_none_or(|(best_name, _)| file_name > best_name.as_str()) {
                best = Some((file_name.to_string(), parsed));
            }
        }
        Ok(best.map(|(name, parsed)| (self.root.join(name), parsed)))
    }

    /// Publishes a response (metadata + body) under `key`, expiring at
    /// `expiration`. `modified_utc` is the filename's embedded ordering
    /// timestamp (spec.md §3 `FileName`) — the response's `Last-Modified`,
    /// or the time of storage absent that — which is distinct from
    /// `expiration` (the file's last-write-time).
    ///
    /// Body is renamed into place before metadata, so any observer that sees
    /// the metadata can open the body (spec.md §4.4 "ordering matters"). If a
    /// rename fails (e.g. a concurrent publisher already holds the target
    /// open), the temp pair is left for the next [`FileStore::purge`] to sweep
    /// (spec.md §7 `PublishRace`).
    pub async fn publish_response(
        &self,
        key: &str,
        entry: &ResponseEntry,
        body: &[u8],
        modified_utc: OffsetDateTime,
        expiration: OffsetDateTime,
    ) -> Result<()> {
        let temp_body = FileName::temporary(FileKind::ResponseBody);
        let temp_meta = temp_body.to_response_file_name(); // same uuid, .response.json

        let temp_body_path = self.temp_dir().join(temp_body.to_file_name());
        let temp_meta_path = self.temp_dir().join(temp_meta.to_file_name());

        tokio::fs::write(&temp_body_path, body).await?;
        let meta_bytes = serde_json::to_vec(entry)?;
        tokio::fs::write(&temp_meta_path, &meta_bytes).await?;
        set_expiration(&temp_meta_path, expiration).await?;

        let permanent_meta = FileName::metadata(key, modified_utc, entry.etag());
        let permanent_body = permanent_meta.to_response_file_name();
        let permanent_body_path = self.root.join(permanent_body.to_file_name());
        let permanent_meta_path = self.root.join(permanent_meta.to_file_name());

        if tokio::fs::rename(&temp_body_path, &permanent_body_path).await.is_err() {
            warn!("file-http-cache: publish race on body for key hash, leaving temp pair for purge");
            return Ok(());
        }
        if tokio::fs::rename(&temp_meta_path, &permanent_meta_path).await.is_err() {
            warn!("file-http-cache: publish race on metadata for key hash, leaving temp pair for purge");
        }
        Ok(())
    }

    /// Publishes a variation indirection record under `key`, expiring at the
    /// same instant as the response it refers to.
    pub async fn publish_variation(
        &self,
        key: &str,
        variation: &Variation,
        modified_utc: OffsetDateTime,
        expiration: OffsetDateTime,
    ) -> Result<()> {
        let temp = FileName::temporary(FileKind::Variation);
        let temp_path = self.temp_dir().join(temp.to_file_name());
        let bytes = serde_json::to_vec(variation)?;
        tokio::fs::write(&temp_path, &bytes).await?;
        set_expiration(&temp_path, expiration).await?;

        let permanent = FileName::variation(key, modified_utc, None);
        let permanent_path = self.root.join(permanent.to_file_name());
        if tokio::fs::rename(&temp_path, &permanent_path).await.is_err() {
            warn!("file-http-cache: publish race on variation record, leaving temp file for purge");
        }
        Ok(())
    }

    /// Sets `key`'s winning entry's last-access time to now, without
    /// changing its expiration (spec.md §4.5 step 3, refreshing a variation
    /// record's access time on a two-level hit).
    pub async fn touch_access(&self, key: &str) -> Result<()> {
        let hash = filename::sha1_hex(key);
        if let Some((path, _)) = self.find_winning_candidate(&hash).await? {
            touch_access(&path).await?;
        }
        Ok(())
    }

    /// Touches `key`'s winning entry: sets last-access to now and last-write
    /// (expiration) to `new_expiration`. No file move.
    pub async fn refresh(&self, key: &str, new_expiration: OffsetDateTime) -> Result<()> {
        let hash = filename::sha1_hex(key);
        if let Some((path, _)) = self.find_winning_candidate(&hash).await? {
            set_expiration(&path, new_expiration).await?;
            touch_access(&path).await?;
        }
        Ok(())
    }

    /// Unlinks metadata first, then attempts to unlink the body; body
    /// failures are tolerated (it becomes an orphan, swept later).
    pub async fn delete(&self, key: &str) -> Result<()> {
        let hash = filename::sha1_hex(key);
        if let Some((path, name)) = self.find_winning_candidate(&hash).await? {
            let _ = path;
            self.delete_name(&name).await;
        }
        Ok(())
    }

    async fn delete_name(&self, name: &FileName) {
        let path = self.root.join(name.to_file_name());
        match name.kind() {
            FileKind::ResponseMeta => {
                let _ = tokio::fs::remove_file(&path).await;
                let body_path = self.root.join(name.to_response_file_name().to_file_name());
                if let Err(e) = tokio::fs::remove_file(&body_path).await {
                    trace!("file-http-cache: body unlink failed, leaving orphan for sweep: {e}");
                }
            }
            FileKind::Variation => {
                let _ = tokio::fs::remove_file(&path).await;
            }
            FileKind::ResponseBody => {}
        }
    }

    /// Enforces `max_entries` (soft — only enforced here), clears `temp/`,
    /// and sweeps orphaned bodies. Scheduled every 5 minutes by the facade's
    /// owner, and callable on demand.
    pub async fn purge(&self, max_entries: usize) -> Result<()> {
        let mut entries: Vec<(PathBuf, OffsetDateTime)> = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !file_name.ends_with(".json") {
                continue;
            }
            let accessed = read_last_access(&path).await?;
            entries.push((path, accessed));
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in entries.into_iter().skip(max_entries) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()).and_then(FileName::parse) {
                self.delete_name(&name).await;
            }
        }

        let mut temp_dir = tokio::fs::read_dir(self.temp_dir()).await?;
        while let Some(entry) = temp_dir.next_entry().await? {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }

        self.sweep_orphans().await
    }

    /// Unlinks any `.response.bin` file under `root/` whose matching
    /// `.response.json` is missing (spec.md §7 `OrphanDetected`).
    async fn sweep_orphans(&self) -> Result<()> {
        let mut meta_bases = std::collections::HashSet::new();
        let mut bodies = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if let Some(base) = file_name.strip_suffix(".response.json") {
                meta_bases.insert(base.to_string());
            } else if let Some(base) = file_name.strip_suffix(".response.bin") {
                bodies.push((path.clone(), base.to_string()));
            }
        }
        for (path, base) in bodies {
            if !meta_bases.contains(&base) {
                trace!("file-http-cache: sweeping orphaned body {:?}", path);
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }

    /// Deletes every metadata and variation file, then sweeps orphans.
    pub async fn clear(&self) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()).and_then(FileName::parse) {
                if matches!(name.kind(), FileKind::ResponseMeta | FileKind::Variation) {
                    names.push(name);
                }
            }
        }
        for name in names {
            self.delete_name(&name).await;
        }
        self.sweep_orphans().await
    }
}

async fn set_expiration(path: &Path, expiration: OffsetDateTime) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || filename::set_expiration(&path, expiration))
        .await
        .expect("blocking task panicked")
}

async fn touch_access(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || filename::refresh_access(&path, OffsetDateTime::now_utc()))
        .await
        .expect("blocking task panicked")
}

async fn read_expiration(path: &Path) -> Result<OffsetDateTime> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || filename::get_expiration(&path)).await.expect("blocking task panicked")
}

async fn read_last_access(path: &Path) -> Result<OffsetDateTime> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<OffsetDateTime> {
        let metadata = std::fs::metadata(&path)?;
        let atime = filetime::FileTime::from_last_access_time(&metadata);
        Ok(OffsetDateTime::from_unix_timestamp(atime.unix_seconds()).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    })
    .await
    .expect("blocking task panicked")
}
