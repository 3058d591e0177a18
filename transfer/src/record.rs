// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Progress records that let an interrupted transfer resume.
//!
//! A record is a JSON file:
//!
//! ```json
//! {
//!   "bucket": "examplebucket-1250000000",
//!   "key": "dir/a.bin",
//!   "tmp_filename": "/data/a.bin.0c2b1f4e7a.cos_tmp",
//!   "mtime": "Wed, 21 Oct 2015 07:28:00 GMT",
//!   "etag": "\"e10adc3949ba59abbe56e057f20f883e\"",
//!   "file_size": 10485760,
//!   "part_size": 1048576,
//!   "parts": [{"part_id": 1, "start": 0, "length": 1048576}]
//! }
//! ```
//!
//! Upload records carry `upload_id` instead of `tmp_filename`, and every
//! part carries its `etag`.

use crate::plan::PartPlan;
use crate::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

/// One completed part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    /// Part number, starting at 1.
    pub part_id: u32,
    /// Offset of the first byte.
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    /// ETag returned by the service, uploads only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// State persisted between attempts of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Temp file parts are written into, downloads only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_filename: Option<String>,
    /// Multipart upload id, uploads only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    /// Last-Modified of the remote object, or the local file mtime for uploads.
    pub mtime: String,
    /// ETag of the remote object, empty for uploads.
    #[serde(default)]
    pub etag: String,
    /// Size of the whole object.
    pub file_size: u64,
    /// Part size the plan was built with.
    pub part_size: u64,
    /// Completed parts, in completion order.
    pub parts: Vec<PartRecord>,
}

impl ProgressRecord {
    /// Numbers of the completed parts.
    pub fn completed(&self) -> BTreeSet<u32> {
        self.parts.iter().map(|p| p.part_id).collect()
    }

    /// Rebuild the plan this record was created with.
    pub fn plan(&self) -> Result<PartPlan> {
        PartPlan::with_part_size(self.file_size, self.part_size)
    }

    /// Whether every recorded part matches the plan byte for byte.
    pub fn is_consistent(&self) -> bool {
        let Ok(plan) = self.plan() else {
            return false;
        };
        let mut seen = BTreeSet::new();
        self.parts.iter().all(|p| {
            seen.insert(p.part_id)
                && plan
                    .get(p.part_id)
                    .is_some_and(|d| d.offset == p.start && d.length == p.length)
        })
    }
}

/// What a transfer is about. Its identity fields decide whether an existing
/// record still describes the same object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Absolute local path, the destination of a download or the source of an upload.
    pub local_path: PathBuf,
    /// Size of the object.
    pub size: u64,
    /// Remote ETag, empty for uploads.
    pub etag: String,
    /// Remote Last-Modified or local mtime.
    pub mtime: String,
}

impl TransferTarget {
    /// Start a record for this target with no completed parts.
    pub fn new_record(&self, part_size: u64) -> ProgressRecord {
        ProgressRecord {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            tmp_filename: None,
            upload_id: None,
            mtime: self.mtime.clone(),
            etag: self.etag.clone(),
            file_size: self.size,
            part_size,
            parts: Vec::new(),
        }
    }

    /// Whether `record` was written for this very object version.
    pub fn matches(&self, record: &ProgressRecord) -> bool {
        record.bucket == self.bucket
            && record.key == self.key
            && record.etag == self.etag
            && record.mtime == self.mtime
            && record.file_size == self.size
            && record.is_consistent()
    }
}

/// Reads and writes progress records under one directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Create a store rooted at `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory records live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<bucket>_<md5(key)>.<md5(local path)>`
    pub fn download_path(&self, bucket: &str, key: &str, local_path: &Path) -> PathBuf {
        self.dir.join(format!(
            "{bucket}_{}.{}",
            coskit_core::hash::hex_md5(key.as_bytes()),
            coskit_core::hash::hex_md5(local_path.to_string_lossy().as_bytes())
        ))
    }

    /// Same as [`RecordStore::download_path`] with an `.upload` suffix.
    pub fn upload_path(&self, bucket: &str, key: &str, local_path: &Path) -> PathBuf {
        let mut path = self.download_path(bucket, key, local_path).into_os_string();
        path.push(".upload");
        path.into()
    }

    /// Load a record, `None` if there is none.
    ///
    /// A record that can't be parsed is deleted and reported as `None`.
    pub fn load(&self, path: &Path) -> Result<Option<ProgressRecord>> {
        let content = match std::fs::read(path) {
            Ok(v) => v,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::setup(format!(
                    "failed to read progress record {}",
                    path.display()
                ))
                .with_source(err))
            }
        };

        match serde_json::from_slice(&content) {
            Ok(record) => {
                debug!("loaded progress record {}", path.display());
                Ok(Some(record))
            }
            Err(err) => {
                warn!(
                    "progress record {} is corrupted, discarding: {err}",
                    path.display()
                );
                self.delete(path)?;
                Ok(None)
            }
        }
    }

    /// Load a record and keep it only if `accept` says it is still usable.
    /// Rejected records are deleted.
    pub fn load_valid(
        &self,
        path: &Path,
        accept: impl FnOnce(&ProgressRecord) -> bool,
    ) -> Result<Option<ProgressRecord>> {
        match self.load(path)? {
            Some(record) if accept(&record) => Ok(Some(record)),
            Some(_) => {
                warn!(
                    "progress record {} is stale, restarting transfer",
                    path.display()
                );
                self.delete(path)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Write a record through a temp file in the same directory and rename
    /// it over `path`, so readers see either the old or the new record.
    pub fn save(&self, path: &Path, record: &ProgressRecord) -> Result<()> {
        let persist = |err: std::io::Error| {
            Error::record_persist(format!("failed to save progress record {}", path.display()))
                .with_source(err)
        };

        std::fs::create_dir_all(&self.dir).map_err(persist)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir).map_err(persist)?;
        let content = serde_json::to_vec(record)?;
        file.write_all(&content).map_err(persist)?;
        file.as_file().sync_all().map_err(persist)?;
        file.persist(path).map_err(|e| persist(e.error))?;
        Ok(())
    }

    /// Save a record on the blocking pool, logging failures instead of
    /// returning them.
    ///
    /// Losing a record only costs resumability, the running transfer goes on.
    pub async fn save_or_warn(&self, path: &Path, record: &ProgressRecord) {
        let store = self.clone();
        let path = path.to_path_buf();
        let record = record.clone();
        let saved = tokio::task::spawn_blocking(move || store.save(&path, &record))
            .await
            .unwrap_or_else(|err| {
                Err(Error::unexpected("progress record writer failed").with_source(err))
            });
        if let Err(err) = saved {
            warn!("{err}, the transfer can't be resumed from this point");
        }
    }

    /// Remove a record; removing a missing record is fine.
    pub fn delete(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::record_persist(format!(
                "failed to delete progress record {}",
                path.display()
            ))
            .with_source(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MIB;
    use pretty_assertions::assert_eq;

    fn target() -> TransferTarget {
        TransferTarget {
            bucket: "examplebucket-1250000000".to_string(),
            key: "dir/a.bin".to_string(),
            local_path: PathBuf::from("/data/a.bin"),
            size: 3 * MIB + 5,
            etag: "\"e10adc3949ba59abbe56e057f20f883e\"".to_string(),
            mtime: "Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        }
    }

    fn record() -> ProgressRecord {
        let mut record = target().new_record(MIB);
        record.tmp_filename = Some("/data/a.bin.1.cos_tmp".to_string());
        record.parts.push(PartRecord {
            part_id: 2,
            start: MIB,
            length: MIB,
            etag: None,
        });
        record
    }

    #[test]
    fn test_json_layout() -> Result<()> {
        let value: serde_json::Value = serde_json::to_value(record())?;
        assert_eq!(
            value,
            serde_json::json!({
                "bucket": "examplebucket-1250000000",
                "key": "dir/a.bin",
                "tmp_filename": "/data/a.bin.1.cos_tmp",
                "mtime": "Wed, 21 Oct 2015 07:28:00 GMT",
                "etag": "\"e10adc3949ba59abbe56e057f20f883e\"",
                "file_size": 3 * MIB + 5,
                "part_size": MIB,
                "parts": [{"part_id": 2, "start": MIB, "length": MIB}],
            })
        );
        Ok(())
    }

    #[test]
    fn test_save_load_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RecordStore::new(dir.path().join("record"));
        let path = store.download_path("b", "k", Path::new("/data/a.bin"));

        assert_eq!(store.load(&path)?, None);
        store.save(&path, &record())?;
        assert_eq!(store.load(&path)?, Some(record()));

        // Only the record itself is left behind, no temp siblings.
        assert_eq!(std::fs::read_dir(store.dir())?.count(), 1);

        store.delete(&path)?;
        store.delete(&path)?;
        assert_eq!(store.load(&path)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_or_warn() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RecordStore::new(dir.path().join("record"));
        let path = store.download_path("b", "k", Path::new("/data/a.bin"));

        // Saves run on the blocking pool while the runtime keeps going.
        let ticker = tokio::spawn(async { tokio::task::yield_now().await });
        store.save_or_warn(&path, &record()).await;
        ticker.await.map_err(|e| Error::unexpected("ticker failed").with_source(e))?;
        assert_eq!(store.load(&path)?, Some(record()));

        // A store that can't be written to only logs.
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"")?;
        let broken = RecordStore::new(&file);
        let path = broken.download_path("b", "k", Path::new("/data/a.bin"));
        broken.save_or_warn(&path, &record()).await;
        assert!(broken.save(&path, &record()).is_err());
        assert_eq!(broken.load(&path).ok().flatten(), None);
        Ok(())
    }

    #[test]
    fn test_paths_are_distinct() {
        let store = RecordStore::new("/r");
        let a = store.download_path("b", "k", Path::new("/data/a"));
        let b = store.download_path("b", "k", Path::new("/data/b"));
        assert_ne!(a, b);
        assert_eq!(
            a.file_name().and_then(|v| v.to_str()),
            Some(
                format!(
                    "b_{}.{}",
                    coskit_core::hash::hex_md5(b"k"),
                    coskit_core::hash::hex_md5(b"/data/a")
                )
                .as_str()
            )
        );
        assert!(store
            .upload_path("b", "k", Path::new("/data/a"))
            .to_string_lossy()
            .ends_with(".upload"));
    }

    #[test]
    fn test_corrupted_record_is_discarded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RecordStore::new(dir.path());
        let path = dir.path().join("broken");
        std::fs::write(&path, b"{\"bucket\": ")?;

        assert_eq!(store.load(&path)?, None);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_stale_record_is_deleted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RecordStore::new(dir.path());
        let path = store.download_path("b", "k", Path::new("/data/a.bin"));
        store.save(&path, &record())?;

        let mut changed = target();
        changed.etag = "\"another\"".to_string();
        assert_eq!(store.load_valid(&path, |r| changed.matches(r))?, None);
        assert!(!path.exists());

        store.save(&path, &record())?;
        assert_eq!(
            store.load_valid(&path, |r| target().matches(r))?,
            Some(record())
        );
        Ok(())
    }

    #[test]
    fn test_identity_checks() {
        let t = target();
        assert!(t.matches(&record()));

        let mut r = record();
        r.mtime = "Thu, 22 Oct 2015 07:28:00 GMT".to_string();
        assert!(!t.matches(&r));

        let mut r = record();
        r.file_size += 1;
        assert!(!t.matches(&r));

        // A part whose bytes disagree with the plan can't be trusted.
        let mut r = record();
        r.parts[0].start += 1;
        assert!(!t.matches(&r));

        let mut r = record();
        r.parts.push(r.parts[0].clone());
        assert!(!t.matches(&r));
    }
}
