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

//! Resumable uploads.
//!
//! Files that fit in one part are sent with a single `PUT`. Larger files
//! go through a multipart upload whose id and part ETags are recorded, so
//! a later call picks up where an interrupted one stopped.

use crate::api::{ObjectApi, UploadedPart};
use crate::checksum::{content_md5, hex_md5};
use crate::client::{absolute_path, TransferClient};
use crate::config::{CONTENT_MD5, X_COS_TRAFFIC_LIMIT};
use crate::executor::WorkItem;
use crate::plan::PartPlan;
use crate::record::{PartRecord, ProgressRecord, RecordStore, TransferTarget};
use crate::{Error, ProgressCallback, Result, UploadOptions};
use bytes::Bytes;
use coskit_core::utils::unquote_etag;
use http::{HeaderMap, HeaderValue};
use log::{debug, info, warn};
use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutput {
    /// ETag of the created object, quotes included.
    pub etag: String,
}

impl<A: ObjectApi> TransferClient<A> {
    /// Upload the file at `path` to `bucket/key`, resuming an earlier
    /// multipart upload if its record still matches the file.
    ///
    /// A resumed upload keeps the part size it was started with.
    /// `progress` gets the length of every part done, starting with the
    /// parts an earlier attempt already finished.
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: impl AsRef<Path>,
        opts: &UploadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutput> {
        opts.object.validate()?;
        let path = absolute_path(path.as_ref())?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            Error::invalid_input(format!("failed to stat {}", path.display())).with_source(e)
        })?;
        if !meta.is_file() {
            return Err(Error::invalid_input(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let size = meta.len();
        let record_path = self.records.upload_path(bucket, key, &path);
        let target = TransferTarget {
            bucket: bucket.to_string(),
            key: key.to_string(),
            local_path: path.clone(),
            size,
            etag: String::new(),
            mtime: mtime_of(&meta),
        };
        let existing = match self.resumable_upload(&record_path, &target).await? {
            Some(record) => self.reconcile(record, &record_path).await?,
            None => None,
        };

        let record = match existing {
            Some(record) => {
                info!(
                    "resuming upload of {bucket}/{key}, {} of {} parts done",
                    record.parts.len(),
                    record.plan()?.len()
                );
                record
            }
            None => {
                let plan = PartPlan::new(
                    size,
                    opts.part_size_mib.unwrap_or(self.config.part_size_mib),
                    self.config.max_part_count,
                )?;
                if plan.is_single() {
                    return self.upload_whole(bucket, key, &path, opts, progress).await;
                }

                let mut headers = opts.object.headers()?;
                headers.remove(X_COS_TRAFFIC_LIMIT);
                let upload_id = self
                    .api
                    .create_multipart_upload(bucket, key, &headers)
                    .await?;
                let mut record = target.new_record(plan.part_size());
                record.upload_id = Some(upload_id);
                self.records.save_or_warn(&record_path, &record).await;
                debug!("uploading {bucket}/{key} in {} parts", plan.len());
                record
            }
        };

        let upload_id = record.upload_id.clone().unwrap_or_default();
        let plan = record.plan()?;
        let missing = plan.missing(&record.completed());
        if let Some(cb) = &progress {
            record.parts.iter().for_each(|p| cb(p.length));
        }

        let part = Arc::new(UploadPart {
            api: self.api.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            path: path.clone(),
            enable_md5: opts.enable_md5,
            record: Mutex::new(record),
            records: self.records.clone(),
            record_path: record_path.clone(),
            progress,
        });
        self.run_parts(
            missing,
            opts.max_threads.unwrap_or(self.config.max_threads),
            opts.object.traffic_limit,
            {
                let part = part.clone();
                move |item| {
                    let part = part.clone();
                    async move { part.run(item).await }
                }
            },
        )
        .await?;

        let parts = part.completed_parts().await;
        let etag = self
            .api
            .complete_multipart_upload(bucket, key, &upload_id, &parts)
            .await?;
        if let Err(err) = self.records.delete(&record_path) {
            warn!("{err}");
        }
        info!("uploaded {} to {bucket}/{key}", path.display());
        Ok(UploadOutput { etag })
    }

    /// Abort the multipart upload recorded for `path` and drop its record.
    ///
    /// Returns whether there was one.
    pub async fn abort_upload(&self, bucket: &str, key: &str, path: impl AsRef<Path>) -> Result<bool> {
        let path = absolute_path(path.as_ref())?;
        let record_path = self.records.upload_path(bucket, key, &path);
        let Some(upload_id) = self.records.load(&record_path)?.and_then(|r| r.upload_id) else {
            return Ok(false);
        };

        match self.api.abort_multipart_upload(bucket, key, &upload_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => debug!("upload {upload_id} is already gone"),
            Err(err) => return Err(err),
        }
        self.records.delete(&record_path)?;
        Ok(true)
    }

    /// The record of an earlier attempt if it still describes `target`.
    /// A stale record is removed and its multipart upload aborted.
    async fn resumable_upload(
        &self,
        record_path: &Path,
        target: &TransferTarget,
    ) -> Result<Option<ProgressRecord>> {
        let Some(record) = self.records.load(record_path)? else {
            return Ok(None);
        };
        if target.matches(&record) && record.upload_id.is_some() {
            return Ok(Some(record));
        }

        warn!(
            "progress record of {}/{} is stale, restarting upload",
            target.bucket, target.key
        );
        if let Some(upload_id) = &record.upload_id {
            if let Err(err) = self
                .api
                .abort_multipart_upload(&record.bucket, &record.key, upload_id)
                .await
            {
                warn!("failed to abort stale upload {upload_id}: {err}");
            }
        }
        self.records.delete(record_path)?;
        Ok(None)
    }

    /// One `PUT` for files that fit in a single part.
    async fn upload_whole(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        opts: &UploadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutput> {
        let data = Bytes::from(tokio::fs::read(path).await?);
        let mut headers = opts.object.headers()?;
        if opts.enable_md5 {
            headers.insert(CONTENT_MD5, HeaderValue::from_str(&content_md5(&data))?);
        }

        let etag = self.api.put_object(bucket, key, data.clone(), &headers).await?;
        if opts.enable_md5 {
            check_etag(&etag, &data)?;
        }
        if let Some(cb) = &progress {
            cb(data.len() as u64);
        }
        info!("uploaded {} to {bucket}/{key}", path.display());
        Ok(UploadOutput { etag })
    }

    /// Keep only the recorded parts the service still has with the same
    /// ETag. `None` if the upload itself is gone.
    async fn reconcile(
        &self,
        mut record: ProgressRecord,
        record_path: &Path,
    ) -> Result<Option<ProgressRecord>> {
        let upload_id = record.upload_id.clone().unwrap_or_default();
        let listed = match self
            .api
            .list_parts(&record.bucket, &record.key, &upload_id)
            .await
        {
            Ok(v) => v,
            Err(err) if err.is_not_found() => {
                warn!("upload {upload_id} no longer exists, restarting upload");
                self.records.delete(record_path)?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let before = record.parts.len();
        record.parts.retain(|p| {
            listed
                .iter()
                .any(|l| l.part_number == p.part_id && Some(&l.etag) == p.etag.as_ref())
        });
        if record.parts.len() != before {
            warn!(
                "{} recorded parts of upload {upload_id} are not on the service, uploading them again",
                before - record.parts.len()
            );
            self.records.save_or_warn(record_path, &record).await;
        }
        Ok(Some(record))
    }
}

/// What an upload worker needs, shared by all of them.
struct UploadPart<A> {
    api: Arc<A>,
    bucket: String,
    key: String,
    upload_id: String,
    path: PathBuf,
    enable_md5: bool,
    record: Mutex<ProgressRecord>,
    records: RecordStore,
    record_path: PathBuf,
    progress: Option<ProgressCallback>,
}

impl<A: ObjectApi> UploadPart<A> {
    async fn run(&self, item: WorkItem) -> Result<String> {
        let part = item.part;
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(part.offset)).await?;
        let mut buf = vec![0; part.length as usize];
        file.read_exact(&mut buf).await?;
        drop(file);
        let data = Bytes::from(buf);

        let mut headers: HeaderMap = item.request_headers();
        if self.enable_md5 {
            headers.insert(CONTENT_MD5, HeaderValue::from_str(&content_md5(&data))?);
        }
        let etag = self
            .api
            .upload_part(
                &self.bucket,
                &self.key,
                &self.upload_id,
                part.number,
                data.clone(),
                &headers,
            )
            .await?;
        if self.enable_md5 {
            check_etag(&etag, &data)?;
        }

        {
            // Held across the save so records land on disk in order.
            let mut record = self.record.lock().await;
            record.parts.push(PartRecord {
                part_id: part.number,
                start: part.offset,
                length: part.length,
                etag: Some(etag.clone()),
            });
            self.records.save_or_warn(&self.record_path, &record).await;
        }
        debug!("part {} of {}/{} done", part.number, self.bucket, self.key);
        if let Some(cb) = &self.progress {
            cb(part.length);
        }
        Ok(etag)
    }

    /// Every recorded part in ascending order, the order complete needs.
    async fn completed_parts(&self) -> Vec<UploadedPart> {
        let record = self.record.lock().await;
        let mut parts: Vec<_> = record
            .parts
            .iter()
            .map(|p| UploadedPart {
                part_number: p.part_id,
                etag: p.etag.clone().unwrap_or_default(),
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }
}

/// Single part ETags are the hex MD5 of the content.
fn check_etag(etag: &str, data: &[u8]) -> Result<()> {
    let expected = hex_md5(data);
    if !unquote_etag(etag).eq_ignore_ascii_case(&expected) {
        return Err(Error::integrity(format!(
            "service returned ETag {etag}, content md5 is {expected}"
        )));
    }
    Ok(())
}

/// `<secs>.<nanos>` since the epoch, compared as a string only.
fn mtime_of(meta: &Metadata) -> String {
    let since = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .unwrap_or_default();
    format!("{}.{:09}", since.as_secs(), since.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Failure, MemoryObjectApi, Operation};
    use crate::plan::MIB;
    use crate::{ErrorKind, ObjectOptions, TransferConfig};
    use http::StatusCode;
    use pretty_assertions::assert_eq;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    fn client(dir: &Path, api: MemoryObjectApi) -> Result<TransferClient<MemoryObjectApi>> {
        let config = TransferConfig {
            part_retry_passes: 0,
            ..Default::default()
        }
        .with_record_dir(dir.join("record"));
        TransferClient::new(api, config)
    }

    #[tokio::test]
    async fn test_empty_file_is_one_put() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("empty");
        std::fs::write(&src, b"")?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        let opts = UploadOptions {
            enable_md5: true,
            ..Default::default()
        };
        let out = client.upload_file("b", "empty", &src, &opts, None).await?;
        assert_eq!(out.etag, format!("\"{}\"", hex_md5(b"")));
        assert_eq!(api.count(Operation::PutObject), 1);
        assert_eq!(api.count(Operation::CreateMultipartUpload), 0);
        assert_eq!(api.object("b", "empty"), Some(Bytes::new()));
        Ok(())
    }

    #[tokio::test]
    async fn test_object_options_are_sent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"hello")?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        let opts = UploadOptions {
            object: ObjectOptions::default()
                .with_content_type("text/plain")
                .with_metadata("owner", "alice"),
            ..Default::default()
        };
        client.upload_file("b", "a.txt", &src, &opts, None).await?;

        let requests = api.requests();
        let put = &requests[0];
        assert_eq!(put.headers.get("content-type").and_then(|v| v.to_str().ok()), Some("text/plain"));
        assert_eq!(put.headers.get("x-cos-meta-owner").and_then(|v| v.to_str().ok()), Some("alice"));
        Ok(())
    }

    #[tokio::test]
    async fn test_multipart_upload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("big");
        let content = data(3 * MIB as usize + 1);
        std::fs::write(&src, &content)?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        let opts = UploadOptions {
            enable_md5: true,
            object: ObjectOptions::default().with_traffic_limit(819_200),
            ..Default::default()
        };
        let out = client.upload_file("b", "big", &src, &opts, None).await?;

        assert!(out.etag.ends_with("-4\""));
        assert_eq!(api.object("b", "big"), Some(Bytes::from(content)));
        assert_eq!(api.count(Operation::UploadPart), 4);
        assert_eq!(api.pending_uploads(), 0);
        assert!(!client.records().upload_path("b", "big", &src).exists());

        for req in api.requests() {
            match req.op {
                Operation::UploadPart => {
                    assert!(req.headers.contains_key(CONTENT_MD5));
                    assert!(req.headers.contains_key(X_COS_TRAFFIC_LIMIT));
                }
                Operation::CreateMultipartUpload => {
                    assert!(!req.headers.contains_key(X_COS_TRAFFIC_LIMIT))
                }
                _ => {}
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_skips_listed_parts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("big");
        let content = data(4 * MIB as usize);
        std::fs::write(&src, &content)?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        api.inject(Failure::status(Operation::UploadPart, StatusCode::SERVICE_UNAVAILABLE).on_part(3));
        let err = client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await
            .expect_err("part 3 fails");
        assert_eq!(err.kind(), ErrorKind::PartsFailed);
        assert_eq!(err.failed_parts(), &[3]);
        assert_eq!(api.pending_uploads(), 1);

        api.clear_failures();
        api.clear_requests();
        client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await?;

        assert_eq!(api.count(Operation::CreateMultipartUpload), 0);
        assert_eq!(api.count(Operation::ListParts), 1);
        let uploaded: Vec<_> = api
            .requests()
            .iter()
            .filter_map(|r| r.part_number)
            .collect();
        assert_eq!(uploaded, vec![3]);
        assert_eq!(api.object("b", "big"), Some(Bytes::from(content)));
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_keeps_recorded_part_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("big");
        let content = data(4 * MIB as usize);
        std::fs::write(&src, &content)?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        api.inject(Failure::status(Operation::UploadPart, StatusCode::SERVICE_UNAVAILABLE).on_part(3));
        assert!(client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await
            .is_err());

        // A part size this large would send the file in one PUT.
        api.clear_failures();
        api.clear_requests();
        let opts = UploadOptions {
            part_size_mib: Some(64),
            ..Default::default()
        };
        client.upload_file("b", "big", &src, &opts, None).await?;

        assert_eq!(api.count(Operation::PutObject), 0);
        assert_eq!(api.count(Operation::CreateMultipartUpload), 0);
        let uploaded: Vec<_> = api
            .requests()
            .iter()
            .filter_map(|r| r.part_number)
            .collect();
        assert_eq!(uploaded, vec![3]);
        assert_eq!(api.object("b", "big"), Some(Bytes::from(content)));
        assert_eq!(api.pending_uploads(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_file_aborts_stale_upload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("big");
        std::fs::write(&src, data(2 * MIB as usize))?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        api.inject(Failure::status(Operation::UploadPart, StatusCode::SERVICE_UNAVAILABLE).on_part(2));
        assert!(client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await
            .is_err());
        assert_eq!(api.pending_uploads(), 1);

        let content = data(2 * MIB as usize + 1);
        std::fs::write(&src, &content)?;
        api.clear_failures();
        api.clear_requests();
        client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await?;

        assert_eq!(api.count(Operation::AbortMultipartUpload), 1);
        assert_eq!(api.count(Operation::CreateMultipartUpload), 1);
        assert_eq!(api.pending_uploads(), 0);
        assert_eq!(api.object("b", "big"), Some(Bytes::from(content)));
        Ok(())
    }

    #[tokio::test]
    async fn test_vanished_upload_restarts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("big");
        std::fs::write(&src, data(2 * MIB as usize))?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        api.inject(Failure::status(Operation::UploadPart, StatusCode::SERVICE_UNAVAILABLE).on_part(2));
        assert!(client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await
            .is_err());

        // Someone aborted the upload behind our back.
        let record = client
            .records()
            .load(&client.records().upload_path("b", "big", &src))?
            .expect("record must be kept");
        api.abort_multipart_upload("b", "big", record.upload_id.as_deref().unwrap_or_default())
            .await?;

        api.clear_failures();
        api.clear_requests();
        client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await?;
        assert_eq!(api.count(Operation::CreateMultipartUpload), 1);
        assert_eq!(api.count(Operation::UploadPart), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_abort_upload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("big");
        std::fs::write(&src, data(2 * MIB as usize))?;
        let api = MemoryObjectApi::new();
        let client = client(dir.path(), api.clone())?;

        api.inject(Failure::network(Operation::UploadPart).on_part(1));
        assert!(client
            .upload_file("b", "big", &src, &UploadOptions::default(), None)
            .await
            .is_err());
        assert_eq!(api.pending_uploads(), 1);

        assert!(client.abort_upload("b", "big", &src).await?);
        assert_eq!(api.pending_uploads(), 0);
        assert!(!client.abort_upload("b", "big", &src).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let client = client(dir.path(), MemoryObjectApi::new())?;
        let err = client
            .upload_file("b", "k", dir.path().join("nope"), &UploadOptions::default(), None)
            .await
            .expect_err("file doesn't exist");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        Ok(())
    }

    #[test]
    fn test_check_etag() {
        assert!(check_etag(&format!("\"{}\"", hex_md5(b"abc")), b"abc").is_ok());
        assert!(check_etag(&hex_md5(b"abc").to_uppercase(), b"abc").is_ok());
        let err = check_etag("\"0000\"", b"abc").expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}
