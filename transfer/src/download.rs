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

//! Resumable downloads.
//!
//! Parts are written at their own offset into `<dest>.<id>.cos_tmp`, which
//! is renamed over `dest` once every part is in and the file checks out.

use crate::api::{ObjectApi, ObjectMeta};
use crate::checksum::crc64_file;
use crate::client::{absolute_path, TransferClient};
use crate::executor::WorkItem;
use crate::plan::{PartDescriptor, PartPlan};
use crate::record::{PartRecord, ProgressRecord, RecordStore, TransferTarget};
use crate::{DownloadOptions, Error, ProgressCallback, Result};
use log::{debug, info, warn};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

const TMP_SUFFIX: &str = "cos_tmp";

impl<A: ObjectApi> TransferClient<A> {
    /// Download `bucket/key` to `dest`, resuming an earlier attempt if its
    /// record still matches the object.
    ///
    /// A resumed download keeps the part size it was started with.
    /// `progress` gets the length of every part done, starting with the
    /// parts an earlier attempt already finished.
    pub async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        dest: impl AsRef<Path>,
        opts: &DownloadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        opts.validate()?;
        let dest = absolute_path(dest.as_ref())?;
        let meta = self.api.head_object(bucket, key).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::setup(format!("failed to create {}", parent.display())).with_source(e)
            })?;
        }

        let record_path = self.records.download_path(bucket, key, &dest);
        let target = TransferTarget {
            bucket: bucket.to_string(),
            key: key.to_string(),
            local_path: dest.clone(),
            size: meta.size,
            etag: meta.etag.clone(),
            mtime: meta.last_modified.clone(),
        };

        let (record, tmp) = match self.resumable_download(&record_path, &target).await? {
            Some(record) => {
                let tmp = PathBuf::from(record.tmp_filename.clone().unwrap_or_default());
                info!(
                    "resuming download of {bucket}/{key}, {} of {} parts done",
                    record.parts.len(),
                    record.plan()?.len()
                );
                (record, tmp)
            }
            None => {
                let plan = PartPlan::new(
                    meta.size,
                    opts.part_size_mib.unwrap_or(self.config.part_size_mib),
                    self.config.max_part_count,
                )?;
                if plan.is_single() {
                    return self
                        .download_whole(bucket, key, &dest, &meta, opts, progress)
                        .await;
                }

                let tmp = tmp_path(&dest);
                create_sized(&tmp, meta.size).await?;
                let mut record = target.new_record(plan.part_size());
                record.tmp_filename = Some(tmp.to_string_lossy().into_owned());
                self.records.save_or_warn(&record_path, &record).await;
                debug!("downloading {bucket}/{key} in {} parts", plan.len());
                (record, tmp)
            }
        };

        // The recorded part size wins over the one asked for now.
        let plan = record.plan()?;
        let missing = plan.missing(&record.completed());
        if let Some(cb) = &progress {
            record.parts.iter().for_each(|p| cb(p.length));
        }

        let part = Arc::new(DownloadPart {
            api: self.api.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            tmp: tmp.clone(),
            read_timeout: self.config.read_timeout,
            record: Mutex::new(record),
            records: self.records.clone(),
            record_path: record_path.clone(),
            progress,
        });
        self.run_parts(
            missing,
            opts.max_threads.unwrap_or(self.config.max_threads),
            opts.traffic_limit,
            move |item| {
                let part = part.clone();
                async move { part.run(item).await }
            },
        )
        .await?;

        finalize(&tmp, &dest, &meta, opts.enable_crc).await?;
        if let Err(err) = self.records.delete(&record_path) {
            warn!("{err}");
        }
        info!("downloaded {bucket}/{key} to {}", dest.display());
        Ok(())
    }

    /// The record of an earlier attempt if it still describes `target` and
    /// its temp file is intact. A stale record is removed with its temp file.
    async fn resumable_download(
        &self,
        record_path: &Path,
        target: &TransferTarget,
    ) -> Result<Option<ProgressRecord>> {
        let Some(record) = self.records.load(record_path)? else {
            return Ok(None);
        };
        if target.matches(&record) && tmp_is_usable(&record).await {
            return Ok(Some(record));
        }

        warn!(
            "progress record of {}/{} is stale, restarting download",
            target.bucket, target.key
        );
        if let Some(tmp) = &record.tmp_filename {
            let _ = tokio::fs::remove_file(tmp).await;
        }
        self.records.delete(record_path)?;
        Ok(None)
    }

    /// One GET for objects that fit in a single part.
    async fn download_whole(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        meta: &ObjectMeta,
        opts: &DownloadOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let tmp = tmp_path(dest);
        let headers = WorkItem::new(PartDescriptor {
            number: 1,
            offset: 0,
            length: meta.size,
        })
        .with_traffic_limit(opts.traffic_limit)
        .request_headers();

        let result = async {
            let out = self.api.get_object(bucket, key, None, &headers).await?;
            let mut file = File::create(&tmp).await.map_err(|e| {
                Error::setup(format!("failed to create {}", tmp.display())).with_source(e)
            })?;
            let written =
                write_body(&mut file, out.body, meta.size, self.config.read_timeout).await?;
            if written != meta.size {
                return Err(Error::transient(format!(
                    "object body ended after {written} of {} bytes",
                    meta.size
                )));
            }
            file.sync_all().await?;
            drop(file);
            finalize(&tmp, dest, meta, opts.enable_crc).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
            return result;
        }
        if let Some(cb) = &progress {
            cb(meta.size);
        }
        info!("downloaded {bucket}/{key} to {}", dest.display());
        Ok(())
    }
}

/// What a download worker needs, shared by all of them.
struct DownloadPart<A> {
    api: Arc<A>,
    bucket: String,
    key: String,
    tmp: PathBuf,
    read_timeout: Duration,
    record: Mutex<ProgressRecord>,
    records: RecordStore,
    record_path: PathBuf,
    progress: Option<ProgressCallback>,
}

impl<A: ObjectApi> DownloadPart<A> {
    async fn run(&self, item: WorkItem) -> Result<u64> {
        let part = item.part;
        let out = self
            .api
            .get_object(&self.bucket, &self.key, item.range(), &item.request_headers())
            .await?;

        let mut file = OpenOptions::new().write(true).open(&self.tmp).await?;
        file.seek(SeekFrom::Start(part.offset)).await?;
        let written = write_body(&mut file, out.body, part.length, self.read_timeout).await?;
        if written != part.length {
            return Err(Error::transient(format!(
                "part {} ended after {written} of {} bytes",
                part.number, part.length
            )));
        }
        file.flush().await?;
        drop(file);

        {
            // Held across the save so records land on disk in order.
            let mut record = self.record.lock().await;
            record.parts.push(PartRecord {
                part_id: part.number,
                start: part.offset,
                length: part.length,
                etag: None,
            });
            self.records.save_or_warn(&self.record_path, &record).await;
        }
        debug!("part {} of {}/{} done", part.number, self.bucket, self.key);
        if let Some(cb) = &self.progress {
            cb(part.length);
        }
        Ok(part.length)
    }
}

/// Copy `body` into `file`, refusing to write past `limit` bytes or to wait
/// longer than `read_timeout` for the next chunk.
async fn write_body(
    file: &mut File,
    mut body: coskit_core::Body,
    limit: u64,
    read_timeout: Duration,
) -> Result<u64> {
    let mut written = 0u64;
    loop {
        let chunk = match tokio::time::timeout(read_timeout, body.next()).await {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => break,
            Err(_) => {
                return Err(Error::transient(format!(
                    "no data for {read_timeout:?} after {written} bytes"
                )))
            }
        };
        if written + chunk.len() as u64 > limit {
            return Err(Error::transient(format!(
                "body is longer than the expected {limit} bytes"
            )));
        }
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Check the assembled temp file, then move it over `dest`.
///
/// A CRC mismatch removes the temp file; a later attempt starts over.
async fn finalize(tmp: &Path, dest: &Path, meta: &ObjectMeta, enable_crc: bool) -> Result<()> {
    let size = tokio::fs::metadata(tmp).await?.len();
    if size != meta.size {
        return Err(Error::integrity(format!(
            "assembled file has {size} bytes, object has {}",
            meta.size
        )));
    }

    if enable_crc {
        match meta.crc64 {
            Some(expected) => {
                let actual = crc64_file(tmp).await?;
                if actual != expected {
                    let _ = tokio::fs::remove_file(tmp).await;
                    return Err(Error::integrity(format!(
                        "crc64 of {} is {actual}, object has {expected}",
                        dest.display()
                    )));
                }
            }
            None => warn!("object has no crc64, skipping check of {}", dest.display()),
        }
    }

    tokio::fs::rename(tmp, dest).await.map_err(|e| {
        Error::setup(format!("failed to move download to {}", dest.display())).with_source(e)
    })
}

/// `<dest>.<random>.cos_tmp`, next to `dest` so the final rename stays on one filesystem.
fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(format!(".{}.{TMP_SUFFIX}", uuid::Uuid::new_v4().simple()));
    name.into()
}

/// A resumed download needs its temp file, at full size.
async fn tmp_is_usable(record: &ProgressRecord) -> bool {
    let Some(tmp) = &record.tmp_filename else {
        return false;
    };
    tokio::fs::metadata(tmp)
        .await
        .is_ok_and(|m| m.is_file() && m.len() == record.file_size)
}

async fn create_sized(path: &Path, size: u64) -> Result<()> {
    let setup = |e: std::io::Error| {
        Error::setup(format!("failed to create {}", path.display())).with_source(e)
    };
    let file = File::create(path).await.map_err(setup)?;
    file.set_len(size).await.map_err(setup)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Failure, MemoryObjectApi, Operation};
    use crate::plan::MIB;
    use crate::{ErrorKind, TransferConfig};
    use futures::StreamExt;
    use http::StatusCode;
    use pretty_assertions::assert_eq;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
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
    async fn test_small_object_is_one_get() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let api = MemoryObjectApi::new();
        api.insert_object("b", "small", data(1000));
        let client = client(dir.path(), api.clone())?;

        let dest = dir.path().join("out/small");
        let opts = DownloadOptions {
            enable_crc: true,
            ..Default::default()
        };
        client.download_file("b", "small", &dest, &opts, None).await?;

        assert_eq!(std::fs::read(&dest)?, data(1000));
        assert_eq!(api.count(Operation::GetObject), 1);
        assert!(api.requests().iter().all(|r| r.range.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_object() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let api = MemoryObjectApi::new();
        api.insert_object("b", "empty", Vec::new());
        let client = client(dir.path(), api)?;

        let dest = dir.path().join("empty");
        std::fs::write(&dest, b"old content")?;
        client
            .download_file("b", "empty", &dest, &DownloadOptions::default(), None)
            .await?;
        assert_eq!(std::fs::read(&dest)?, Vec::<u8>::new());
        Ok(())
    }

    #[tokio::test]
    async fn test_multipart_download_cleans_up() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let api = MemoryObjectApi::new();
        let content = data(3 * MIB as usize + 17);
        api.insert_object("b", "k", content.clone());
        let client = client(dir.path(), api.clone())?;

        let dest = dir.path().join("k");
        let opts = DownloadOptions {
            enable_crc: true,
            traffic_limit: Some(819_200),
            ..Default::default()
        };
        client.download_file("b", "k", &dest, &opts, None).await?;

        assert_eq!(std::fs::read(&dest)?, content);
        assert_eq!(api.count(Operation::GetObject), 4);
        assert!(api
            .requests()
            .iter()
            .filter(|r| r.op == Operation::GetObject)
            .all(|r| r.headers.contains_key("x-cos-traffic-limit")));
        assert!(!client.records().download_path("b", "k", &dest).exists());

        // Only the destination is left.
        let names: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .filter(|n| n != "record")
            .collect();
        assert_eq!(names, vec!["k"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_object() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let client = client(dir.path(), MemoryObjectApi::new())?;
        let err = client
            .download_file("b", "nope", dir.path().join("nope"), &DownloadOptions::default(), None)
            .await
            .expect_err("object doesn't exist");
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_crc_mismatch_keeps_destination() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let api = MemoryObjectApi::new();
        api.insert_object("b", "k", data(2 * MIB as usize));
        api.set_crc64("b", "k", 42);
        let client = client(dir.path(), api)?;

        let dest = dir.path().join("k");
        std::fs::write(&dest, b"previous")?;
        let opts = DownloadOptions {
            enable_crc: true,
            ..Default::default()
        };
        let err = client
            .download_file("b", "k", &dest, &opts, None)
            .await
            .expect_err("crc doesn't match");
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!err.is_retryable());
        assert_eq!(std::fs::read(&dest)?, b"previous");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_part_keeps_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let api = MemoryObjectApi::new();
        api.insert_object("b", "k", data(2 * MIB as usize));
        api.inject(
            Failure::status(Operation::GetObject, StatusCode::INTERNAL_SERVER_ERROR)
                .on_range_start(MIB),
        );
        let client = client(dir.path(), api)?;

        let dest = dir.path().join("k");
        let err = client
            .download_file("b", "k", &dest, &DownloadOptions::default(), None)
            .await
            .expect_err("part 2 fails");
        assert_eq!(err.kind(), ErrorKind::PartsFailed);
        assert_eq!(err.failed_parts(), &[2]);
        assert!(err.is_retryable());
        assert!(!dest.exists());

        let record = client
            .records()
            .load(&client.records().download_path("b", "k", &dest))?
            .expect("record must be kept");
        assert_eq!(record.completed().into_iter().collect::<Vec<_>>(), vec![1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_keeps_recorded_part_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let api = MemoryObjectApi::new();
        let content = data(3 * MIB as usize + 9);
        api.insert_object("b", "k", content.clone());
        api.inject(
            Failure::status(Operation::GetObject, StatusCode::SERVICE_UNAVAILABLE)
                .on_range_start(2 * MIB),
        );
        let client = client(dir.path(), api.clone())?;

        let dest = dir.path().join("k");
        client
            .download_file("b", "k", &dest, &DownloadOptions::default(), None)
            .await
            .expect_err("part 3 fails");

        // A part size this large would fetch the object in one request.
        api.clear_failures();
        api.clear_requests();
        let opts = DownloadOptions {
            part_size_mib: Some(64),
            ..Default::default()
        };
        client.download_file("b", "k", &dest, &opts, None).await?;

        assert_eq!(std::fs::read(&dest)?, content);
        let starts: Vec<_> = api
            .requests()
            .iter()
            .filter(|r| r.op == Operation::GetObject)
            .map(|r| r.range.map(|r| r.start))
            .collect();
        assert_eq!(starts, vec![Some(2 * MIB)]);
        assert!(!client.records().download_path("b", "k", &dest).exists());
        let names: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .filter(|n| n != "record")
            .collect();
        assert_eq!(names, vec!["k"]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_body_times_out() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut file = File::create(dir.path().join("out")).await?;
        let stream = futures::stream::iter(vec![Ok::<_, coskit_core::Error>(bytes::Bytes::from_static(b"abc"))])
            .chain(futures::stream::pending());
        let err = write_body(
            &mut file,
            coskit_core::Body::from_stream(stream),
            10,
            Duration::from_secs(30),
        )
        .await
        .expect_err("body never finishes");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.message().contains("after 3 bytes"));
        Ok(())
    }

    #[test]
    fn test_tmp_path_is_a_sibling() {
        let tmp = tmp_path(Path::new("/data/a.bin"));
        assert_eq!(tmp.parent(), Some(Path::new("/data")));
        let name = tmp.to_string_lossy();
        assert!(name.starts_with("/data/a.bin."));
        assert!(name.ends_with(".cos_tmp"));
        assert_ne!(tmp, tmp_path(Path::new("/data/a.bin")));
    }
}
