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

//! An in-memory [`ObjectApi`].
//!
//! It behaves like COS for the operations transfers use: quoted MD5 ETags,
//! `x-cos-hash-crc64ecma`, `Content-MD5` checks, multipart assembly. Every
//! request is logged, and failures can be injected per operation, part
//! number or range start.

use crate::api::{GetObjectOutput, ObjectApi, ObjectMeta, UploadedPart};
use crate::checksum::{content_md5, crc64, hex_md5};
use crate::config::CONTENT_MD5;
use crate::cos::X_COS_HASH_CRC64ECMA;
use crate::plan::ByteRange;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use coskit_core::time::{format_http_date, DateTime};
use coskit_core::Body;
use http::header::{CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use http::{HeaderMap, StatusCode};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operations of [`ObjectApi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `head_object`
    HeadObject,
    /// `get_object`
    GetObject,
    /// `put_object`
    PutObject,
    /// `create_multipart_upload`
    CreateMultipartUpload,
    /// `upload_part`
    UploadPart,
    /// `list_parts`
    ListParts,
    /// `complete_multipart_upload`
    CompleteMultipartUpload,
    /// `abort_multipart_upload`
    AbortMultipartUpload,
}

/// One request as received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Operation called.
    pub op: Operation,
    /// Object key.
    pub key: String,
    /// Requested range, `get_object` only.
    pub range: Option<ByteRange>,
    /// Part number, `upload_part` only.
    pub part_number: Option<u32>,
    /// Headers passed by the caller.
    pub headers: HeaderMap,
}

/// A failure to inject into matching requests.
#[derive(Debug, Clone)]
pub struct Failure {
    op: Operation,
    part_number: Option<u32>,
    range_start: Option<u64>,
    status: Option<StatusCode>,
    remaining: Option<usize>,
}

impl Failure {
    /// Answer `op` with `status`.
    pub fn status(op: Operation, status: StatusCode) -> Self {
        Self {
            op,
            part_number: None,
            range_start: None,
            status: Some(status),
            remaining: None,
        }
    }

    /// Fail `op` as if the connection was reset.
    pub fn network(op: Operation) -> Self {
        Self {
            status: None,
            ..Self::status(op, StatusCode::OK)
        }
    }

    /// Only match `upload_part` for this part.
    pub fn on_part(mut self, part_number: u32) -> Self {
        self.part_number = Some(part_number);
        self
    }

    /// Only match `get_object` ranges starting at `offset`.
    pub fn on_range_start(mut self, offset: u64) -> Self {
        self.range_start = Some(offset);
        self
    }

    /// Stop matching after `n` hits; unlimited by default.
    pub fn times(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    fn matches(&self, req: &RecordedRequest) -> bool {
        self.op == req.op
            && self.remaining != Some(0)
            && self.part_number.map_or(true, |n| req.part_number == Some(n))
            && self
                .range_start
                .map_or(true, |s| req.range.map(|r| r.start) == Some(s))
    }

    fn to_error(&self) -> Error {
        match self.status {
            Some(status) => Error::service(status, "injected failure").with_code("InjectedFailure"),
            None => Error::transient("injected connection reset"),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: String,
    crc64: u64,
}

#[derive(Debug)]
struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, Upload>,
    failures: Vec<Failure>,
    requests: Vec<RecordedRequest>,
    version: i64,
    next_upload_id: u64,
}

impl State {
    fn store(&mut self, bucket: &str, key: &str, data: Bytes, etag: String) -> String {
        self.version += 1;
        let last_modified = DateTime::from_timestamp(1_700_000_000 + self.version, 0)
            .map(format_http_date)
            .unwrap_or_default();
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                crc64: crc64(&data),
                data,
                etag: etag.clone(),
                last_modified,
            },
        );
        etag
    }

    fn object(&self, bucket: &str, key: &str) -> Result<&StoredObject> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| {
                Error::service(StatusCode::NOT_FOUND, "The specified key does not exist.")
                    .with_code("NoSuchKey")
            })
    }

    fn upload(&mut self, upload_id: &str) -> Result<&mut Upload> {
        self.uploads.get_mut(upload_id).ok_or_else(|| {
            Error::service(StatusCode::NOT_FOUND, "The specified upload does not exist.")
                .with_code("NoSuchUpload")
        })
    }
}

/// An in-memory object store.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectApi {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl MemoryObjectApi {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request, so concurrent parts overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Put an object directly, returns its ETag.
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> String {
        let data = data.into();
        let etag = format!("\"{}\"", hex_md5(&data));
        self.state
            .lock()
            .expect("lock poisoned")
            .store(bucket, key, data, etag)
    }

    /// Content of an object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().expect("lock poisoned");
        state.object(bucket, key).ok().map(|o| o.data.clone())
    }

    /// Overwrite the CRC64 reported for an object.
    pub fn set_crc64(&self, bucket: &str, key: &str, value: u64) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(o) = state.objects.get_mut(&(bucket.to_string(), key.to_string())) {
            o.crc64 = value;
        }
    }

    /// Inject a failure.
    pub fn inject(&self, failure: Failure) {
        self.state
            .lock()
            .expect("lock poisoned")
            .failures
            .push(failure);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().expect("lock poisoned").failures.clear();
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().expect("lock poisoned").requests.clone()
    }

    /// Number of requests received for `op`.
    pub fn count(&self, op: Operation) -> usize {
        self.state
            .lock()
            .expect("lock poisoned")
            .requests
            .iter()
            .filter(|r| r.op == op)
            .count()
    }

    /// Forget the request log.
    pub fn clear_requests(&self) {
        self.state.lock().expect("lock poisoned").requests.clear();
    }

    /// Multipart uploads neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().expect("lock poisoned").uploads.len()
    }

    /// Log the request, then fail it if an injected failure matches.
    async fn begin(&self, req: RecordedRequest) -> Result<()> {
        let injected = {
            let mut state = self.state.lock().expect("lock poisoned");
            let injected = state
                .failures
                .iter_mut()
                .find(|f| f.matches(&req))
                .map(|f| {
                    if let Some(n) = f.remaining.as_mut() {
                        *n -= 1;
                    }
                    f.to_error()
                });
            state.requests.push(req);
            injected
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn recorded(op: Operation, key: &str, headers: &HeaderMap) -> RecordedRequest {
    RecordedRequest {
        op,
        key: key.to_string(),
        range: None,
        part_number: None,
        headers: headers.clone(),
    }
}

fn check_md5(headers: &HeaderMap, data: &[u8]) -> Result<()> {
    match headers.get(CONTENT_MD5).and_then(|v| v.to_str().ok()) {
        Some(v) if v != content_md5(data) => Err(Error::service(
            StatusCode::BAD_REQUEST,
            "The Content-MD5 you specified did not match what we received.",
        )
        .with_code("BadDigest")),
        _ => Ok(()),
    }
}

#[async_trait]
impl ObjectApi for MemoryObjectApi {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        self.begin(recorded(Operation::HeadObject, key, &HeaderMap::new()))
            .await?;
        let state = self.state.lock().expect("lock poisoned");
        let object = state.object(bucket, key)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, object.data.len().into());
        headers.insert(ETAG, object.etag.parse()?);
        headers.insert(LAST_MODIFIED, object.last_modified.parse()?);
        headers.insert(X_COS_HASH_CRC64ECMA, object.crc64.into());
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            etag: object.etag.clone(),
            last_modified: object.last_modified.clone(),
            crc64: Some(object.crc64),
            headers,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        headers: &HeaderMap,
    ) -> Result<GetObjectOutput> {
        let mut req = recorded(Operation::GetObject, key, headers);
        req.range = range;
        self.begin(req).await?;

        let state = self.state.lock().expect("lock poisoned");
        let object = state.object(bucket, key)?;
        let data = match range {
            None => object.data.clone(),
            Some(r) if r.end < object.data.len() as u64 => {
                object.data.slice(r.start as usize..=r.end as usize)
            }
            Some(_) => {
                return Err(Error::service(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "The requested range is not satisfiable",
                )
                .with_code("InvalidRange"))
            }
        };

        Ok(GetObjectOutput {
            content_length: Some(data.len() as u64),
            crc64: Some(object.crc64),
            body: Body::from(data),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<String> {
        self.begin(recorded(Operation::PutObject, key, headers))
            .await?;
        check_md5(headers, &body)?;

        let etag = format!("\"{}\"", hex_md5(&body));
        Ok(self
            .state
            .lock()
            .expect("lock poisoned")
            .store(bucket, key, body, etag))
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &HeaderMap,
    ) -> Result<String> {
        self.begin(recorded(Operation::CreateMultipartUpload, key, headers))
            .await?;

        let mut state = self.state.lock().expect("lock poisoned");
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<String> {
        let mut req = recorded(Operation::UploadPart, key, headers);
        req.part_number = Some(part_number);
        self.begin(req).await?;
        check_md5(headers, &body)?;

        let etag = format!("\"{}\"", hex_md5(&body));
        let mut state = self.state.lock().expect("lock poisoned");
        state
            .upload(upload_id)?
            .parts
            .insert(part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn list_parts(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<UploadedPart>> {
        self.begin(recorded(Operation::ListParts, key, &HeaderMap::new()))
            .await?;

        let mut state = self.state.lock().expect("lock poisoned");
        Ok(state
            .upload(upload_id)?
            .parts
            .iter()
            .map(|(n, (_, etag))| UploadedPart {
                part_number: *n,
                etag: etag.clone(),
            })
            .collect())
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<String> {
        self.begin(recorded(
            Operation::CompleteMultipartUpload,
            key,
            &HeaderMap::new(),
        ))
        .await?;

        let mut state = self.state.lock().expect("lock poisoned");
        let upload = state.upload(upload_id)?;
        if parts.is_empty() || parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(Error::service(
                StatusCode::BAD_REQUEST,
                "The list of parts was not in ascending order.",
            )
            .with_code("InvalidPartOrder"));
        }

        let mut data = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((bytes, etag)) if *etag == part.etag => {
                    data.extend_from_slice(bytes);
                    digests.extend_from_slice(&md5::compute(bytes).0);
                }
                _ => {
                    return Err(Error::service(
                        StatusCode::BAD_REQUEST,
                        format!("part {} is missing or its ETag differs", part.part_number),
                    )
                    .with_code("InvalidPart"))
                }
            }
        }

        let (bucket, key) = (upload.bucket.clone(), upload.key.clone());
        let etag = format!("\"{}-{}\"", hex_md5(&digests), parts.len());
        state.uploads.remove(upload_id);
        Ok(state.store(&bucket, &key, data.freeze(), etag))
    }

    async fn abort_multipart_upload(&self, _bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.begin(recorded(
            Operation::AbortMultipartUpload,
            key,
            &HeaderMap::new(),
        ))
        .await?;

        let mut state = self.state.lock().expect("lock poisoned");
        state.upload(upload_id)?;
        state.uploads.remove(upload_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_range_get_and_head() -> Result<()> {
        let api = MemoryObjectApi::new();
        let etag = api.insert_object("b", "k", &b"0123456789"[..]);
        assert_eq!(etag, format!("\"{}\"", hex_md5(b"0123456789")));

        let meta = api.head_object("b", "k").await?;
        assert_eq!(meta.size, 10);
        assert_eq!(meta.crc64, Some(crc64(b"0123456789")));

        let out = api
            .get_object("b", "k", Some(ByteRange { start: 2, end: 4 }), &HeaderMap::new())
            .await?;
        assert_eq!(out.body.bytes().await?, Bytes::from_static(b"234"));

        let err = api
            .get_object("b", "k", Some(ByteRange { start: 8, end: 10 }), &HeaderMap::new())
            .await
            .expect_err("range past the end must fail");
        assert_eq!(err.status(), Some(StatusCode::RANGE_NOT_SATISFIABLE));

        assert!(api.head_object("b", "missing").await.is_err_and(|e| e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn test_multipart_assembly() -> Result<()> {
        let api = MemoryObjectApi::new();
        let id = api.create_multipart_upload("b", "k", &HeaderMap::new()).await?;
        let e2 = api
            .upload_part("b", "k", &id, 2, Bytes::from_static(b"world"), &HeaderMap::new())
            .await?;
        let e1 = api
            .upload_part("b", "k", &id, 1, Bytes::from_static(b"hello "), &HeaderMap::new())
            .await?;

        let listed = api.list_parts("b", "k", &id).await?;
        assert_eq!(listed.len(), 2);

        let out_of_order = [
            UploadedPart { part_number: 2, etag: e2.clone() },
            UploadedPart { part_number: 1, etag: e1.clone() },
        ];
        assert!(api.complete_multipart_upload("b", "k", &id, &out_of_order).await.is_err());

        let parts = [
            UploadedPart { part_number: 1, etag: e1 },
            UploadedPart { part_number: 2, etag: e2 },
        ];
        let etag = api.complete_multipart_upload("b", "k", &id, &parts).await?;
        assert!(etag.ends_with("-2\""));
        assert_eq!(api.object("b", "k"), Some(Bytes::from_static(b"hello world")));
        assert_eq!(api.pending_uploads(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_failures() -> Result<()> {
        let api = MemoryObjectApi::new();
        api.insert_object("b", "k", &b"0123456789"[..]);
        api.inject(
            Failure::status(Operation::GetObject, StatusCode::INTERNAL_SERVER_ERROR)
                .on_range_start(5)
                .times(1),
        );

        let head = HeaderMap::new();
        let first = ByteRange { start: 0, end: 4 };
        let second = ByteRange { start: 5, end: 9 };
        assert!(api.get_object("b", "k", Some(first), &head).await.is_ok());
        let err = api
            .get_object("b", "k", Some(second), &head)
            .await
            .expect_err("injected failure must fire");
        assert!(err.is_retryable());
        assert!(api.get_object("b", "k", Some(second), &head).await.is_ok());
        assert_eq!(api.count(Operation::GetObject), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_content_md5_is_checked() {
        let api = MemoryObjectApi::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_MD5,
            content_md5(b"other").parse().expect("md5 must be a valid header"),
        );
        let err = api
            .put_object("b", "k", Bytes::from_static(b"data"), &headers)
            .await
            .expect_err("digest mismatch must fail");
        assert_eq!(err.code(), Some("BadDigest"));
    }
}
