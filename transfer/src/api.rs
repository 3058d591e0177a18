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

use crate::plan::ByteRange;
use crate::Result;
use bytes::Bytes;
use coskit_core::Body;
use http::HeaderMap;
use std::fmt::Debug;

/// Response of `HEAD` on an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Content-Length.
    pub size: u64,
    /// ETag as sent, quotes included.
    pub etag: String,
    /// Last-Modified as sent.
    pub last_modified: String,
    /// `x-cos-hash-crc64ecma`, when the service computed one.
    pub crc64: Option<u64>,
    /// All response headers, for callers that want `x-cos-meta-*`.
    pub headers: HeaderMap,
}

/// Response of `GET` on an object or a range of it.
#[derive(Debug)]
pub struct GetObjectOutput {
    /// Content-Length of this response.
    pub content_length: Option<u64>,
    /// `x-cos-hash-crc64ecma` of the whole object.
    pub crc64: Option<u64>,
    /// The body, pulled chunk by chunk.
    pub body: Body,
}

/// A part known to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// Part number, starting at 1.
    pub part_number: u32,
    /// ETag of the part.
    pub etag: String,
}

/// The object operations transfers are built on.
///
/// `headers` are added to the request as is; callers put `Content-MD5`,
/// `x-cos-traffic-limit` and object options there.
#[async_trait::async_trait]
pub trait ObjectApi: Debug + Send + Sync + 'static {
    /// Fetch size and identity of an object.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta>;

    /// Fetch an object, or the given range of it.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        headers: &HeaderMap,
    ) -> Result<GetObjectOutput>;

    /// Create or replace an object in one request, returns its ETag.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<String>;

    /// Start a multipart upload, returns the upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &HeaderMap,
    ) -> Result<String>;

    /// Upload one part, returns its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<String>;

    /// All parts uploaded so far, following pagination.
    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str)
        -> Result<Vec<UploadedPart>>;

    /// Assemble the object from `parts` in the given order, returns its ETag.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<String>;

    /// Drop a multipart upload and its parts.
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;
}
