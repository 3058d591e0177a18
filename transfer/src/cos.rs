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

//! [`ObjectApi`] over the COS XML API.
//!
//! - [Object APIs](https://cloud.tencent.com/document/product/436/7749)
//! - [Multipart upload APIs](https://cloud.tencent.com/document/product/436/7746)

use crate::api::{GetObjectOutput, ObjectApi, ObjectMeta, UploadedPart};
use crate::checksum::parse_crc64;
use crate::plan::ByteRange;
use crate::transport::{error_from_parts, Transport};
use crate::{Error, Result, TransferConfig};
use async_trait::async_trait;
use bytes::Bytes;
use coskit_tencent_cos::TENCENT_URI_ENCODE_SET;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED, RANGE};
use http::{HeaderMap, Method, Request, StatusCode};
use log::debug;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

pub(crate) const X_COS_HASH_CRC64ECMA: &str = "x-cos-hash-crc64ecma";

/// Object keys keep their `/` separators.
static KEY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Talks to `{bucket}.cos.{region}.myqcloud.com` through a [`Transport`].
#[derive(Debug, Clone)]
pub struct CosObjectApi {
    transport: Transport,
    scheme: String,
    endpoint: String,
}

impl CosObjectApi {
    /// Create the api for the region and endpoint in `config`.
    pub fn new(transport: Transport, config: &TransferConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = match &config.endpoint {
            Some(v) => v.trim_end_matches('/').to_string(),
            None if !config.region.is_empty() => format!("cos.{}.myqcloud.com", config.region),
            None => return Err(Error::invalid_input("region or endpoint must be set")),
        };
        Ok(Self {
            transport: transport
                .with_retry(config.retry_times, config.retry_min_delay)
                .with_timeout(config.connect_timeout + config.read_timeout),
            scheme: config.scheme.clone(),
            endpoint,
        })
    }

    /// `{scheme}://{bucket}.{endpoint}/{key}?{query}`
    pub fn object_url(&self, bucket: &str, key: &str, query: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}://{bucket}.{}/{}",
            self.scheme,
            self.endpoint,
            utf8_percent_encode(key.trim_start_matches('/'), &KEY_ENCODE_SET)
        );
        for (i, (k, v)) in query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(k);
            if !v.is_empty() {
                url.push('=');
                url.extend(utf8_percent_encode(v, &TENCENT_URI_ENCODE_SET));
            }
        }
        url
    }

    fn request(
        &self,
        method: Method,
        url: String,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Request<Bytes>> {
        let content_length = (method == Method::PUT || method == Method::POST).then(|| body.len());
        let mut req = Request::builder().method(method).uri(url).body(body)?;
        if let Some(len) = content_length {
            req.headers_mut().insert(CONTENT_LENGTH, len.into());
        }
        req.headers_mut().extend(headers.clone());
        Ok(req)
    }

    /// Read a whole XML body, turning an `<Error>` document into an error
    /// even when the status says success.
    async fn read_xml<T: for<'de> Deserialize<'de>>(&self, req: Request<Bytes>) -> Result<T> {
        let resp = self.transport.send(req).await?;
        let (parts, body) = resp.into_parts();
        let body = body.bytes().await?;
        let text = String::from_utf8_lossy(&body);
        debug!("got xml response: {text}");

        if text.contains("<Error>") {
            return Err(error_from_parts(parts.status, &parts.headers, &body));
        }
        Ok(quick_xml::de::from_str(&text)?)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn etag_of(headers: &HeaderMap) -> Result<String> {
    header_str(headers, ETAG.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::unexpected("response has no ETag"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPartsResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_part_number_marker: Option<u32>,
    #[serde(default)]
    part: Vec<ListedPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedPart {
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    parts: Vec<CompletePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CompletePart {
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag")]
    etag: String,
}

#[async_trait]
impl ObjectApi for CosObjectApi {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let req = self.request(
            Method::HEAD,
            self.object_url(bucket, key, &[]),
            &HeaderMap::new(),
            Bytes::new(),
        )?;
        let resp = self.transport.send(req).await?;
        let headers = resp.headers().clone();

        Ok(ObjectMeta {
            size: header_str(&headers, CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::unexpected("HEAD response has no Content-Length"))?,
            etag: etag_of(&headers)?,
            last_modified: header_str(&headers, LAST_MODIFIED.as_str())
                .unwrap_or_default()
                .to_string(),
            crc64: header_str(&headers, X_COS_HASH_CRC64ECMA).and_then(parse_crc64),
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
        let mut req = self.request(
            Method::GET,
            self.object_url(bucket, key, &[]),
            headers,
            Bytes::new(),
        )?;
        if let Some(range) = range {
            req.headers_mut().insert(RANGE, range.to_string().parse()?);
        }

        let resp = self.transport.send(req).await?;
        let (parts, body) = resp.into_parts();
        if range.is_some() && parts.status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::unexpected(format!(
                "range request answered with {}",
                parts.status
            )));
        }

        Ok(GetObjectOutput {
            content_length: header_str(&parts.headers, CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok()),
            crc64: header_str(&parts.headers, X_COS_HASH_CRC64ECMA).and_then(parse_crc64),
            body,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<String> {
        let req = self.request(Method::PUT, self.object_url(bucket, key, &[]), headers, body)?;
        let resp = self.transport.send(req).await?;
        etag_of(resp.headers())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &HeaderMap,
    ) -> Result<String> {
        let req = self.request(
            Method::POST,
            self.object_url(bucket, key, &[("uploads", "")]),
            headers,
            Bytes::new(),
        )?;
        let result: InitiateMultipartUploadResult = self.read_xml(req).await?;
        Ok(result.upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<String> {
        let part_number = part_number.to_string();
        let url = self.object_url(
            bucket,
            key,
            &[("partNumber", &part_number), ("uploadId", upload_id)],
        );
        let req = self.request(Method::PUT, url, headers, body)?;
        let resp = self.transport.send(req).await?;
        etag_of(resp.headers())
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<UploadedPart>> {
        let mut parts = Vec::new();
        let mut marker = String::new();
        loop {
            let mut query = vec![("uploadId", upload_id)];
            if !marker.is_empty() {
                query.push(("part-number-marker", &marker));
            }
            let req = self.request(
                Method::GET,
                self.object_url(bucket, key, &query),
                &HeaderMap::new(),
                Bytes::new(),
            )?;
            let page: ListPartsResult = self.read_xml(req).await?;

            parts.extend(page.part.into_iter().map(|p| UploadedPart {
                part_number: p.part_number,
                etag: p.etag,
            }));
            match (page.is_truncated, page.next_part_number_marker) {
                (true, Some(next)) => marker = next.to_string(),
                _ => break,
            }
        }
        Ok(parts)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<String> {
        let body = quick_xml::se::to_string(&CompleteMultipartUpload {
            parts: parts
                .iter()
                .map(|p| CompletePart {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
        })?;
        debug!("complete multipart upload body: {body}");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/xml".parse()?);
        let req = self.request(
            Method::POST,
            self.object_url(bucket, key, &[("uploadId", upload_id)]),
            &headers,
            Bytes::from(body),
        )?;
        let result: CompleteMultipartUploadResult = self.read_xml(req).await?;
        Ok(result.etag)
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        let req = self.request(
            Method::DELETE,
            self.object_url(bucket, key, &[("uploadId", upload_id)]),
            &HeaderMap::new(),
            Bytes::new(),
        )?;
        self.transport.send(req).await?;
        Ok(())
    }
}
