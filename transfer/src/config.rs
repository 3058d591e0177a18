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

use crate::{Error, Result};
use coskit_core::{Context, OsEnv};
use http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_TYPE, EXPIRES,
};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Env to override the directory progress records are kept in.
pub const COSKIT_RECORD_DIR: &str = "COSKIT_RECORD_DIR";
/// Env to override the service endpoint.
pub const COSKIT_ENDPOINT: &str = "COSKIT_ENDPOINT";

pub(crate) const CONTENT_MD5: &str = "content-md5";
pub(crate) const X_COS_TRAFFIC_LIMIT: &str = "x-cos-traffic-limit";
pub(crate) const X_COS_STORAGE_CLASS: &str = "x-cos-storage-class";
pub(crate) const X_COS_ACL: &str = "x-cos-acl";
pub(crate) const X_COS_SSE: &str = "x-cos-server-side-encryption";
pub(crate) const X_COS_META_PREFIX: &str = "x-cos-meta-";

/// Connect timeout used when the config doesn't set one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Read timeout used when the config doesn't set one.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Lowest accepted bandwidth limit, in bit/s (100 KiB/s).
pub const MIN_TRAFFIC_LIMIT: u64 = 819_200;
/// Highest accepted bandwidth limit, in bit/s (100 MiB/s).
pub const MAX_TRAFFIC_LIMIT: u64 = 838_860_800;

const STORAGE_CLASSES: &[&str] = &[
    "STANDARD",
    "STANDARD_IA",
    "INTELLIGENT_TIERING",
    "ARCHIVE",
    "DEEP_ARCHIVE",
    "MAZ_STANDARD",
    "MAZ_STANDARD_IA",
    "MAZ_INTELLIGENT_TIERING",
];
const ACLS: &[&str] = &["private", "public-read", "public-read-write", "default"];
const SSE_ALGORITHMS: &[&str] = &["AES256", "cos/kms", "SM4"];

/// Called with the byte length of every part that is done, including
/// parts already done by an earlier attempt.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Config for a [`TransferClient`](crate::TransferClient).
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Region of the buckets, for example `ap-guangzhou`.
    pub region: String,
    /// Endpoint suffix replacing `cos.{region}.myqcloud.com`.
    pub endpoint: Option<String>,
    /// `https` or `http`.
    pub scheme: String,
    /// How many times one request is retried on network errors and 5xx.
    pub retry_times: usize,
    /// First backoff delay, doubled on each retry.
    pub retry_min_delay: Duration,
    /// How long establishing a connection may take.
    pub connect_timeout: Duration,
    /// How long a request may wait for the next bytes of a response.
    pub read_timeout: Duration,
    /// Directory progress records are kept in.
    pub record_dir: PathBuf,
    /// Part size used when options don't set one, in MiB.
    pub part_size_mib: u64,
    /// Upper bound on the number of parts; the part size grows to honor it.
    pub max_part_count: u64,
    /// Parts moved at the same time when options don't set it.
    pub max_threads: usize,
    /// Extra executor passes over failed parts before giving up.
    pub part_retry_passes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            endpoint: None,
            scheme: "https".to_string(),
            retry_times: 3,
            retry_min_delay: Duration::from_millis(200),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            record_dir: default_record_dir(&Context::new().with_env(OsEnv)),
            part_size_mib: 1,
            max_part_count: 100,
            max_threads: 5,
            part_retry_passes: 1,
        }
    }
}

fn default_record_dir(ctx: &Context) -> PathBuf {
    ctx.home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".coskit")
        .join("record")
}

impl TransferConfig {
    /// Load config from environment variables.
    ///
    /// Region comes from the same variables credentials do.
    pub fn from_env(ctx: &Context) -> Self {
        let cos = coskit_tencent_cos::Config::from_env(ctx);
        Self {
            region: cos.region.unwrap_or_default(),
            endpoint: ctx.env_var(COSKIT_ENDPOINT),
            record_dir: ctx
                .env_var(COSKIT_RECORD_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| default_record_dir(ctx)),
            ..Default::default()
        }
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the record directory.
    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = dir.into();
        self
    }

    /// Check values that would make every transfer fail.
    pub fn validate(&self) -> Result<()> {
        if self.scheme != "https" && self.scheme != "http" {
            return Err(Error::invalid_input(format!(
                "scheme must be http or https, got {}",
                self.scheme
            )));
        }
        if self.max_part_count == 0 || self.max_part_count > 10_000 {
            return Err(Error::invalid_input("max_part_count must be in 1..=10000"));
        }
        if self.max_threads == 0 {
            return Err(Error::invalid_input("max_threads must be positive"));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(Error::invalid_input("timeouts must be positive"));
        }
        Ok(())
    }
}

/// Typed per-object options, each mapped to one request header.
///
/// | field                 | header                         |
/// |-----------------------|--------------------------------|
/// | `content_type`        | `Content-Type`                 |
/// | `cache_control`       | `Cache-Control`                |
/// | `content_disposition` | `Content-Disposition`          |
/// | `content_encoding`    | `Content-Encoding`             |
/// | `expires`             | `Expires`                      |
/// | `storage_class`       | `x-cos-storage-class`          |
/// | `acl`                 | `x-cos-acl`                    |
/// | `sse_algorithm`       | `x-cos-server-side-encryption` |
/// | `traffic_limit`       | `x-cos-traffic-limit`          |
/// | `metadata[k]`         | `x-cos-meta-{k}`               |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectOptions {
    /// MIME type of the object.
    pub content_type: Option<String>,
    /// Cache policy.
    pub cache_control: Option<String>,
    /// Presentation hint, e.g. `attachment; filename="a.txt"`.
    pub content_disposition: Option<String>,
    /// Encoding applied to the content.
    pub content_encoding: Option<String>,
    /// HTTP date after which the object is stale.
    pub expires: Option<String>,
    /// One of the COS storage classes, `STANDARD` if unset.
    pub storage_class: Option<String>,
    /// Canned ACL.
    pub acl: Option<String>,
    /// Server side encryption algorithm.
    pub sse_algorithm: Option<String>,
    /// Bandwidth limit for each request, in bit/s.
    pub traffic_limit: Option<u64>,
    /// User metadata, sent without the `x-cos-meta-` prefix.
    pub metadata: BTreeMap<String, String>,
}

impl ObjectOptions {
    /// Set the content type.
    pub fn with_content_type(mut self, v: impl Into<String>) -> Self {
        self.content_type = Some(v.into());
        self
    }

    /// Set the storage class.
    pub fn with_storage_class(mut self, v: impl Into<String>) -> Self {
        self.storage_class = Some(v.into());
        self
    }

    /// Set the traffic limit in bit/s.
    pub fn with_traffic_limit(mut self, v: u64) -> Self {
        self.traffic_limit = Some(v);
        self
    }

    /// Add one user metadata entry.
    pub fn with_metadata(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.metadata.insert(k.into(), v.into());
        self
    }

    /// Finish building: validate and hand the options back.
    ///
    /// Transfers validate again before the first request, so options
    /// assembled field by field can't skip the check.
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Reject values the service would refuse.
    pub fn validate(&self) -> Result<()> {
        check_traffic_limit(self.traffic_limit)?;
        check_one_of("storage_class", self.storage_class.as_deref(), STORAGE_CLASSES)?;
        check_one_of("acl", self.acl.as_deref(), ACLS)?;
        check_one_of("sse_algorithm", self.sse_algorithm.as_deref(), SSE_ALGORITHMS)?;
        self.headers().map(|_| ())
    }

    /// Render every option as a header.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let fixed = [
            (CONTENT_TYPE, &self.content_type),
            (CACHE_CONTROL, &self.cache_control),
            (CONTENT_DISPOSITION, &self.content_disposition),
            (CONTENT_ENCODING, &self.content_encoding),
            (EXPIRES, &self.expires),
            (HeaderName::from_static(X_COS_STORAGE_CLASS), &self.storage_class),
            (HeaderName::from_static(X_COS_ACL), &self.acl),
            (HeaderName::from_static(X_COS_SSE), &self.sse_algorithm),
        ];
        for (name, value) in fixed {
            if let Some(v) = value {
                headers.insert(name, visible_ascii(v)?);
            }
        }
        if let Some(limit) = self.traffic_limit {
            headers.insert(X_COS_TRAFFIC_LIMIT, HeaderValue::from(limit));
        }
        for (k, v) in &self.metadata {
            if k.is_empty() {
                return Err(Error::invalid_input("metadata key must not be empty"));
            }
            let name = HeaderName::from_bytes(format!("{X_COS_META_PREFIX}{k}").as_bytes())?;
            headers.insert(name, visible_ascii(v)?);
        }
        Ok(headers)
    }
}

/// Options of one upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Requested part size in MiB, the config default if unset.
    pub part_size_mib: Option<u64>,
    /// Parts uploaded at the same time, the config default if unset.
    pub max_threads: Option<usize>,
    /// Send `Content-MD5` for every request and check returned ETags.
    pub enable_md5: bool,
    /// Headers applied to the created object.
    pub object: ObjectOptions,
}

/// Options of one download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Requested part size in MiB, the config default if unset.
    pub part_size_mib: Option<u64>,
    /// Parts downloaded at the same time, the config default if unset.
    pub max_threads: Option<usize>,
    /// Verify the assembled file against `x-cos-hash-crc64ecma`.
    pub enable_crc: bool,
    /// Bandwidth limit for each range request, in bit/s.
    pub traffic_limit: Option<u64>,
}

impl DownloadOptions {
    /// Finish building: validate and hand the options back.
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Reject values the service would refuse.
    pub fn validate(&self) -> Result<()> {
        check_traffic_limit(self.traffic_limit)
    }
}

pub(crate) fn check_traffic_limit(limit: Option<u64>) -> Result<()> {
    match limit {
        Some(v) if !(MIN_TRAFFIC_LIMIT..=MAX_TRAFFIC_LIMIT).contains(&v) => {
            Err(Error::invalid_input(format!(
                "traffic_limit must be in {MIN_TRAFFIC_LIMIT}..={MAX_TRAFFIC_LIMIT} bit/s, got {v}"
            )))
        }
        _ => Ok(()),
    }
}

fn check_one_of(name: &str, value: Option<&str>, allowed: &[&str]) -> Result<()> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(Error::invalid_input(format!(
            "{name} must be one of {allowed:?}, got {v}"
        ))),
        _ => Ok(()),
    }
}

fn visible_ascii(v: &str) -> Result<HeaderValue> {
    if !v.bytes().all(|b| b == b' ' || b.is_ascii_graphic()) {
        return Err(Error::invalid_input(format!(
            "header value {v:?} must be visible ascii"
        )));
    }
    Ok(HeaderValue::from_str(v)?)
}
