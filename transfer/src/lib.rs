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

//! Resumable multipart transfers for Tencent Cloud COS.
//!
//! A transfer is split into parts by a [`PartPlan`], the parts are moved by
//! a [`PartExecutor`] with bounded concurrency, and completed parts are
//! written to a [`ProgressRecord`] so an interrupted transfer resumes where
//! it stopped.
//!
//! ## Example
//!
//! ```no_run
//! use coskit_core::{Context, Signer};
//! use coskit_tencent_cos::{DefaultCredentialProvider, RequestSigner};
//! use coskit_transfer::{DownloadOptions, TransferClient, TransferConfig, UploadOptions};
//!
//! # async fn example(ctx: Context) -> coskit_transfer::Result<()> {
//! let signer = Signer::new(ctx.clone(), DefaultCredentialProvider::default(), RequestSigner::new());
//! let client = TransferClient::cos(ctx, signer, TransferConfig::default().with_region("ap-guangzhou"))?;
//!
//! let out = client
//!     .upload_file("examplebucket-1250000000", "a.bin", "/data/a.bin", &UploadOptions::default(), None)
//!     .await?;
//! println!("uploaded, etag {}", out.etag);
//!
//! client
//!     .download_file("examplebucket-1250000000", "a.bin", "/data/b.bin", &DownloadOptions::default(), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

mod error;
pub use error::{Error, ErrorKind, Result};
mod config;
pub use config::{
    DownloadOptions, ObjectOptions, ProgressCallback, TransferConfig, UploadOptions,
    COSKIT_ENDPOINT, COSKIT_RECORD_DIR, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
    MAX_TRAFFIC_LIMIT, MIN_TRAFFIC_LIMIT,
};

pub mod checksum;
pub mod plan;
pub use plan::{ByteRange, PartDescriptor, PartPlan};
mod record;
pub use record::{PartRecord, ProgressRecord, RecordStore, TransferTarget};
mod executor;
pub use executor::{ExecutionReport, PartExecutor, PartState, WorkItem};

mod api;
pub use api::{GetObjectOutput, ObjectApi, ObjectMeta, UploadedPart};
mod transport;
pub use transport::Transport;
mod cos;
pub use cos::CosObjectApi;
pub mod memory;

mod client;
pub use client::TransferClient;
mod download;
mod upload;
pub use upload::UploadOutput;
