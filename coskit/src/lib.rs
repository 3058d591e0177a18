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

//! Signed requests and resumable transfers for Tencent Cloud COS.
//!
//! This crate re-exports the coskit crates and, with the default
//! `default-context` feature, wires them together:
//!
//! ```no_run
//! # async fn example() -> coskit::transfer::Result<()> {
//! use coskit::transfer::{DownloadOptions, TransferConfig};
//!
//! let client = coskit::default_client(TransferConfig::default().with_region("ap-beijing"))?;
//! client
//!     .download_file(
//!         "examplebucket-1250000000",
//!         "dir/a.bin",
//!         "/tmp/a.bin",
//!         &DownloadOptions::default(),
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

pub use coskit_core::*;

/// COS request signing and credentials.
pub mod tencent {
    pub use coskit_tencent_cos::*;
}

/// Resumable uploads and downloads.
pub mod transfer {
    pub use coskit_transfer::*;
}

#[cfg(feature = "default-context")]
mod context;
#[cfg(feature = "default-context")]
pub use context::{default_client, default_context, default_signer, DefaultSigner};
