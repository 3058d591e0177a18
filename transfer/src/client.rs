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

use crate::api::ObjectApi;
use crate::cos::CosObjectApi;
use crate::executor::{PartExecutor, WorkItem};
use crate::plan::PartDescriptor;
use crate::record::RecordStore;
use crate::transport::Transport;
use crate::{Error, Result, TransferConfig};
use coskit_core::{Context, Signer};
use coskit_tencent_cos::Credential;
use log::warn;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Uploads and downloads files with resumable multipart transfers.
///
/// The client owns its config; there is no global state. Upload and
/// download live in [`upload_file`](Self::upload_file) and
/// [`download_file`](Self::download_file).
#[derive(Debug)]
pub struct TransferClient<A: ObjectApi> {
    pub(crate) api: Arc<A>,
    pub(crate) config: TransferConfig,
    pub(crate) records: RecordStore,
}

impl<A: ObjectApi> Clone for TransferClient<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            config: self.config.clone(),
            records: self.records.clone(),
        }
    }
}

impl TransferClient<CosObjectApi> {
    /// Create a client talking to COS with `signer`.
    pub fn cos(ctx: Context, signer: Signer<Credential>, config: TransferConfig) -> Result<Self> {
        let api = CosObjectApi::new(Transport::new(ctx, signer), &config)?;
        Self::new(api, config)
    }
}

impl<A: ObjectApi> TransferClient<A> {
    /// Create a client over any object api.
    pub fn new(api: A, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            api: Arc::new(api),
            records: RecordStore::new(&config.record_dir),
            config,
        })
    }

    /// The object api transfers go through.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// The config this client was built with.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// The store progress records are kept in.
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Run `worker` over `parts`, then again over the failed ones while
    /// every failure is retryable, up to `part_retry_passes` extra passes.
    pub(crate) async fn run_parts<T, F, Fut>(
        &self,
        mut parts: Vec<PartDescriptor>,
        threads: usize,
        traffic_limit: Option<u64>,
        worker: F,
    ) -> Result<()>
    where
        T: Send + 'static,
        F: Fn(WorkItem) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let executor = PartExecutor::new(threads);
        let mut pass = 0;
        while !parts.is_empty() {
            let items = parts
                .iter()
                .map(|p| WorkItem::new(*p).with_traffic_limit(traffic_limit))
                .collect();
            let report = executor.run(items, worker.clone()).await?;
            if report.success_all() {
                break;
            }

            let failed = report.failed_parts();
            if pass >= self.config.part_retry_passes || !report.all_retryable() {
                warn!("parts {failed:?} failed, progress record kept for resuming");
                return Err(report.into_error());
            }
            pass += 1;
            warn!(
                "parts {failed:?} failed, retrying them (pass {pass} of {})",
                self.config.part_retry_passes
            );
            parts.retain(|p| failed.contains(&p.number));
        }
        Ok(())
    }
}

/// Make `path` absolute against the working directory.
pub(crate) fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| Error::setup("failed to read the working directory").with_source(e))?;
    Ok(cwd.join(path))
}
