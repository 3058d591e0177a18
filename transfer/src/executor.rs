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

//! Bounded parallel execution of parts with per-part outcomes.

use crate::config::X_COS_TRAFFIC_LIMIT;
use crate::plan::{ByteRange, PartDescriptor};
use crate::{Error, Result};
use http::{HeaderMap, HeaderValue};
use log::debug;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

/// One part handed to a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// The byte range to move.
    pub part: PartDescriptor,
    /// Bandwidth limit for the part request, in bit/s.
    pub traffic_limit: Option<u64>,
    /// Extra headers for the part request.
    pub headers: HeaderMap,
}

impl WorkItem {
    /// A work item without limit or extra headers.
    pub fn new(part: PartDescriptor) -> Self {
        Self {
            part,
            traffic_limit: None,
            headers: HeaderMap::new(),
        }
    }

    /// Set the bandwidth limit.
    pub fn with_traffic_limit(mut self, limit: Option<u64>) -> Self {
        self.traffic_limit = limit;
        self
    }

    /// Set the extra headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Range of the part, `None` for a zero length part.
    pub fn range(&self) -> Option<ByteRange> {
        self.part.range()
    }

    /// Headers to send with the part request.
    pub fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(limit) = self.traffic_limit {
            headers.insert(X_COS_TRAFFIC_LIMIT, HeaderValue::from(limit));
        }
        headers
    }
}

/// Where a part is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// Waiting for a worker.
    Pending,
    /// A worker is moving it.
    InFlight,
    /// Done.
    Completed,
    /// The worker returned an error.
    Failed,
}

/// Result of one [`PartExecutor::run`].
#[derive(Debug)]
pub struct ExecutionReport<T> {
    states: BTreeMap<u32, PartState>,
    outcomes: BTreeMap<u32, Result<T>>,
}

impl<T> ExecutionReport<T> {
    /// Whether every part completed.
    pub fn success_all(&self) -> bool {
        self.states.values().all(|s| *s == PartState::Completed)
    }

    /// State of one part.
    pub fn state(&self, part_number: u32) -> Option<PartState> {
        self.states.get(&part_number).copied()
    }

    /// Numbers of the failed parts, ascending.
    pub fn failed_parts(&self) -> Vec<u32> {
        self.states
            .iter()
            .filter(|(_, s)| **s == PartState::Failed)
            .map(|(n, _)| *n)
            .collect()
    }

    /// Values of the completed parts, ascending by part number.
    pub fn completed(&self) -> impl Iterator<Item = (u32, &T)> {
        self.outcomes
            .iter()
            .filter_map(|(n, r)| r.as_ref().ok().map(|v| (*n, v)))
    }

    /// Errors of the failed parts, ascending by part number.
    pub fn errors(&self) -> impl Iterator<Item = (u32, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(n, r)| r.as_ref().err().map(|e| (*n, e)))
    }

    /// Whether a new pass over the failed parts may succeed.
    pub fn all_retryable(&self) -> bool {
        self.errors().all(|(_, e)| e.is_retryable())
    }

    /// Turn the failures into one error.
    ///
    /// A failure that can't be retried is returned as is; otherwise the result
    /// is an [`ErrorKind::PartsFailed`](crate::ErrorKind::PartsFailed) error
    /// with the status of the last failure. Both carry the failed part numbers.
    pub fn into_error(mut self) -> Error {
        let failed = self.failed_parts();
        let fatal = self
            .errors()
            .find(|(_, e)| !e.is_retryable())
            .map(|(n, _)| n);
        if let Some(Some(Err(err))) = fatal.map(|n| self.outcomes.remove(&n)) {
            return err.with_failed_parts(failed);
        }

        let last = self.errors().last().map(|(_, e)| e);
        let mut err = Error::parts_failed(format!(
            "{} of {} parts failed{}",
            failed.len(),
            self.states.len(),
            last.map(|e| format!(", last error: {e}")).unwrap_or_default()
        ));
        if let Some(status) = last.and_then(|e| e.status()) {
            err = err.with_status(status);
        }
        if let Some(code) = last.and_then(|e| e.code()) {
            err = err.with_code(code);
        }
        err.with_failed_parts(failed)
    }
}

struct Aggregate<T> {
    queue: VecDeque<WorkItem>,
    states: BTreeMap<u32, PartState>,
    outcomes: BTreeMap<u32, Result<T>>,
}

/// Runs parts on a bounded pool of tasks.
///
/// Each task pulls one item at a time from a shared queue. A failed part
/// doesn't stop the others; the executor doesn't retry, callers run again
/// with the parts that failed.
#[derive(Debug, Clone, Copy)]
pub struct PartExecutor {
    concurrency: usize,
}

impl PartExecutor {
    /// Create an executor running at most `concurrency` parts at once.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Max parts in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `worker` over every item and wait until all are done.
    ///
    /// Part failures are reported in the [`ExecutionReport`]; this only
    /// returns `Err` if a worker task panicked or was cancelled.
    pub async fn run<T, F, Fut>(&self, items: Vec<WorkItem>, worker: F) -> Result<ExecutionReport<T>>
    where
        T: Send + 'static,
        F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let tasks = self.concurrency.min(items.len());
        let aggregate = Arc::new(Mutex::new(Aggregate {
            states: items
                .iter()
                .map(|i| (i.part.number, PartState::Pending))
                .collect(),
            outcomes: BTreeMap::new(),
            queue: items.into(),
        }));
        let worker = Arc::new(worker);

        let mut set = JoinSet::new();
        for _ in 0..tasks {
            let aggregate = aggregate.clone();
            let worker = worker.clone();
            set.spawn(async move {
                loop {
                    let item = {
                        let mut agg = aggregate.lock().expect("lock poisoned");
                        let Some(item) = agg.queue.pop_front() else {
                            break;
                        };
                        agg.states.insert(item.part.number, PartState::InFlight);
                        item
                    };

                    let number = item.part.number;
                    let result = (*worker)(item).await;
                    if let Err(err) = &result {
                        debug!("part {number} failed: {err}");
                    }

                    let mut agg = aggregate.lock().expect("lock poisoned");
                    let state = if result.is_ok() {
                        PartState::Completed
                    } else {
                        PartState::Failed
                    };
                    agg.states.insert(number, state);
                    agg.outcomes.insert(number, result);
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            joined.map_err(|err| Error::unexpected("part worker task failed").with_source(err))?;
        }

        let aggregate = Arc::try_unwrap(aggregate)
            .map_err(|_| Error::unexpected("part workers still hold the aggregate"))?
            .into_inner()
            .expect("lock poisoned");
        Ok(ExecutionReport {
            states: aggregate.states,
            outcomes: aggregate.outcomes,
        })
    }
}
