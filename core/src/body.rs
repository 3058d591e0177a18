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

use crate::Result;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::fmt::{Debug, Formatter};

/// Body of an HTTP response.
///
/// The body is pulled chunk by chunk via [`Body::next`]. It is finite and can
/// be consumed exactly once: the only way to read it again is to send the
/// request again.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Bytes(Option<Bytes>),
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl Body {
    /// Create an empty body.
    pub fn empty() -> Self {
        Self {
            inner: Inner::Bytes(None),
        }
    }

    /// Create a body from a stream of chunks.
    pub fn from_stream(stream: impl Stream<Item = Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Inner::Stream(stream.boxed()),
        }
    }

    /// Pull the next chunk from the body.
    ///
    /// Returns `None` once the body is exhausted.
    pub async fn next(&mut self) -> Option<Result<Bytes>> {
        match &mut self.inner {
            Inner::Bytes(bs) => bs.take().filter(|bs| !bs.is_empty()).map(Ok),
            Inner::Stream(s) => s.next().await,
        }
    }

    /// Collect the whole body into memory.
    ///
    /// Only use this for small payloads such as XML documents.
    pub async fn bytes(mut self) -> Result<Bytes> {
        if let Inner::Bytes(bs) = &mut self.inner {
            return Ok(bs.take().unwrap_or_default());
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Collect the whole body into a lossy utf-8 string.
    pub async fn text(self) -> Result<String> {
        let bs = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bs).to_string())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl Debug for Body {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Bytes(bs) => f
                .debug_struct("Body")
                .field("len", &bs.as_ref().map(|bs| bs.len()).unwrap_or_default())
                .finish(),
            Inner::Stream(_) => f.debug_struct("Body").field("stream", &true).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bs: Bytes) -> Self {
        Self {
            inner: Inner::Bytes(Some(bs)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bs: Vec<u8>) -> Self {
        Bytes::from(bs).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}
