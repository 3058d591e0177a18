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

use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::{Error, ErrorKind, Result};
use backon::{BackoffBuilder, ExponentialBuilder};
use bytes::Bytes;
use coskit_core::{Body, Context, Signer};
use coskit_tencent_cos::Credential;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;

const X_COS_REQUEST_ID: &str = "x-cos-request-id";

/// Sends signed requests, retrying the ones that may succeed a second time.
///
/// Every call is bounded by a timeout covering connect and the wait for
/// the response head; a call running past it counts as a network error.
/// Idempotent methods are retried with exponential backoff on network
/// errors and 5xx responses. Every attempt is signed again, so a retry
/// never carries an expired signature. Non success responses are turned
/// into [`ErrorKind::Service`] errors with the parsed COS error body.
#[derive(Debug, Clone)]
pub struct Transport {
    ctx: Context,
    signer: Signer<Credential>,
    retry_times: usize,
    retry_min_delay: Duration,
    timeout: Duration,
}

impl Transport {
    /// Create a transport retrying 3 times starting at 200ms.
    pub fn new(ctx: Context, signer: Signer<Credential>) -> Self {
        Self {
            ctx,
            signer,
            retry_times: 3,
            retry_min_delay: Duration::from_millis(200),
            timeout: DEFAULT_CONNECT_TIMEOUT + DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set how long one call may take until the response head arrives.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how often and how soon requests are retried.
    pub fn with_retry(mut self, times: usize, min_delay: Duration) -> Self {
        self.retry_times = times;
        self.retry_min_delay = min_delay;
        self
    }

    /// Send a request.
    pub async fn send(&self, req: Request<Bytes>) -> Result<Response<Body>> {
        self.send_with(req, &[]).await
    }

    /// Send a request, also retrying on the given client error statuses.
    ///
    /// Some 4xx answers are races rather than mistakes, like a `404` right
    /// after the object was written; callers list those here.
    pub async fn send_with(
        &self,
        req: Request<Bytes>,
        transient: &[StatusCode],
    ) -> Result<Response<Body>> {
        let (parts, body) = req.into_parts();
        let idempotent = is_idempotent(&parts.method);

        let mut retry = ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_times(self.retry_times)
            .with_jitter()
            .build();

        loop {
            let err = match self
                .send_once(&parts.method, &parts.uri, parts.version, &parts.headers, body.clone())
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => service_error(resp).await,
                Err(err) => err,
            };

            let retryable = idempotent
                && (err.kind() == ErrorKind::Transient
                    || err.status().is_some_and(|s| s.is_server_error() || transient.contains(&s)));
            if !retryable {
                return Err(err);
            }

            match retry.next() {
                Some(dur) => {
                    warn!(
                        "{} {} failed, retry after {dur:?}: {err}",
                        parts.method, parts.uri
                    );
                    tokio::time::sleep(dur).await;
                }
                None => {
                    warn!("{} {} still failed after retry", parts.method, parts.uri);
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        uri: &Uri,
        version: Version,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>> {
        let mut req = Request::builder()
            .method(method.clone())
            .uri(uri.clone())
            .version(version)
            .body(body)?;
        *req.headers_mut() = headers.clone();

        let (mut parts, body) = req.into_parts();
        self.signer.sign(&mut parts, None).await?;
        debug!("sending {} {}", parts.method, parts.uri);

        let send = self.ctx.http_send(Request::from_parts(parts, body));
        match tokio::time::timeout(self.timeout, send).await {
            Ok(resp) => Ok(resp?),
            Err(_) => Err(Error::transient(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub(crate) struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

/// Turn a non success response into an error, reading the XML body if any.
pub(crate) async fn service_error(resp: Response<Body>) -> Error {
    let (parts, body) = resp.into_parts();
    let body = body.bytes().await.unwrap_or_default();
    error_from_parts(parts.status, &parts.headers, &body)
}

pub(crate) fn error_from_parts(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Error {
    let parsed = std::str::from_utf8(body)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| quick_xml::de::from_str::<ErrorResponse>(v).ok())
        .unwrap_or_default();

    let message = if parsed.message.is_empty() {
        format!("unexpected status {status}")
    } else {
        parsed.message
    };
    let mut err = Error::service(status, message);
    if !parsed.code.is_empty() {
        err = err.with_code(parsed.code);
    }

    let request_id = headers
        .get(X_COS_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| (!parsed.request_id.is_empty()).then_some(parsed.request_id));
    if let Some(request_id) = request_id {
        err = err.with_request_id(request_id);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coskit_core::HttpSend;
    use coskit_tencent_cos::{RequestSigner, StaticCredentialProvider};
    use http::header::AUTHORIZATION;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replies from a script; `None` stands for a connection reset.
    #[derive(Debug, Default, Clone)]
    struct ScriptedHttp {
        replies: Arc<Mutex<VecDeque<Option<(u16, &'static str)>>>>,
        seen: Arc<Mutex<Vec<HeaderMap>>>,
    }

    impl ScriptedHttp {
        fn new(replies: Vec<Option<(u16, &'static str)>>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().expect("lock poisoned").len()
        }
    }

    #[async_trait]
    impl HttpSend for ScriptedHttp {
        async fn http_send(&self, req: Request<Bytes>) -> coskit_core::Result<Response<Body>> {
            self.seen
                .lock()
                .expect("lock poisoned")
                .push(req.headers().clone());
            let reply = self
                .replies
                .lock()
                .expect("lock poisoned")
                .pop_front()
                .expect("script exhausted");
            match reply {
                None => Err(coskit_core::Error::network("connection reset by peer")),
                Some((status, body)) => Ok(Response::builder()
                    .status(status)
                    .header(X_COS_REQUEST_ID, "NjQ2ZTIx")
                    .body(Body::from(body))?),
            }
        }
    }

    /// Accepts every request and never answers.
    #[derive(Debug, Default, Clone)]
    struct StalledHttp {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HttpSend for StalledHttp {
        async fn http_send(&self, _: Request<Bytes>) -> coskit_core::Result<Response<Body>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn transport(http: &ScriptedHttp) -> Transport {
        let ctx = Context::new().with_http_send(http.clone());
        let signer = Signer::new(
            ctx.clone(),
            StaticCredentialProvider::new("AKIDexample", "secret"),
            RequestSigner::new(),
        );
        Transport::new(ctx, signer).with_retry(3, Duration::from_millis(1))
    }

    fn get() -> Request<Bytes> {
        Request::get("https://b-1250000000.cos.ap-guangzhou.myqcloud.com/a.txt")
            .body(Bytes::new())
            .expect("request must be valid")
    }

    const NO_SUCH_KEY: &str = "<?xml version='1.0' encoding='utf-8' ?>\
        <Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message>\
        <RequestId>NjQ2ZTIx</RequestId></Error>";

    #[tokio::test]
    async fn test_retry_server_error_then_succeed() -> Result<()> {
        let http = ScriptedHttp::new(vec![
            Some((500, "<Error><Code>InternalError</Code></Error>")),
            None,
            Some((200, "hello")),
        ]);
        let resp = transport(&http).send(get()).await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.into_body().text().await?, "hello");
        assert_eq!(http.calls(), 3);

        // Signed again on every attempt.
        for headers in http.seen.lock().expect("lock poisoned").iter() {
            assert!(headers.contains_key(AUTHORIZATION));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let http = ScriptedHttp::new(vec![Some((404, NO_SUCH_KEY))]);
        let err = transport(&http)
            .send(get())
            .await
            .expect_err("404 must fail");
        assert!(err.is_not_found());
        assert_eq!(err.code(), Some("NoSuchKey"));
        assert_eq!(err.message(), "The specified key does not exist.");
        assert_eq!(err.request_id(), Some("NjQ2ZTIx"));
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_listed_client_error_is_retried() -> Result<()> {
        let http = ScriptedHttp::new(vec![Some((404, NO_SUCH_KEY)), Some((200, ""))]);
        let resp = transport(&http)
            .send_with(get(), &[StatusCode::NOT_FOUND])
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(http.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_times() {
        let http = ScriptedHttp::new(vec![None; 4]);
        let err = transport(&http)
            .send(get())
            .await
            .expect_err("network keeps failing");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
        assert_eq!(http.calls(), 4);
    }

    #[tokio::test]
    async fn test_post_is_not_retried() {
        let http = ScriptedHttp::new(vec![Some((503, ""))]);
        let req = Request::post("https://b-1250000000.cos.ap-guangzhou.myqcloud.com/a.txt?uploads")
            .body(Bytes::new())
            .expect("request must be valid");
        let err = transport(&http)
            .send(req)
            .await
            .expect_err("503 must fail");
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.message(), "unexpected status 503 Service Unavailable");
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out_and_is_retried() {
        let http = StalledHttp::default();
        let ctx = Context::new().with_http_send(http.clone());
        let signer = Signer::new(
            ctx.clone(),
            StaticCredentialProvider::new("AKIDexample", "secret"),
            RequestSigner::new(),
        );
        let transport = Transport::new(ctx, signer)
            .with_retry(2, Duration::from_millis(1))
            .with_timeout(Duration::from_secs(5));

        let err = transport
            .send(get())
            .await
            .expect_err("nothing ever answers");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(http.calls.load(Ordering::SeqCst), 3);

        let req = Request::post("https://b-1250000000.cos.ap-guangzhou.myqcloud.com/a.txt?uploads")
            .body(Bytes::new())
            .expect("request must be valid");
        let err = transport
            .send(req)
            .await
            .expect_err("nothing ever answers");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(http.calls.load(Ordering::SeqCst), 4);
    }
}
