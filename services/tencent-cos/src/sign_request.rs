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

use crate::constants::*;
use crate::Credential;
use async_trait::async_trait;
use coskit_core::hash::{hex_hmac_sha1, hex_sha1};
use coskit_core::time::{format_http_date, now, DateTime};
use coskit_core::{Context, Error, Result, SignRequest, SigningRequest};
use http::header::{AUTHORIZATION, DATE, HOST};
use http::request::Parts;
use http::{HeaderValue, Method};
use log::debug;
use percent_encoding::utf8_percent_encode;
use std::time::Duration;

/// Time window a COS signature is valid for, as unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningWindow {
    /// Start of the window, already moved back for clock skew.
    pub start: i64,
    /// End of the window.
    pub end: i64,
}

impl SigningWindow {
    /// Window starting 60s before `now` and ending `expires` after it.
    pub fn new(now: DateTime, expires: Duration) -> Result<Self> {
        let expires = chrono::TimeDelta::from_std(expires).map_err(|e| {
            Error::request_invalid("signing expiry is out of range").with_source(e)
        })?;
        Ok(Self {
            start: now.timestamp() - CLOCK_SKEW_SECS,
            end: (now + expires).timestamp(),
        })
    }

    /// Rendered as `{start};{end}`, shared by `q-sign-time` and `q-key-time`.
    pub fn key_time(&self) -> String {
        format!("{};{}", self.start, self.end)
    }
}

/// Compute the COS authorization string.
///
/// `path` must be percent decoded. `headers` and `query` are raw
/// `(name, value)` pairs; header values must already be visible ASCII,
/// which [`SigningRequest::header_to_vec`] guarantees.
///
/// - [Tencent COS Signature](https://cloud.tencent.com/document/product/436/7778)
pub fn sign(
    method: &Method,
    path: &str,
    headers: &[(String, String)],
    query: &[(String, String)],
    cred: &Credential,
    window: &SigningWindow,
) -> String {
    let key_time = window.key_time();
    let sign_key = hex_hmac_sha1(cred.secret_key.as_bytes(), key_time.as_bytes());

    let (param_list, param_string) = canonical_pairs(query);
    debug!("param list: {param_list}");
    debug!("param string: {param_string}");
    let (header_list, header_string) = canonical_pairs(headers);
    debug!("header list: {header_list}");
    debug!("header string: {header_string}");

    let http_string = format!(
        "{}\n{path}\n{param_string}\n{header_string}\n",
        method.as_str().to_ascii_lowercase()
    );
    debug!("http string: {http_string}");

    let string_to_sign = format!("sha1\n{key_time}\n{}\n", hex_sha1(http_string.as_bytes()));
    debug!("string to sign: {string_to_sign}");

    let signature = hex_hmac_sha1(sign_key.as_bytes(), string_to_sign.as_bytes());

    format!(
        "q-sign-algorithm=sha1&q-ak={}&q-sign-time={key_time}&q-key-time={key_time}&q-header-list={header_list}&q-url-param-list={param_list}&q-signature={signature}",
        cred.secret_id
    )
}

/// Lowercase and encode every pair, sort them, then render the `;`
/// joined key list and the `&` joined `k=v` string.
fn canonical_pairs(pairs: &[(String, String)]) -> (String, String) {
    let mut encoded = pairs
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k.to_lowercase(), &TENCENT_URI_ENCODE_SET).to_string(),
                utf8_percent_encode(v, &TENCENT_URI_ENCODE_SET).to_string(),
            )
        })
        .collect::<Vec<_>>();
    encoded.sort();

    let list = encoded
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    (list, string)
}

/// RequestSigner that implements Tencent COS signing.
///
/// Without `expires_in` the signature goes into `Authorization` and lives for
/// one hour. With `expires_in` the request becomes a pre-signed url.
#[derive(Debug, Default)]
pub struct RequestSigner {
    time: Option<DateTime>,
}

impl RequestSigner {
    /// Create a new request signer for Tencent COS.
    pub fn new() -> Self {
        Self { time: None }
    }

    /// Specify the signing time.
    ///
    /// # Note
    ///
    /// We should always take current time to sign requests.
    /// Only use this function for testing.
    pub fn with_time(mut self, time: DateTime) -> Self {
        self.time = Some(time);
        self
    }
}

#[async_trait]
impl SignRequest for RequestSigner {
    type Credential = Credential;

    async fn sign_request(
        &self,
        _ctx: &Context,
        req: &mut Parts,
        credential: Option<&Self::Credential>,
        expires_in: Option<Duration>,
    ) -> Result<()> {
        let Some(cred) = credential else {
            return Ok(());
        };

        let now = self.time.unwrap_or_else(now);
        let mut signing_req = SigningRequest::build(req)?;

        // Host is always signed, even when the http client would add it later.
        if !signing_req.headers.contains_key(HOST) {
            let host = HeaderValue::from_str(signing_req.authority.as_str())?;
            signing_req.headers.insert(HOST, host);
        }

        let window = SigningWindow::new(
            now,
            expires_in.unwrap_or(Duration::from_secs(DEFAULT_EXPIRES_SECS)),
        )?;
        let authorization = sign(
            &signing_req.method,
            &signing_req.path_percent_decoded(),
            &signing_req.header_to_vec()?,
            &signing_req.query,
            cred,
            &window,
        );

        signing_req
            .headers
            .insert(DATE, format_http_date(now).parse()?);

        if expires_in.is_some() {
            for pair in authorization.split('&') {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                signing_req.query_push(k, v);
            }
            if let Some(token) = &cred.security_token {
                signing_req.query_push(X_COS_SECURITY_TOKEN, token);
            }
        } else {
            signing_req.headers.insert(AUTHORIZATION, {
                let mut value: HeaderValue = authorization.parse()?;
                value.set_sensitive(true);
                value
            });
            if let Some(token) = &cred.security_token {
                signing_req.headers.insert(X_COS_SECURITY_TOKEN, {
                    let mut value: HeaderValue = token.parse()?;
                    value.set_sensitive(true);
                    value
                });
            }
        }

        signing_req.apply(req)
    }
}
