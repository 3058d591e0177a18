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

use std::env;
use std::time::Duration;

use bytes::Bytes;
use coskit_core::{Context, Result, Signer};
use coskit_http_send_reqwest::ReqwestHttpSend;
use coskit_tencent_cos::{Credential, RequestSigner, StaticCredentialProvider};
use http::{Request, StatusCode};
use log::{debug, warn};

struct Live {
    ctx: Context,
    signer: Signer<Credential>,
    url: String,
}

fn init() -> Option<Live> {
    let _ = env_logger::builder().is_test(true).try_init();
    if env::var("COSKIT_TENCENT_COS_TEST").ok().as_deref() != Some("on") {
        return None;
    }

    let secret_id = env::var("COSKIT_TENCENT_COS_SECRET_ID")
        .expect("env COSKIT_TENCENT_COS_SECRET_ID must set");
    let secret_key = env::var("COSKIT_TENCENT_COS_SECRET_KEY")
        .expect("env COSKIT_TENCENT_COS_SECRET_KEY must set");
    let url = env::var("COSKIT_TENCENT_COS_URL").expect("env COSKIT_TENCENT_COS_URL must set");

    let ctx = Context::new().with_http_send(ReqwestHttpSend::default());
    let signer = Signer::new(
        ctx.clone(),
        StaticCredentialProvider::new(&secret_id, &secret_key),
        RequestSigner::new(),
    );
    Some(Live { ctx, signer, url })
}

async fn send(live: &Live, req: Request<Bytes>, expires_in: Option<Duration>) -> Result<StatusCode> {
    let (mut parts, body) = req.into_parts();
    live.signer.sign(&mut parts, expires_in).await?;
    debug!("signed request: {} {}", parts.method, parts.uri);

    let resp = live.ctx.http_send(Request::from_parts(parts, body)).await?;
    let status = resp.status();
    debug!("got response content: {}", resp.into_body().text().await?);
    Ok(status)
}

#[tokio::test]
async fn test_get_not_exist_object() -> Result<()> {
    let Some(live) = init() else {
        warn!("COSKIT_TENCENT_COS_TEST is not set, skipped");
        return Ok(());
    };

    let req = Request::get(format!("{}/not_exist_file", live.url)).body(Bytes::new())?;
    assert_eq!(StatusCode::NOT_FOUND, send(&live, req, None).await?);
    Ok(())
}

#[tokio::test]
async fn test_put_then_head_object() -> Result<()> {
    let Some(live) = init() else {
        warn!("COSKIT_TENCENT_COS_TEST is not set, skipped");
        return Ok(());
    };

    let url = format!("{}/coskit/signed put.txt", live.url).replace(' ', "%20");
    let req = Request::put(&url)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .header("x-cos-meta-owner", "coskit")
        .body(Bytes::from_static(b"hello"))?;
    assert_eq!(StatusCode::OK, send(&live, req, None).await?);

    let req = Request::head(&url).body(Bytes::new())?;
    assert_eq!(StatusCode::OK, send(&live, req, None).await?);
    Ok(())
}

#[tokio::test]
async fn test_presigned_list_object() -> Result<()> {
    let Some(live) = init() else {
        warn!("COSKIT_TENCENT_COS_TEST is not set, skipped");
        return Ok(());
    };

    let req = Request::get(format!("{}/?prefix=coskit/&max-keys=10", live.url)).body(Bytes::new())?;
    assert_eq!(
        StatusCode::OK,
        send(&live, req, Some(Duration::from_secs(600))).await?
    );
    Ok(())
}
