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

use coskit_core::{Context, OsEnv, Signer};
use coskit_file_read_tokio::TokioFileRead;
use coskit_http_send_reqwest::ReqwestHttpSend;
use coskit_tencent_cos::{Credential, DefaultCredentialProvider, RequestSigner};
use coskit_transfer::{
    CosObjectApi, TransferClient, TransferConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use std::time::Duration;

/// Signer for COS requests.
pub type DefaultSigner = Signer<Credential>;

/// A context reading files with tokio, sending requests with reqwest and
/// reading the OS environment.
///
/// Requests use [`DEFAULT_CONNECT_TIMEOUT`] and [`DEFAULT_READ_TIMEOUT`].
pub fn default_context() -> Context {
    context_with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
}

fn context_with_timeouts(connect: Duration, read: Duration) -> Context {
    let client = reqwest::Client::builder()
        .connect_timeout(connect)
        .read_timeout(read)
        .build()
        .unwrap_or_default();
    Context::new()
        .with_file_read(TokioFileRead)
        .with_http_send(ReqwestHttpSend::new(client))
        .with_env(OsEnv)
}

/// A COS signer loading credentials from the environment, then from
/// `~/.cos.conf`.
///
/// ```no_run
/// # async fn example() -> coskit::Result<()> {
/// let signer = coskit::default_signer();
///
/// let mut req = http::Request::get("https://examplebucket-1250000000.cos.ap-beijing.myqcloud.com/a.txt")
///     .body(())?
///     .into_parts()
///     .0;
/// signer.sign(&mut req, None).await?;
/// # Ok(())
/// # }
/// ```
pub fn default_signer() -> DefaultSigner {
    Signer::new(
        default_context(),
        DefaultCredentialProvider::default(),
        RequestSigner::new(),
    )
}

/// A transfer client over COS using [`default_signer`] and a context with
/// the timeouts of `config`.
///
/// Region and endpoint left unset in `config` are taken from the environment.
pub fn default_client(config: TransferConfig) -> coskit_transfer::Result<TransferClient<CosObjectApi>> {
    let ctx = context_with_timeouts(config.connect_timeout, config.read_timeout);
    let env = TransferConfig::from_env(&ctx);
    let config = TransferConfig {
        region: if config.region.is_empty() {
            env.region
        } else {
            config.region
        },
        endpoint: config.endpoint.or(env.endpoint),
        ..config
    };
    TransferClient::cos(ctx, default_signer(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use coskit_core::StaticEnv;
    use coskit_tencent_cos::StaticCredentialProvider;
    use coskit_transfer::{ErrorKind, Transport};
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_client_uses_region() -> coskit_transfer::Result<()> {
        let client = default_client(TransferConfig::default().with_region("ap-beijing"))?;
        assert_eq!(
            client.api().object_url("examplebucket-1250000000", "dir/a.txt", &[]),
            "https://examplebucket-1250000000.cos.ap-beijing.myqcloud.com/dir/a.txt"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_server_times_out() -> coskit_transfer::Result<()> {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let ctx = context_with_timeouts(Duration::from_millis(200), Duration::from_millis(200))
            .with_env(StaticEnv::default());
        let signer = Signer::new(
            ctx.clone(),
            StaticCredentialProvider::new("AKIDexample", "secret"),
            RequestSigner::new(),
        );
        let transport =
            Transport::new(ctx, signer).with_retry(1, Duration::from_millis(10));

        let req = http::Request::get(format!("http://{addr}/k"))
            .body(Bytes::new())
            .expect("request must be valid");
        let started = Instant::now();
        let err = transport
            .send(req)
            .await
            .expect_err("server never answers");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(started.elapsed() < Duration::from_secs(10));
        Ok(())
    }
}
