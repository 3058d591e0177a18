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

use crate::{Context, ProvideCredential, Result, SignRequest, SigningCredential};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Signer is the main struct used to sign the request.
///
/// The loaded credential is cached and only reloaded once it's no longer valid.
#[derive(Clone, Debug)]
pub struct Signer<K: SigningCredential> {
    ctx: Context,
    loader: Arc<dyn ProvideCredential<Credential = K>>,
    builder: Arc<dyn SignRequest<Credential = K>>,
    credential: Arc<Mutex<Option<K>>>,
}

impl<K: SigningCredential> Signer<K> {
    /// Create a new signer.
    pub fn new(
        ctx: Context,
        loader: impl ProvideCredential<Credential = K>,
        builder: impl SignRequest<Credential = K>,
    ) -> Self {
        Self {
            ctx,

            loader: Arc::new(loader),
            builder: Arc::new(builder),
            credential: Arc::new(Mutex::new(None)),
        }
    }

    /// The context this signer loads credentials with.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Signing request.
    pub async fn sign(
        &self,
        req: &mut http::request::Parts,
        expires_in: Option<Duration>,
    ) -> Result<()> {
        let credential = self.credential.lock().expect("lock poisoned").clone();
        let credential = if credential.is_valid() {
            credential
        } else {
            let loaded = self.loader.provide_credential(&self.ctx).await?;
            *self.credential.lock().expect("lock poisoned") = loaded.clone();
            loaded
        };

        self.builder
            .sign_request(&self.ctx, req, credential.as_ref(), expires_in)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Token(bool);

    impl SigningCredential for Token {
        fn is_valid(&self) -> bool {
            self.0
        }
    }

    #[derive(Debug, Default)]
    struct CountingLoader {
        valid: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ProvideCredential for CountingLoader {
        type Credential = Token;

        async fn provide_credential(&self, _: &Context) -> Result<Option<Token>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Token(self.valid)))
        }
    }

    #[derive(Debug)]
    struct HeaderSigner;

    #[async_trait::async_trait]
    impl SignRequest for HeaderSigner {
        type Credential = Token;

        async fn sign_request(
            &self,
            _: &Context,
            req: &mut http::request::Parts,
            credential: Option<&Token>,
            _: Option<Duration>,
        ) -> Result<()> {
            if credential.is_some() {
                req.headers
                    .insert(http::header::AUTHORIZATION, "signed".parse()?);
            }
            Ok(())
        }
    }

    fn parts() -> http::request::Parts {
        http::Request::get("https://example.com/")
            .body(())
            .expect("request must be valid")
            .into_parts()
            .0
    }

    #[tokio::test]
    async fn test_sign_caches_valid_credential() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader {
            valid: true,
            calls: calls.clone(),
        };
        let signer = Signer::new(Context::new(), loader, HeaderSigner);

        for _ in 0..3 {
            let mut req = parts();
            signer.sign(&mut req, None).await?;
            assert_eq!(req.headers[http::header::AUTHORIZATION], "signed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_sign_reloads_invalid_credential() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader {
            valid: false,
            calls: calls.clone(),
        };
        let signer = Signer::new(Context::new(), loader, HeaderSigner);

        signer.sign(&mut parts(), None).await?;
        signer.sign(&mut parts(), None).await?;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
