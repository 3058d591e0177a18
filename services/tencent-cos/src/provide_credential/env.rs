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

use crate::{Config, Credential};
use async_trait::async_trait;
use coskit_core::{Context, ProvideCredential, Result};
use log::debug;

/// EnvCredentialProvider loads Tencent Cloud credentials from environment variables.
///
/// - secret id: `TENCENTCLOUD_SECRET_ID`, `TKE_SECRET_ID` or `COS_SECRET_ID`
/// - secret key: `TENCENTCLOUD_SECRET_KEY`, `TKE_SECRET_KEY` or `COS_SECRET_KEY`
/// - token (optional): `TENCENTCLOUD_TOKEN`, `TENCENTCLOUD_SECURITY_TOKEN` or `QCLOUD_SECRET_TOKEN`
#[derive(Debug, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    /// Create a new EnvCredentialProvider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProvideCredential for EnvCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let config = Config::from_env(ctx);

        match (config.secret_id, config.secret_key) {
            (Some(secret_id), Some(secret_key)) => {
                debug!("loading credential from env");
                Ok(Some(Credential {
                    secret_id,
                    secret_key,
                    security_token: config.security_token,
                    expires_in: None,
                }))
            }
            _ => Ok(None),
        }
    }
}
