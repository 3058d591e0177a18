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
use coskit_core::utils::Redact;
use coskit_core::Context;
use std::fmt::{Debug, Formatter};

/// Config for Tencent COS services.
#[derive(Clone, Default)]
pub struct Config {
    /// Region of the bucket, for example `ap-guangzhou`.
    pub region: Option<String>,
    /// Secret ID (Access Key ID)
    pub secret_id: Option<String>,
    /// Secret Key (Secret Access Key)
    pub secret_key: Option<String>,
    /// Security token for temporary credentials
    pub security_token: Option<String>,
    /// Path of the INI profile file, defaults to `~/.cos.conf`.
    pub config_file: Option<String>,
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("region", &self.region)
            .field("secret_id", &Redact::from(&self.secret_id))
            .field("secret_key", &Redact::from(&self.secret_key))
            .field("security_token", &Redact::from(&self.security_token))
            .field("config_file", &self.config_file)
            .finish()
    }
}

impl Config {
    /// Load config from environment variables.
    ///
    /// `TENCENTCLOUD_*` wins over `TKE_*`, which wins over `COS_*`.
    pub fn from_env(ctx: &Context) -> Self {
        Self {
            region: ctx
                .env_var(TENCENTCLOUD_REGION)
                .or_else(|| ctx.env_var(TKE_REGION))
                .or_else(|| ctx.env_var(COS_REGION)),
            secret_id: ctx
                .env_var(TENCENTCLOUD_SECRET_ID)
                .or_else(|| ctx.env_var(TKE_SECRET_ID))
                .or_else(|| ctx.env_var(COS_SECRET_ID)),
            secret_key: ctx
                .env_var(TENCENTCLOUD_SECRET_KEY)
                .or_else(|| ctx.env_var(TKE_SECRET_KEY))
                .or_else(|| ctx.env_var(COS_SECRET_KEY)),
            security_token: ctx
                .env_var(TENCENTCLOUD_TOKEN)
                .or_else(|| ctx.env_var(TENCENTCLOUD_SECURITY_TOKEN))
                .or_else(|| ctx.env_var(QCLOUD_SECRET_TOKEN)),
            config_file: ctx.env_var(COS_CONFIG_FILE),
        }
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the static secret pair.
    pub fn with_secret(mut self, secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.secret_id = Some(secret_id.into());
        self.secret_key = Some(secret_key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coskit_core::StaticEnv;
    use std::collections::HashMap;

    #[test]
    fn test_from_env_precedence() {
        let ctx = Context::new().with_env(StaticEnv {
            home_dir: None,
            envs: HashMap::from([
                (TKE_SECRET_ID.to_string(), "tke_id".to_string()),
                (TENCENTCLOUD_SECRET_ID.to_string(), "tc_id".to_string()),
                (COS_SECRET_KEY.to_string(), "cos_key".to_string()),
                (COS_REGION.to_string(), "ap-shanghai".to_string()),
            ]),
        });

        let cfg = Config::from_env(&ctx);
        assert_eq!(cfg.secret_id.as_deref(), Some("tc_id"));
        assert_eq!(cfg.secret_key.as_deref(), Some("cos_key"));
        assert_eq!(cfg.region.as_deref(), Some("ap-shanghai"));
        assert!(cfg.security_token.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cfg = Config::default().with_secret("AKIDexampleid", "verysecretkey");
        let out = format!("{cfg:?}");
        assert!(!out.contains("verysecretkey"));
    }
}
