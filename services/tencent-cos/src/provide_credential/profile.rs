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
use crate::{Config, Credential};
use async_trait::async_trait;
use coskit_core::{Context, Error, ProvideCredential, Result};
use ini::Ini;
use log::{debug, warn};
use std::sync::Arc;

/// Loads credentials from the INI profile written by `coscmd config`.
///
/// ```ini
/// [common]
/// secret_id = AKID...
/// secret_key = ...
/// token = ...
/// ```
///
/// The file is `Config::config_file` if set, `~/.cos.conf` otherwise. A missing
/// file is not an error.
#[derive(Debug, Default)]
pub struct ProfileCredentialProvider {
    config: Arc<Config>,
}

impl ProfileCredentialProvider {
    /// Create a new ProfileCredentialProvider
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProvideCredential for ProfileCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let raw = self
            .config
            .config_file
            .as_deref()
            .unwrap_or(DEFAULT_CONFIG_FILE);
        let Some(path) = ctx.expand_home_dir(raw) else {
            debug!("cannot expand profile path {raw}, skipping");
            return Ok(None);
        };

        let content = match ctx.file_read_as_string(&path).await {
            Ok(v) => v,
            Err(err) => {
                debug!("profile {path} is not readable, skipping: {err}");
                return Ok(None);
            }
        };

        let conf = Ini::load_from_str(&content).map_err(|e| {
            Error::config_invalid(format!("profile {path} is not valid ini")).with_source(e)
        })?;
        let Some(props) = conf.section(Some(DEFAULT_CONFIG_SECTION)) else {
            warn!("profile {path} has no [{DEFAULT_CONFIG_SECTION}] section");
            return Ok(None);
        };

        match (props.get("secret_id"), props.get("secret_key")) {
            (Some(secret_id), Some(secret_key)) => {
                debug!("loading credential from profile {path}");
                Ok(Some(Credential {
                    secret_id: secret_id.to_string(),
                    secret_key: secret_key.to_string(),
                    security_token: props
                        .get("token")
                        .filter(|v| !v.is_empty())
                        .map(str::to_string),
                    expires_in: None,
                }))
            }
            _ => Ok(None),
        }
    }
}
