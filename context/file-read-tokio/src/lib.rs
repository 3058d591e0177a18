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

//! Tokio-based file reading implementation for coskit.
//!
//! `TokioFileRead` lets credential providers read profile files such as
//! `~/.cos.conf` without blocking the runtime.
//!
//! ```no_run
//! use coskit_core::{Context, OsEnv};
//! use coskit_file_read_tokio::TokioFileRead;
//!
//! # async fn example() -> coskit_core::Result<()> {
//! let ctx = Context::new()
//!     .with_file_read(TokioFileRead)
//!     .with_env(OsEnv);
//!
//! let path = ctx.expand_home_dir("~/.cos.conf").unwrap_or_default();
//! let content = ctx.file_read_as_string(&path).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use coskit_core::{Error, FileRead, Result};

/// Tokio-based implementation of the `FileRead` trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileRead;

#[async_trait]
impl FileRead for TokioFileRead {
    async fn file_read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::unexpected(format!("failed to read file {path}")).with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coskit_core::Context;

    #[tokio::test]
    async fn test_file_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".cos.conf");
        std::fs::write(&path, "[common]\nsecret_id = id\n")?;

        let ctx = Context::new().with_file_read(TokioFileRead);
        let content = ctx
            .file_read_as_string(path.to_str().expect("path must be utf-8"))
            .await?;
        assert!(content.starts_with("[common]"));

        assert!(ctx.file_read("/definitely/not/here").await.is_err());
        Ok(())
    }
}
