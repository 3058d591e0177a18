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

//! Checksums the service reports: CRC-64/ECMA-182 and MD5.

use crate::Result;
use crc::{Crc, CRC_64_XZ};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// COS names it `crc64ecma`; the parameters are the reflected ECMA-182
/// polynomial with all-ones init and xorout, known as CRC-64/XZ.
pub const CRC64_ECMA: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// CRC64 of an in-memory buffer.
pub fn crc64(data: &[u8]) -> u64 {
    CRC64_ECMA.checksum(data)
}

/// CRC64 of a file, read in 1 MiB chunks.
pub async fn crc64_file(path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut digest = CRC64_ECMA.digest();
    let mut buf = vec![0; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize())
}

/// Parse `x-cos-hash-crc64ecma`, which is a decimal u64.
pub fn parse_crc64(v: &str) -> Option<u64> {
    v.trim().parse().ok()
}

/// Hex MD5, the form COS uses for single part ETags.
pub fn hex_md5(data: &[u8]) -> String {
    coskit_core::hash::hex_md5(data)
}

/// Base64 MD5 for the `Content-MD5` header.
pub fn content_md5(data: &[u8]) -> String {
    coskit_core::hash::base64_md5(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc64_check_value() {
        // Catalogue check value of CRC-64/XZ.
        assert_eq!(crc64(b"123456789"), 0x995dc9bbdf1939fa);
        assert_eq!(crc64(b""), 0);
    }

    #[tokio::test]
    async fn test_crc64_file_matches_buffer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data");
        let data: Vec<u8> = (0..3 * READ_BUFFER_SIZE + 7).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data)?;

        assert_eq!(crc64_file(&path).await?, crc64(&data));
        Ok(())
    }

    #[test]
    fn test_parse_crc64() {
        assert_eq!(parse_crc64("11050016276063574432"), Some(11050016276063574432));
        assert_eq!(parse_crc64("-1"), None);
    }
}
