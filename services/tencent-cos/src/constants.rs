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

use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;

// Env values used in tencent cos services.
pub const TENCENTCLOUD_REGION: &str = "TENCENTCLOUD_REGION";
pub const TKE_REGION: &str = "TKE_REGION";
pub const COS_REGION: &str = "COS_REGION";
pub const TENCENTCLOUD_SECRET_ID: &str = "TENCENTCLOUD_SECRET_ID";
pub const TKE_SECRET_ID: &str = "TKE_SECRET_ID";
pub const COS_SECRET_ID: &str = "COS_SECRET_ID";
pub const TENCENTCLOUD_SECRET_KEY: &str = "TENCENTCLOUD_SECRET_KEY";
pub const TKE_SECRET_KEY: &str = "TKE_SECRET_KEY";
pub const COS_SECRET_KEY: &str = "COS_SECRET_KEY";
pub const TENCENTCLOUD_TOKEN: &str = "TENCENTCLOUD_TOKEN";
pub const TENCENTCLOUD_SECURITY_TOKEN: &str = "TENCENTCLOUD_SECURITY_TOKEN";
pub const QCLOUD_SECRET_TOKEN: &str = "QCLOUD_SECRET_TOKEN";
pub const COS_CONFIG_FILE: &str = "COS_CONFIG_FILE";

/// Default location of the profile file written by `coscmd config`.
pub const DEFAULT_CONFIG_FILE: &str = "~/.cos.conf";
/// Section that holds credentials inside the profile file.
pub const DEFAULT_CONFIG_SECTION: &str = "common";

pub const X_COS_SECURITY_TOKEN: &str = "x-cos-security-token";

/// Seconds the start of a signing window is moved into the past, so a
/// client clock running slightly ahead of the server still produces an
/// accepted signature.
pub const CLOCK_SKEW_SECS: i64 = 60;
/// Default validity of a header signature.
pub const DEFAULT_EXPIRES_SECS: u64 = 3600;

/// AsciiSet for [Tencent UriEncode](https://cloud.tencent.com/document/product/436/7778)
pub static TENCENT_URI_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');
