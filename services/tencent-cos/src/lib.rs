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

//! Tencent Cloud COS request signing.
//!
//! - [`RequestSigner`] implements the COS `q-sign-algorithm=sha1` protocol.
//! - [`sign`] is the underlying pure function, for callers that want to
//!   control the signing window themselves.
//! - Credential providers load a [`Credential`] from env, a static config
//!   or the `~/.cos.conf` profile file.

mod constants;
pub use constants::TENCENT_URI_ENCODE_SET;

mod config;
pub use config::Config;

mod credential;
pub use credential::Credential;

mod provide_credential;
pub use provide_credential::*;

mod sign_request;
pub use sign_request::{sign, RequestSigner, SigningWindow};
